//! Error types for exthost

use thiserror::Error;

use crate::infra::rpc::protocol::{ResponseError, error_codes};

pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of a single request or of the connection carrying it.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("'{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error [{code}]: {message}")]
    Remote { code: i32, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::ConnectionClosed => error_codes::CONNECTION_CLOSED,
            Self::RequestCancelled => error_codes::REQUEST_CANCELLED,
            Self::Timeout { .. } => error_codes::REQUEST_TIMEOUT,
            Self::Protocol(_) | Self::Json(_) => error_codes::INVALID_PARAMS,
            Self::Transport(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Whether the connection itself is still usable after this error
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RequestCancelled | Self::Remote { .. } | Self::Json(_)
        )
    }
}

impl From<ResponseError> for RpcError {
    fn from(err: ResponseError) -> Self {
        // `ConnectionClosed` only ever comes from our own side of the link
        match err.code {
            error_codes::REQUEST_CANCELLED => Self::RequestCancelled,
            code => Self::Remote {
                code,
                message: err.message,
            },
        }
    }
}

/// A single provider's failure. Never aborts a multi-provider query.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider failed: {0}")]
    Failed(String),

    #[error("Malformed provider result: {0}")]
    Malformed(String),

    #[error("{0}")]
    Rpc(#[from] RpcError),
}

impl ProviderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<&ProviderError> for ResponseError {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Rpc(rpc) => ResponseError::new(rpc.error_code(), rpc.to_string()),
            _ => ResponseError::new(error_codes::INTERNAL_ERROR, err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    #[error("Command not found: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to start extension '{extension}': {reason}")]
    Start { extension: String, reason: String },

    #[error("Extension '{0}' closed before becoming active")]
    Closed(String),

    #[error("No extension clients attached")]
    NoClients,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_closed_code_stays_remote() {
        let forwarded = ResponseError::from(&ProviderError::Rpc(RpcError::ConnectionClosed));
        assert_eq!(forwarded.code, error_codes::CONNECTION_CLOSED);

        let err = RpcError::from(forwarded);
        assert!(!err.is_closed());
        assert!(err.is_request_scoped());
        assert_eq!(err.error_code(), error_codes::CONNECTION_CLOSED);
    }

    #[test]
    fn test_remote_error_keeps_code() {
        let err = RpcError::from(ResponseError::new(error_codes::METHOD_NOT_FOUND, "nope"));
        assert_eq!(err.error_code(), error_codes::METHOD_NOT_FOUND);
        assert!(err.is_request_scoped());
        assert_eq!(err.to_string(), "Remote error [-32601]: nope");
    }

    #[test]
    fn test_timeout_is_request_scoped() {
        let err = RpcError::Timeout {
            method: "textDocument/hover".to_string(),
            timeout_ms: 50,
        };
        assert!(err.is_request_scoped());
        assert_eq!(err.error_code(), error_codes::REQUEST_TIMEOUT);
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn test_provider_error_to_response() {
        let err = ProviderError::failed("boom");
        let response = ResponseError::from(&err);
        assert_eq!(response.code, error_codes::INTERNAL_ERROR);
        assert!(response.message.contains("boom"));
    }

    #[test]
    fn test_cancelled_round_trip() {
        let response = ResponseError::from(&ProviderError::Rpc(RpcError::RequestCancelled));
        assert_eq!(response.code, error_codes::REQUEST_CANCELLED);
        assert!(matches!(
            RpcError::from(response),
            RpcError::RequestCancelled
        ));
    }
}
