//! JSON-RPC 2.0 Protocol Implementation for the extension host
//!
//! Defines the framed message types, the typed method table and the
//! params/result shapes exchanged between host and extensions.
//! Result types (Hover, decorations) live in models/lsp.rs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

pub use crate::models::document::{DocumentSelector, TextDocument};
pub use crate::models::lsp::Position;

// ============================================================================
// JSON-RPC 2.0 Core Types
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: Method, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(id),
            method: method.as_str().to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 Notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.as_str().to_string(),
            params,
        }
    }
}

/// Request ID - can be number or string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(msg: impl fmt::Display) -> Self {
        Self::new(error_codes::INVALID_PARAMS, format!("Invalid params: {}", msg))
    }

    pub fn internal_error(msg: impl fmt::Display) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, format!("Internal error: {}", msg))
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Standard JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const REQUEST_CANCELLED: i32 = -32800;

    // Host-specific error codes
    pub const REQUEST_TIMEOUT: i32 = -32001;
    pub const CONNECTION_CLOSED: i32 = -32099;
}

/// A framed message in either direction
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Request(Request),
    Notification(Notification),
}

impl Message {
    /// Classify a frame by its `id` and `method` members
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        use serde::de::Error;

        let value: Value = serde_json::from_str(json)?;
        let (has_id, has_method) = match value.as_object() {
            Some(object) => (object.contains_key("id"), object.contains_key("method")),
            None => return Err(serde_json::Error::custom("message is not an object")),
        };
        let message = match (has_id, has_method) {
            (true, true) => Self::Request(serde_json::from_value(value)?),
            (false, true) => Self::Notification(serde_json::from_value(value)?),
            (true, false) => Self::Response(serde_json::from_value(value)?),
            (false, false) => {
                return Err(serde_json::Error::custom("message has neither id nor method"));
            }
        };
        Ok(message)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Message::Notification(notification)
    }
}

// ============================================================================
// Method Table
// ============================================================================

/// Every method either side understands. Unknown wire names do not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    Initialized,
    Shutdown,
    Exit,
    Hover,
    Decoration,
    ExecuteCommand,
    RegisterCapability,
    UnregisterCapability,
    DidOpenTextDocument,
    DidChangeConfiguration,
    DidChangeContext,
    Sync,
    LogMessage,
    CancelRequest,
}

impl Method {
    pub const ALL: [Method; 15] = [
        Self::Initialize,
        Self::Initialized,
        Self::Shutdown,
        Self::Exit,
        Self::Hover,
        Self::Decoration,
        Self::ExecuteCommand,
        Self::RegisterCapability,
        Self::UnregisterCapability,
        Self::DidOpenTextDocument,
        Self::DidChangeConfiguration,
        Self::DidChangeContext,
        Self::Sync,
        Self::LogMessage,
        Self::CancelRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "initialized",
            Self::Shutdown => "shutdown",
            Self::Exit => "exit",
            Self::Hover => "textDocument/hover",
            Self::Decoration => "textDocument/decoration",
            Self::ExecuteCommand => "workspace/executeCommand",
            Self::RegisterCapability => "client/registerCapability",
            Self::UnregisterCapability => "client/unregisterCapability",
            Self::DidOpenTextDocument => "textDocument/didOpen",
            Self::DidChangeConfiguration => "workspace/didChangeConfiguration",
            Self::DidChangeContext => "context/didChange",
            Self::Sync => "internal/sync",
            Self::LogMessage => "window/logMessage",
            Self::CancelRequest => "$/cancelRequest",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("Unknown method: {}", s))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Initialize Types
// ============================================================================

/// Client info for identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// What the host can do with registrations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(default)]
    pub dynamic_registration: bool,
    #[serde(default)]
    pub hover_merging: bool,
}

/// Initialize params (host -> extension)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub capabilities: ClientCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DecorationProviderOptions {
    /// Decorations do not depend on registrations; the host installs a
    /// provider for every document on its own
    #[serde(rename = "static", default)]
    pub is_static: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ExecuteCommandOptions {
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Extension capabilities (from initialize result)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover_provider: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration_provider: Option<DecorationProviderOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_command_provider: Option<ExecuteCommandOptions>,
}

impl ServerCapabilities {
    pub fn has_static_decorations(&self) -> bool {
        self.decoration_provider
            .map(|options| options.is_static)
            .unwrap_or(false)
    }
}

/// Initialize result
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

// ============================================================================
// Document Request Types
// ============================================================================

/// Text document identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

impl TextDocumentIdentifier {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Text document position params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    /// Routes the request to one provider inside the extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
}

impl TextDocumentPositionParams {
    pub fn new(uri: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            text_document: TextDocumentIdentifier::new(uri),
            position: Position::new(line, character),
            registration_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentDecorationParams {
    pub text_document: TextDocumentIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
}

impl TextDocumentDecorationParams {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            text_document: TextDocumentIdentifier::new(uri),
            registration_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteCommandParams {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenTextDocumentParams {
    pub text_document: TextDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidChangeConfigurationParams {
    pub settings: Value,
}

/// Replaces the extension's copy of the host context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidChangeContextParams {
    pub context: Value,
}

// ============================================================================
// Registration Types
// ============================================================================

/// Capabilities an extension can register providers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Hover,
    Decoration,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCapabilityParams {
    pub id: String,
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "DocumentSelector::is_empty")]
    pub selector: DocumentSelector,
    /// Command name, for `Capability::Command`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterCapabilityParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}

// ============================================================================
// Logging Types
// ============================================================================

/// Message type of `window/logMessage` (integer on the wire)
#[derive(Debug, Clone, Copy, Serialize_repr, Deserialize_repr, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Error = 1,
    Warning = 2,
    Info = 3,
    Log = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessageParams {
    #[serde(rename = "type")]
    pub typ: MessageType,
    pub message: String,
}

// ============================================================================
// Tests
// ============================================================================
