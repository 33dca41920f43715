//! Runtime host configuration
//!
//! Built from [`ExtHostConfig`] and handed to the controller explicitly;
//! nothing here is process-global.

use std::time::Duration;

use crate::infra::rpc::ConnectionOptions;
use crate::models::config::ExtHostConfig;
use crate::registry::HoverMode;

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Default bound for host-to-extension requests; `None` waits forever
    pub request_timeout: Option<Duration>,
    pub initialize_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub hover_mode: HoverMode,
    /// Run built-in extensions in-process instead of as child processes
    pub in_process: bool,
    /// Artificial delay of in-process transports
    pub transport_latency: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from(&ExtHostConfig::default())
    }
}

impl From<&ExtHostConfig> for HostConfig {
    fn from(config: &ExtHostConfig) -> Self {
        let host = &config.host;
        Self {
            request_timeout: (host.request_timeout_secs > 0)
                .then(|| Duration::from_secs(host.request_timeout_secs)),
            initialize_timeout: Duration::from_secs(host.initialize_timeout_secs),
            shutdown_timeout: Duration::from_secs(host.shutdown_timeout_secs),
            hover_mode: if host.merge_hover_providers {
                HoverMode::Merge
            } else {
                HoverMode::First
            },
            in_process: config.transport.in_process,
            transport_latency: Duration::from_millis(config.transport.latency_ms),
        }
    }
}

impl HostConfig {
    pub fn with_hover_mode(mut self, mode: HoverMode) -> Self {
        self.hover_mode = mode;
        self
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: self.request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.initialize_timeout, Duration::from_secs(10));
        assert_eq!(config.hover_mode, HoverMode::First);
        assert!(!config.in_process);
        assert!(config.transport_latency.is_zero());
    }

    #[test]
    fn test_zero_timeout_disables_bound() {
        let mut raw = ExtHostConfig::default();
        raw.host.request_timeout_secs = 0;
        raw.host.merge_hover_providers = true;
        raw.transport.in_process = true;
        raw.transport.latency_ms = 15;

        let config = HostConfig::from(&raw);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.hover_mode, HoverMode::Merge);
        assert!(config.in_process);
        assert_eq!(config.transport_latency, Duration::from_millis(15));
        assert_eq!(config.connection_options().request_timeout, None);
    }
}
