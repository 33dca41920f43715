//! Configuration model for exthost
//!
//! Mirrors `config.toml`. Every field has a default so partial files load.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExtHostConfig {
    #[serde(default)]
    pub host: HostSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Host-side protocol settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSettings {
    /// Default bound for host-to-extension requests; 0 disables it
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "defaults::initialize_timeout_secs")]
    pub initialize_timeout_secs: u64,

    #[serde(default = "defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Merge every matching hover provider instead of taking the first
    #[serde(default)]
    pub merge_hover_providers: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: defaults::request_timeout_secs(),
            initialize_timeout_secs: defaults::initialize_timeout_secs(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
            merge_hover_providers: false,
        }
    }
}

/// How extensions are reached
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TransportSettings {
    /// Run the built-in extensions as tasks of the host process over
    /// memory transports instead of spawning `exthost extension <id>`
    #[serde(default)]
    pub in_process: bool,

    /// Delay applied to every in-process message
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "defaults::pretty")]
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pretty: defaults::pretty(),
        }
    }
}

mod defaults {
    pub fn request_timeout_secs() -> u64 {
        30
    }
    pub fn initialize_timeout_secs() -> u64 {
        10
    }
    pub fn shutdown_timeout_secs() -> u64 {
        2
    }
    pub fn pretty() -> bool {
        true
    }
}
