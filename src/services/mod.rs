//! Service layer for exthost

pub mod config;

pub use config::{ConfigService, DefaultConfigService};
