//! exthost - Extension Host Library
//!
//! A host talks JSON-RPC with sandboxed extensions. Extensions register
//! hover, decoration and command providers against document selectors; the
//! host routes queries to every matching provider and merges the results.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod extension;
pub mod host;
pub mod infra;
pub mod models;
pub mod registry;
pub mod services;

pub use error::{HostError, HostResult};
