//! Extension side: the registration API and the built-in samples

pub mod host;
pub mod samples;

pub use host::{ExtensionHost, ProviderRegistration, create_extension_host};
