//! Command implementations for exthost
//!
//! Each command is implemented in its own module.

pub mod config;
pub mod decorations;
pub mod exec;
pub mod extension;
pub mod hover;

use clap::Args;

use crate::models::{Environment, ExtensionDescriptor, TextDocument};

/// Document and extensions a host command runs against
#[derive(Args, Debug, Clone)]
pub struct DocumentArgs {
    /// Document URI (e.g. file:///src/main.rs)
    #[arg(long)]
    pub uri: String,

    /// Language id of the document
    #[arg(long)]
    pub language: Option<String>,

    /// Extension to start (repeatable); defaults depend on the command
    #[arg(long = "extension", short = 'e')]
    pub extensions: Vec<String>,
}

impl DocumentArgs {
    pub fn extensions_or(&self, defaults: &[&str]) -> Vec<String> {
        if self.extensions.is_empty() {
            defaults.iter().map(|s| s.to_string()).collect()
        } else {
            self.extensions.clone()
        }
    }

    /// Environment with this document active and the given extensions
    pub fn environment(&self, defaults: &[&str]) -> Environment {
        let document = TextDocument {
            uri: self.uri.clone(),
            language_id: self.language.clone(),
            text: None,
        };
        Environment::with_document(document).with_extensions(
            self.extensions_or(defaults)
                .into_iter()
                .map(ExtensionDescriptor::new),
        )
    }
}
