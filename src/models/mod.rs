//! Data models for exthost
//!
//! Wire and configuration types shared by the host and extension sides.

pub mod config;
pub mod document;
pub mod environment;
pub mod lsp;

// Re-export commonly used types
pub use config::ExtHostConfig;
pub use document::{DocumentFilter, DocumentPattern, DocumentSelector, GlobPattern, TextDocument};
pub use environment::{Component, Environment, ExtensionDescriptor};
pub use lsp::{
    Hover, HoverContents, HoverMerged, MarkupContent, MarkupKind, Position, Range,
    TextDocumentDecoration,
};
