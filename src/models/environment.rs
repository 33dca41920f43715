//! Host-side environment snapshot
//!
//! An [`Environment`] is immutable once published; updates replace the
//! whole snapshot so readers never see a half-applied change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::TextDocument;

/// An extension the host should keep a client for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub id: String,
}

impl ExtensionDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The visible component (editor) and its document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub document: TextDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub component: Option<Component>,
    #[serde(default)]
    pub extensions: Vec<ExtensionDescriptor>,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub context: Value,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            component: None,
            extensions: Vec::new(),
            configuration: Value::Object(Default::default()),
            context: Value::Object(Default::default()),
        }
    }
}

impl Environment {
    pub fn with_document(document: TextDocument) -> Self {
        Self {
            component: Some(Component { document }),
            ..Default::default()
        }
    }

    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = ExtensionDescriptor>) -> Self {
        self.extensions = extensions.into_iter().collect();
        self
    }

    pub fn document(&self) -> Option<&TextDocument> {
        self.component.as_ref().map(|c| &c.document)
    }

    /// Best known descriptor for `uri`: the active document when it matches,
    /// otherwise a uri-only descriptor
    pub fn resolve_document(&self, uri: &str) -> TextDocument {
        self.document()
            .filter(|doc| doc.uri == uri)
            .cloned()
            .unwrap_or_else(|| TextDocument::from_uri(uri))
    }

    pub fn has_extension(&self, id: &str) -> bool {
        self.extensions.iter().any(|e| e.id == id)
    }
}
