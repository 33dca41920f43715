//! Provider Result Types
//!
//! Wire shapes shared by host and extension: positions, hovers and
//! decorations. Field names follow the LSP conventions (camelCase).

use serde::{Deserialize, Serialize};

// ============================================================================
// Core Types
// ============================================================================

/// Position within a document (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Range within a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Zero-width range at the start of a line
    pub fn line(line: u32) -> Self {
        let pos = Position::new(line, 0);
        Self {
            start: pos,
            end: pos,
        }
    }
}

// ============================================================================
// Hover Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupKind {
    Plaintext,
    Markdown,
}

/// Markup content; `kind` is optional on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MarkupKind>,
    pub value: String,
}

impl MarkupContent {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            kind: None,
            value: value.into(),
        }
    }

    pub fn markdown(value: impl Into<String>) -> Self {
        Self {
            kind: Some(MarkupKind::Markdown),
            value: value.into(),
        }
    }
}

/// Hover contents as returned by a single provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HoverContents {
    Plain(String),
    Markup(MarkupContent),
    Many(Vec<MarkupContent>),
}

impl HoverContents {
    fn into_vec(self) -> Vec<MarkupContent> {
        match self {
            Self::Plain(value) => vec![MarkupContent::new(value)],
            Self::Markup(content) => vec![content],
            Self::Many(contents) => contents,
        }
    }
}

/// Hover result of a single provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hover {
    pub contents: HoverContents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl Hover {
    pub fn new(contents: MarkupContent) -> Self {
        Self {
            contents: HoverContents::Markup(contents),
            range: None,
        }
    }
}

/// Hover results of one or more providers, contents flattened in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverMerged {
    pub contents: Vec<MarkupContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl HoverMerged {
    /// Merge hovers in the given order. The first range wins.
    ///
    /// Returns `None` when there is nothing to show, so an empty match set
    /// and a set of empty hovers both read as "no hover".
    pub fn from_hovers(hovers: impl IntoIterator<Item = Hover>) -> Option<Self> {
        let mut contents = Vec::new();
        let mut range = None;
        for hover in hovers {
            if range.is_none() {
                range = hover.range;
            }
            contents.extend(hover.contents.into_vec());
        }
        if contents.is_empty() {
            None
        } else {
            Some(Self { contents, range })
        }
    }
}

// ============================================================================
// Decoration Types
// ============================================================================

/// A decoration applied to a range of a text document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentDecoration {
    pub range: Range,
    #[serde(default)]
    pub is_whole_line: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

impl TextDocumentDecoration {
    pub fn whole_line(line: u32, background_color: impl Into<String>) -> Self {
        Self {
            range: Range::line(line),
            is_whole_line: true,
            background_color: Some(background_color.into()),
        }
    }
}
