//! Documents and document selectors
//!
//! A selector is matched against a document, never the reverse. A selector
//! matches when any of its filters matches.

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use url::Url;

pub const WILDCARD: &str = "*";

/// Document descriptor; partial subsets (uri only) are valid for addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocument {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TextDocument {
    pub fn new(uri: impl Into<String>, language_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language_id: Some(language_id.into()),
            text: Some(text.into()),
        }
    }

    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language_id: None,
            text: None,
        }
    }
}

/// Glob over a document URI, compiled once. `*` stays within one path
/// segment; `**` crosses segments. An invalid glob matches nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct GlobPattern {
    source: String,
    matcher: Option<GlobMatcher>,
}

impl GlobPattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let matcher = match GlobBuilder::new(&source).literal_separator(true).build() {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                tracing::warn!("Invalid document pattern '{}': {}", source, e);
                None
            }
        };
        Self { source, matcher }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(candidate))
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

impl From<String> for GlobPattern {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl From<&str> for GlobPattern {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<GlobPattern> for String {
    fn from(pattern: GlobPattern) -> Self {
        pattern.source
    }
}

/// Structured filter; every present field must match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Glob over the URI path (or the whole URI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<GlobPattern>,
}

impl DocumentPattern {
    fn matches(&self, document: &TextDocument) -> bool {
        if self.language.is_none() && self.scheme.is_none() && self.pattern.is_none() {
            return false;
        }

        if let Some(language) = &self.language
            && language != WILDCARD
            && document.language_id.as_deref() != Some(language.as_str())
        {
            return false;
        }

        let parsed = Url::parse(&document.uri).ok();

        if let Some(scheme) = &self.scheme
            && parsed.as_ref().map(|u| u.scheme()) != Some(scheme.as_str())
        {
            return false;
        }

        if let Some(pattern) = &self.pattern {
            let path_matches = parsed
                .as_ref()
                .is_some_and(|u| pattern.is_match(u.path()));
            if !path_matches && !pattern.is_match(&document.uri) {
                return false;
            }
        }

        true
    }
}

/// One entry of a selector: a bare language id (or `*`), or a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentFilter {
    Language(String),
    Pattern(DocumentPattern),
}

impl DocumentFilter {
    pub fn matches(&self, document: &TextDocument) -> bool {
        match self {
            Self::Language(language) if language == WILDCARD => true,
            Self::Language(language) => document.language_id.as_deref() == Some(language.as_str()),
            Self::Pattern(pattern) => pattern.matches(document),
        }
    }
}

/// Ordered set of filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DocumentSelector(pub Vec<DocumentFilter>);

impl DocumentSelector {
    /// Selector matching every document
    pub fn all() -> Self {
        Self(vec![DocumentFilter::Language(WILDCARD.to_string())])
    }

    pub fn language(language: impl Into<String>) -> Self {
        Self(vec![DocumentFilter::Language(language.into())])
    }

    pub fn pattern(pattern: DocumentPattern) -> Self {
        Self(vec![DocumentFilter::Pattern(pattern)])
    }

    pub fn matches(&self, document: &TextDocument) -> bool {
        self.0.iter().any(|filter| filter.matches(document))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DocumentSelector {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| DocumentFilter::Language(s.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rust_doc() -> TextDocument {
        TextDocument::new("file:///src/main.rs", "rust", "fn main() {}")
    }

    #[test]
    fn test_wildcard_matches_uri_only_document() {
        assert!(DocumentSelector::all().matches(&TextDocument::from_uri("file:///f")));
    }

    #[test]
    fn test_language_filter() {
        assert!(DocumentSelector::language("rust").matches(&rust_doc()));
        assert!(!DocumentSelector::language("go").matches(&rust_doc()));
        assert!(!DocumentSelector::language("rust").matches(&TextDocument::from_uri("file:///f")));
    }

    #[test]
    fn test_any_filter_matches() {
        let selector: DocumentSelector = ["go", "rust"].into_iter().collect();
        assert!(selector.matches(&rust_doc()));
        let selector: DocumentSelector = ["go", "python"].into_iter().collect();
        assert!(!selector.matches(&rust_doc()));
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        assert!(!DocumentSelector::default().matches(&rust_doc()));
        assert!(!DocumentSelector::pattern(DocumentPattern::default()).matches(&rust_doc()));
    }

    #[test]
    fn test_pattern_filter() {
        let by_glob = DocumentSelector::pattern(DocumentPattern {
            pattern: Some("**/*.rs".into()),
            ..Default::default()
        });
        assert!(by_glob.matches(&rust_doc()));
        assert!(!by_glob.matches(&TextDocument::from_uri("file:///src/main.go")));

        let by_scheme = DocumentSelector::pattern(DocumentPattern {
            scheme: Some("git".to_string()),
            ..Default::default()
        });
        assert!(!by_scheme.matches(&rust_doc()));
        assert!(by_scheme.matches(&TextDocument::from_uri("git://host/repo/main.rs")));
    }

    #[test]
    fn test_pattern_fields_are_conjunctive() {
        let selector = DocumentSelector::pattern(DocumentPattern {
            language: Some("rust".to_string()),
            scheme: Some("file".to_string()),
            pattern: Some("/src/**".into()),
        });
        assert!(selector.matches(&rust_doc()));

        let mut other_language = rust_doc();
        other_language.language_id = Some("toml".to_string());
        assert!(!selector.matches(&other_language));
    }

    #[test]
    fn test_star_stays_within_segment() {
        let selector = DocumentSelector::pattern(DocumentPattern {
            pattern: Some("/src/*.rs".into()),
            ..Default::default()
        });
        assert!(selector.matches(&rust_doc()));
        assert!(!selector.matches(&TextDocument::from_uri("file:///src/a/b.rs")));

        let nested = DocumentSelector::pattern(DocumentPattern {
            pattern: Some("/src/**/*.rs".into()),
            ..Default::default()
        });
        assert!(nested.matches(&TextDocument::from_uri("file:///src/a/b.rs")));
    }

    #[test]
    fn test_invalid_glob_matches_nothing() {
        let pattern = GlobPattern::new("[unclosed");
        assert_eq!(pattern.as_str(), "[unclosed");
        assert!(!pattern.is_match("[unclosed"));
        assert!(!pattern.is_match("/src/main.rs"));
    }

    #[test]
    fn test_selector_wire_format() {
        let selector: DocumentSelector =
            serde_json::from_str(r#"["*", {"language": "rust", "pattern": "**/*.rs"}]"#).unwrap();
        assert_eq!(selector.0.len(), 2);
        assert_eq!(selector.0[0], DocumentFilter::Language("*".to_string()));
        assert!(matches!(&selector.0[1], DocumentFilter::Pattern(p) if p.language.as_deref() == Some("rust")));
        assert_eq!(
            serde_json::to_value(&selector).unwrap(),
            serde_json::json!(["*", { "language": "rust", "pattern": "**/*.rs" }])
        );
    }
}
