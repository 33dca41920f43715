//! Hover provider registry and merge

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::{ProviderRegistry, Unsubscribe};
use crate::error::ProviderError;
use crate::infra::rpc::protocol::TextDocumentPositionParams;
use crate::models::{DocumentSelector, Hover, HoverMerged, TextDocument};

#[async_trait]
pub trait HoverProvider: Send + Sync {
    async fn provide_hover(
        &self,
        document: &TextDocument,
        params: &TextDocumentPositionParams,
    ) -> Result<Option<Hover>, ProviderError>;
}

#[async_trait]
impl<F, Fut> HoverProvider for F
where
    F: Fn(TextDocument, TextDocumentPositionParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Hover>, ProviderError>> + Send + 'static,
{
    async fn provide_hover(
        &self,
        document: &TextDocument,
        params: &TextDocumentPositionParams,
    ) -> Result<Option<Hover>, ProviderError> {
        self(document.clone(), params.clone()).await
    }
}

/// How results from several matching providers are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoverMode {
    /// First non-null result in registration order
    #[default]
    First,
    /// Contents of every non-null result, in registration order
    Merge,
}

#[derive(Clone, Default)]
pub struct HoverProviderRegistry {
    registry: ProviderRegistry<dyn HoverProvider>,
}

impl HoverProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        selector: DocumentSelector,
        provider: Arc<dyn HoverProvider>,
    ) -> Unsubscribe {
        self.registry.register(selector, provider).await
    }

    pub async fn remove(&self, id: u64) -> bool {
        self.registry.remove(id).await
    }

    pub async fn len(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.is_empty().await
    }

    /// Query every matching provider concurrently. Failed providers are
    /// logged and skipped; `None` when nothing produced a hover.
    pub async fn get_hover(
        &self,
        document: &TextDocument,
        params: &TextDocumentPositionParams,
        mode: HoverMode,
    ) -> Option<HoverMerged> {
        let providers = self.registry.query(document).await;
        if providers.is_empty() {
            return None;
        }

        tracing::debug!(
            "Querying {} hover providers for {}",
            providers.len(),
            document.uri
        );

        let results = join_all(providers.iter().map(|(id, provider)| async move {
            (*id, provider.provide_hover(document, params).await)
        }))
        .await;

        let mut hovers = results.into_iter().filter_map(|(id, result)| match result {
            Ok(hover) => hover,
            Err(e) => {
                tracing::warn!("Hover provider {} failed: {}", id, e);
                None
            }
        });

        match mode {
            HoverMode::First => HoverMerged::from_hovers(hovers.next()),
            HoverMode::Merge => HoverMerged::from_hovers(hovers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarkupContent, Position, Range};
    use std::time::Duration;

    fn fixed(value: &'static str) -> Arc<dyn HoverProvider> {
        Arc::new(move |_: TextDocument, _: TextDocumentPositionParams| async move {
            Ok::<_, ProviderError>(Some(Hover::new(MarkupContent::new(value))))
        })
    }

    fn delayed(value: &'static str, millis: u64) -> Arc<dyn HoverProvider> {
        Arc::new(move |_: TextDocument, _: TextDocumentPositionParams| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, ProviderError>(Some(Hover::new(MarkupContent::new(value))))
        })
    }

    fn failing() -> Arc<dyn HoverProvider> {
        Arc::new(|_: TextDocument, _: TextDocumentPositionParams| async {
            Err::<Option<Hover>, _>(ProviderError::failed("boom"))
        })
    }

    fn empty() -> Arc<dyn HoverProvider> {
        Arc::new(|_: TextDocument, _: TextDocumentPositionParams| async { Ok::<Option<Hover>, ProviderError>(None) })
    }

    fn values(merged: &HoverMerged) -> Vec<&str> {
        merged.contents.iter().map(|c| c.value.as_str()).collect()
    }

    fn request() -> (TextDocument, TextDocumentPositionParams) {
        (
            TextDocument::from_uri("file:///f"),
            TextDocumentPositionParams::new("file:///f", 1, 2),
        )
    }

    #[tokio::test]
    async fn test_register_query_unsubscribe() {
        let registry = HoverProviderRegistry::new();
        let (doc, params) = request();
        let token = registry.register(DocumentSelector::all(), fixed("a")).await;

        let merged = registry
            .get_hover(&doc, &params, HoverMode::First)
            .await
            .unwrap();
        assert_eq!(values(&merged), ["a"]);
        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            serde_json::json!({ "contents": [{ "value": "a" }] })
        );

        token.unsubscribe().await;
        assert!(registry.get_hover(&doc, &params, HoverMode::First).await.is_none());
    }

    #[tokio::test]
    async fn test_merge_order_follows_registration_not_latency() {
        let registry = HoverProviderRegistry::new();
        let (doc, params) = request();
        registry.register(DocumentSelector::all(), delayed("slow", 30)).await;
        registry.register(DocumentSelector::all(), delayed("fast", 1)).await;

        let merged = registry
            .get_hover(&doc, &params, HoverMode::Merge)
            .await
            .unwrap();
        assert_eq!(values(&merged), ["slow", "fast"]);

        let first = registry
            .get_hover(&doc, &params, HoverMode::First)
            .await
            .unwrap();
        assert_eq!(values(&first), ["slow"]);
    }

    #[tokio::test]
    async fn test_failures_and_nulls_are_skipped() {
        let registry = HoverProviderRegistry::new();
        let (doc, params) = request();
        registry.register(DocumentSelector::all(), failing()).await;
        registry.register(DocumentSelector::all(), empty()).await;
        registry.register(DocumentSelector::all(), fixed("ok")).await;

        let merged = registry
            .get_hover(&doc, &params, HoverMode::First)
            .await
            .unwrap();
        assert_eq!(values(&merged), ["ok"]);
    }

    #[tokio::test]
    async fn test_only_failures_is_none() {
        let registry = HoverProviderRegistry::new();
        let (doc, params) = request();
        registry.register(DocumentSelector::all(), failing()).await;
        registry.register(DocumentSelector::all(), empty()).await;

        assert!(registry.get_hover(&doc, &params, HoverMode::Merge).await.is_none());
    }

    #[tokio::test]
    async fn test_range_taken_from_first_result() {
        let registry = HoverProviderRegistry::new();
        let (doc, params) = request();
        let ranged: Arc<dyn HoverProvider> =
            Arc::new(|_: TextDocument, _: TextDocumentPositionParams| async {
                let mut hover = Hover::new(MarkupContent::new("r"));
                hover.range = Some(Range::new(Position::new(1, 0), Position::new(1, 4)));
                Ok::<_, ProviderError>(Some(hover))
            });
        registry.register(DocumentSelector::all(), ranged).await;
        registry.register(DocumentSelector::all(), fixed("x")).await;

        let merged = registry
            .get_hover(&doc, &params, HoverMode::Merge)
            .await
            .unwrap();
        assert_eq!(values(&merged), ["r", "x"]);
        assert_eq!(merged.range.map(|r| r.end.character), Some(4));
    }
}
