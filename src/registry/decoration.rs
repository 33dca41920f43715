//! Decoration provider registry

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::{ProviderRegistry, Unsubscribe};
use crate::error::ProviderError;
use crate::infra::rpc::protocol::TextDocumentDecorationParams;
use crate::models::{DocumentSelector, TextDocument, TextDocumentDecoration};

#[async_trait]
pub trait DecorationProvider: Send + Sync {
    async fn provide_decorations(
        &self,
        document: &TextDocument,
        params: &TextDocumentDecorationParams,
    ) -> Result<Option<Vec<TextDocumentDecoration>>, ProviderError>;
}

#[async_trait]
impl<F, Fut> DecorationProvider for F
where
    F: Fn(TextDocument, TextDocumentDecorationParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Vec<TextDocumentDecoration>>, ProviderError>>
        + Send
        + 'static,
{
    async fn provide_decorations(
        &self,
        document: &TextDocument,
        params: &TextDocumentDecorationParams,
    ) -> Result<Option<Vec<TextDocumentDecoration>>, ProviderError> {
        self(document.clone(), params.clone()).await
    }
}

#[derive(Clone, Default)]
pub struct DecorationProviderRegistry {
    registry: ProviderRegistry<dyn DecorationProvider>,
}

impl DecorationProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        selector: DocumentSelector,
        provider: Arc<dyn DecorationProvider>,
    ) -> Unsubscribe {
        self.registry.register(selector, provider).await
    }

    pub async fn remove(&self, id: u64) -> bool {
        self.registry.remove(id).await
    }

    pub async fn len(&self) -> usize {
        self.registry.len().await
    }

    /// Concatenate every matching provider's decorations in registration
    /// order. Failed providers contribute nothing.
    pub async fn get_decorations(
        &self,
        document: &TextDocument,
        params: &TextDocumentDecorationParams,
    ) -> Vec<TextDocumentDecoration> {
        let providers = self.registry.query(document).await;

        let results = join_all(providers.iter().map(|(id, provider)| async move {
            (*id, provider.provide_decorations(document, params).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(decorations) => decorations,
                Err(e) => {
                    tracing::warn!("Decoration provider {} failed: {}", id, e);
                    None
                }
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lines(color: &'static str, lines: &'static [u32], delay_ms: u64) -> Arc<dyn DecorationProvider> {
        Arc::new(move |_: TextDocument, _: TextDocumentDecorationParams| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, ProviderError>(Some(
                lines
                    .iter()
                    .map(|line| TextDocumentDecoration::whole_line(*line, color))
                    .collect(),
            ))
        })
    }

    #[tokio::test]
    async fn test_concatenates_in_registration_order() {
        let registry = DecorationProviderRegistry::new();
        registry
            .register(DocumentSelector::all(), lines("red", &[0, 1], 20))
            .await;
        registry
            .register(DocumentSelector::language("rust"), lines("blue", &[2], 0))
            .await;

        let doc = TextDocument::new("file:///a.rs", "rust", "");
        let params = TextDocumentDecorationParams::new("file:///a.rs");
        let colors: Vec<_> = registry
            .get_decorations(&doc, &params)
            .await
            .into_iter()
            .map(|d| d.background_color.unwrap_or_default())
            .collect();
        assert_eq!(colors, ["red", "red", "blue"]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let registry = DecorationProviderRegistry::new();
        let failing: Arc<dyn DecorationProvider> =
            Arc::new(|_: TextDocument, _: TextDocumentDecorationParams| async {
                Err::<Option<Vec<TextDocumentDecoration>>, _>(ProviderError::failed("boom"))
            });
        registry.register(DocumentSelector::all(), failing).await;
        registry
            .register(DocumentSelector::all(), lines("green", &[3], 0))
            .await;

        let doc = TextDocument::from_uri("file:///f");
        let params = TextDocumentDecorationParams::new("file:///f");
        let decorations = registry.get_decorations(&doc, &params).await;
        assert_eq!(decorations, vec![TextDocumentDecoration::whole_line(3, "green")]);
    }

    #[tokio::test]
    async fn test_no_providers_is_empty() {
        let registry = DecorationProviderRegistry::new();
        let doc = TextDocument::from_uri("file:///f");
        let params = TextDocumentDecorationParams::new("file:///f");
        assert!(registry.get_decorations(&doc, &params).await.is_empty());
    }
}
