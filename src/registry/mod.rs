//! Provider registries
//!
//! One registry per capability. A registry is an insertion-ordered list of
//! `(id, selector, provider)` entries; queries return matches in that order.
//! Registration hands back an [`Unsubscribe`] token that removes exactly
//! its own entry, once.

pub mod command;
pub mod decoration;
pub mod hover;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{DocumentSelector, TextDocument};

pub use command::{CommandHandler, CommandRegistry};
pub use decoration::{DecorationProvider, DecorationProviderRegistry};
pub use hover::{HoverMode, HoverProvider, HoverProviderRegistry};

/// Anything an [`Unsubscribe`] token can release an entry from
#[async_trait]
pub(crate) trait RegistrationStore: Send + Sync {
    async fn remove(&self, id: u64) -> bool;
}

/// Releases one registration. Calling [`Unsubscribe::unsubscribe`] more
/// than once, or after the registry is gone, does nothing.
pub struct Unsubscribe {
    id: u64,
    store: Weak<dyn RegistrationStore>,
    released: AtomicBool,
}

impl Unsubscribe {
    pub(crate) fn new(id: u64, store: Weak<dyn RegistrationStore>) -> Self {
        Self {
            id,
            store,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns whether this call removed the entry
    pub async fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.store.upgrade() {
            Some(store) => store.remove(self.id).await,
            None => false,
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

struct Registration<P: ?Sized> {
    id: u64,
    selector: DocumentSelector,
    provider: Arc<P>,
}

struct Entries<P: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<Registration<P>>>,
}

#[async_trait]
impl<P: ?Sized + Send + Sync + 'static> RegistrationStore for Entries<P> {
    async fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        before != entries.len()
    }
}

/// Selector-keyed registry over a provider trait object
pub struct ProviderRegistry<P: ?Sized> {
    inner: Arc<Entries<P>>,
}

impl<P: ?Sized> Clone for ProviderRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ?Sized + Send + Sync + 'static> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ?Sized + Send + Sync + 'static> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Entries {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    pub async fn register(&self, selector: DocumentSelector, provider: Arc<P>) -> Unsubscribe {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.write().await.push(Registration {
            id,
            selector,
            provider,
        });

        let store: Arc<dyn RegistrationStore> = self.inner.clone();
        Unsubscribe::new(id, Arc::downgrade(&store))
    }

    /// Idempotent; returns whether an entry was removed
    pub async fn remove(&self, id: u64) -> bool {
        self.inner.remove(id).await
    }

    /// Matching providers in registration order
    pub async fn query(&self, document: &TextDocument) -> Vec<(u64, Arc<P>)> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.selector.matches(document))
            .map(|entry| (entry.id, Arc::clone(&entry.provider)))
            .collect()
    }

    pub async fn ids(&self) -> Vec<u64> {
        self.inner
            .entries
            .read()
            .await
            .iter()
            .map(|entry| entry.id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// The host's registries, one per capability
#[derive(Clone, Default)]
pub struct Registries {
    pub hover: HoverProviderRegistry,
    pub decoration: DecorationProviderRegistry,
    pub command: CommandRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }
}
