//! Command registry, keyed by command name

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{RegistrationStore, Unsubscribe};
use crate::error::{ProviderError, RegistryError};

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, arguments: Vec<Value>) -> Result<Value, ProviderError>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
{
    async fn execute(&self, arguments: Vec<Value>) -> Result<Value, ProviderError> {
        self(arguments).await
    }
}

struct CommandEntry {
    id: u64,
    handler: Arc<dyn CommandHandler>,
}

struct Commands {
    next_id: AtomicU64,
    entries: RwLock<HashMap<String, CommandEntry>>,
}

#[async_trait]
impl RegistrationStore for Commands {
    async fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.id != id);
        before != entries.len()
    }
}

#[derive(Clone)]
pub struct CommandRegistry {
    inner: Arc<Commands>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Commands {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// At most one handler per command name
    pub async fn register(
        &self,
        command: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Unsubscribe, RegistryError> {
        let command = command.into();
        let mut entries = self.inner.entries.write().await;
        if entries.contains_key(&command) {
            return Err(RegistryError::DuplicateRegistration(command));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(command, CommandEntry { id, handler });

        let store: Arc<dyn RegistrationStore> = self.inner.clone();
        Ok(Unsubscribe::new(id, Arc::downgrade(&store)))
    }

    pub async fn remove(&self, id: u64) -> bool {
        self.inner.remove(id).await
    }

    pub async fn execute(&self, command: &str, arguments: Vec<Value>) -> Result<Value, RegistryError> {
        let handler = self
            .inner
            .entries
            .read()
            .await
            .get(command)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| RegistryError::UnknownCommand(command.to_string()))?;

        tracing::debug!("Executing command {}", command);
        Ok(handler.execute(arguments).await?)
    }

    /// Registered command names, sorted
    pub async fn commands(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
