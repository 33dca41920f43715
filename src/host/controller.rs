//! Host controller
//!
//! Owns the environment snapshot, the registries and one client per listed
//! extension. Replacing the environment reconciles the clients against it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, watch};

use super::client::Client;
use crate::config::HostConfig;
use crate::error::{ClientError, HostResult};
use crate::extension::samples;
use crate::infra::rpc::MessageTransports;
use crate::infra::rpc::transport::memory;
use crate::infra::rpc::protocol::{TextDocumentDecorationParams, TextDocumentPositionParams};
use crate::models::{Environment, ExtensionDescriptor, HoverMerged, TextDocumentDecoration};
use crate::registry::Registries;

/// Opens the transports for an extension
pub trait TransportFactory: Send + Sync {
    fn connect(&self, extension: &ExtensionDescriptor) -> Result<MessageTransports, ClientError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&ExtensionDescriptor) -> Result<MessageTransports, ClientError> + Send + Sync,
{
    fn connect(&self, extension: &ExtensionDescriptor) -> Result<MessageTransports, ClientError> {
        self(extension)
    }
}

/// Runs `program [args..] <extension id>` with the wire protocol on stdio
pub struct ProcessTransportFactory {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessTransportFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TransportFactory for ProcessTransportFactory {
    fn connect(&self, extension: &ExtensionDescriptor) -> Result<MessageTransports, ClientError> {
        let mut args = self.args.clone();
        args.push(extension.id.clone());
        MessageTransports::spawn(&self.program.to_string_lossy(), &args).map_err(|e| {
            ClientError::Start {
                extension: extension.id.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Runs the built-in extensions as tasks of this process, over memory
/// transports delayed by `latency`
pub struct InProcessTransportFactory {
    latency: Duration,
}

impl InProcessTransportFactory {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl TransportFactory for InProcessTransportFactory {
    fn connect(&self, extension: &ExtensionDescriptor) -> Result<MessageTransports, ClientError> {
        if !samples::SAMPLES.contains(&extension.id.as_str()) {
            return Err(ClientError::Start {
                extension: extension.id.clone(),
                reason: format!(
                    "no built-in extension (available: {})",
                    samples::SAMPLES.join(", ")
                ),
            });
        }

        let (host, remote) = memory::pair(self.latency);
        let name = extension.id.clone();
        tokio::spawn(async move {
            if let Err(e) = samples::run(&name, remote).await {
                tracing::warn!("Extension '{}' stopped: {}", name, e);
            }
        });
        Ok(host)
    }
}

#[derive(Clone)]
pub struct ClientEntry {
    pub extension: ExtensionDescriptor,
    pub client: Arc<Client>,
}

pub struct Controller {
    environment: watch::Sender<Arc<Environment>>,
    entries: watch::Sender<Vec<ClientEntry>>,
    registries: Registries,
    factory: Arc<dyn TransportFactory>,
    config: HostConfig,
    /// Serializes reconciliation
    reconcile: Mutex<()>,
}

impl Controller {
    pub fn new(factory: Arc<dyn TransportFactory>, config: HostConfig) -> Self {
        let (environment, _) = watch::channel(Arc::new(Environment::default()));
        let (entries, _) = watch::channel(Vec::new());
        Self {
            environment,
            entries,
            registries: Registries::new(),
            factory,
            config,
            reconcile: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn environment(&self) -> Arc<Environment> {
        self.environment.borrow().clone()
    }

    pub fn subscribe_environment(&self) -> watch::Receiver<Arc<Environment>> {
        self.environment.subscribe()
    }

    pub fn client_entries(&self) -> Vec<ClientEntry> {
        self.entries.borrow().clone()
    }

    pub fn subscribe_client_entries(&self) -> watch::Receiver<Vec<ClientEntry>> {
        self.entries.subscribe()
    }

    /// Replace the environment and reconcile clients against it: start
    /// clients for new extensions, tear down clients for removed ones and
    /// resync the rest. Fails with the first client that could not start;
    /// the others are still reconciled.
    pub async fn set_environment(&self, environment: Environment) -> HostResult<()> {
        let _guard = self.reconcile.lock().await;

        let environment = Arc::new(environment);
        self.environment.send_replace(Arc::clone(&environment));

        let current = self.client_entries();
        let (kept, removed): (Vec<_>, Vec<_>) = current
            .into_iter()
            .partition(|entry| environment.has_extension(&entry.extension.id));

        let mut entries = kept.clone();
        let mut first_error = None;
        for extension in &environment.extensions {
            if entries.iter().any(|e| e.extension.id == extension.id) {
                continue;
            }
            match self.factory.connect(extension) {
                Ok(transports) => {
                    tracing::info!("Starting extension '{}'", extension.id);
                    let client = Client::start(
                        extension.clone(),
                        transports,
                        self.registries.clone(),
                        self.environment.subscribe(),
                        self.config.clone(),
                    )
                    .await;
                    entries.push(ClientEntry {
                        extension: extension.clone(),
                        client,
                    });
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.entries.send_replace(entries);

        join_all(removed.iter().map(|entry| {
            tracing::info!("Stopping extension '{}'", entry.extension.id);
            entry.client.shutdown()
        }))
        .await;

        for entry in &kept {
            if let Err(e) = entry.client.push_environment().await {
                tracing::warn!(
                    "Failed to resync extension '{}': {}",
                    entry.extension.id,
                    e
                );
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Wait until every current client is active. Fails if any closes first.
    pub async fn wait_for_active_clients(&self) -> Result<(), ClientError> {
        let entries = self.client_entries();
        let results = join_all(entries.iter().map(|entry| entry.client.wait_active())).await;
        results.into_iter().collect()
    }

    /// Registration barrier across every active client
    pub async fn sync(&self) -> HostResult<()> {
        for entry in self.client_entries() {
            entry.client.sync().await?;
        }
        Ok(())
    }

    pub async fn hover(&self, params: TextDocumentPositionParams) -> Option<HoverMerged> {
        let document = self
            .environment()
            .resolve_document(&params.text_document.uri);
        self.registries
            .hover
            .get_hover(&document, &params, self.config.hover_mode)
            .await
    }

    pub async fn decorations(
        &self,
        params: TextDocumentDecorationParams,
    ) -> Vec<TextDocumentDecoration> {
        let document = self
            .environment()
            .resolve_document(&params.text_document.uri);
        self.registries
            .decoration
            .get_decorations(&document, &params)
            .await
    }

    pub async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> HostResult<Value> {
        Ok(self.registries.command.execute(command, arguments).await?)
    }

    /// Tear down every client
    pub async fn shutdown(&self) {
        let _guard = self.reconcile.lock().await;
        let entries = self.entries.send_replace(Vec::new());
        join_all(entries.iter().map(|entry| entry.client.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::rpc::protocol::TextDocumentPositionParams;
    use crate::models::TextDocument;

    #[tokio::test]
    async fn test_in_process_rejects_unknown_extension() {
        let factory = InProcessTransportFactory::new(Duration::ZERO);
        assert!(matches!(
            factory.connect(&ExtensionDescriptor::new("nope")),
            Err(ClientError::Start { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_process_samples_answer_with_latency() {
        let config = HostConfig {
            in_process: true,
            transport_latency: Duration::from_millis(5),
            ..HostConfig::default()
        };
        let factory = Arc::new(InProcessTransportFactory::new(config.transport_latency));
        let controller = Controller::new(factory, config);

        let environment = Environment::with_document(TextDocument::new("file:///a.rs", "rust", ""))
            .with_extensions([ExtensionDescriptor::new("hover")]);
        controller.set_environment(environment).await.unwrap();
        controller.wait_for_active_clients().await.unwrap();

        let hover = controller
            .hover(TextDocumentPositionParams::new("file:///a.rs", 0, 1))
            .await
            .unwrap();
        assert_eq!(hover.contents.len(), 1);
        assert!(hover.contents[0].value.contains("rust"));

        controller.shutdown().await;
        assert!(controller.registries().hover.is_empty().await);
    }
}
