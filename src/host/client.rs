//! Host-side link to one extension
//!
//! A client owns the connection to an extension, mirrors the extension's
//! registrations into the host registries and keeps the extension's view of
//! the environment current. Everything the extension registered is removed
//! when the connection closes, however it closes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock, watch};

use crate::config::HostConfig;
use crate::error::{ClientError, ProviderError, RpcError};
use crate::infra::rpc::protocol::{
    Capability, ClientCapabilities, ClientInfo, DidChangeConfigurationParams,
    DidChangeContextParams, DidOpenTextDocumentParams, ExecuteCommandParams, InitializeParams, InitializeResult,
    LogMessageParams, MessageType, RegisterCapabilityParams, ServerCapabilities,
    TextDocumentDecorationParams, TextDocumentPositionParams, UnregisterCapabilityParams,
};
use crate::infra::rpc::{Connection, Method, MessageTransports, ResponseError};
use crate::models::{
    DocumentSelector, Environment, ExtensionDescriptor, Hover, TextDocument,
    TextDocumentDecoration,
};
use crate::registry::{
    CommandHandler, DecorationProvider, HoverMode, HoverProvider, Registries, Unsubscribe,
};

/// Key of the implicit provider installed for a static decoration capability
const STATIC_DECORATIONS: &str = "$static-decorations";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Active,
    Closed,
}

pub struct Client {
    extension: ExtensionDescriptor,
    connection: Arc<Connection>,
    process: Mutex<Option<Child>>,
    state: watch::Sender<ClientState>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    /// Remote registration id -> host registry token
    registrations: Mutex<HashMap<String, Unsubscribe>>,
    /// Environment as last pushed to the extension
    synced: Mutex<Option<Arc<Environment>>>,
    registries: Registries,
    environment: watch::Receiver<Arc<Environment>>,
    config: HostConfig,
}

impl Client {
    /// Connect to an extension. Returns at once in `Connecting`; the
    /// handshake continues in the background.
    pub async fn start(
        extension: ExtensionDescriptor,
        transports: MessageTransports,
        registries: Registries,
        environment: watch::Receiver<Arc<Environment>>,
        config: HostConfig,
    ) -> Arc<Self> {
        let (connection, process) = Connection::from_transports(
            format!("client[{}]", extension.id),
            transports,
            config.connection_options(),
        );
        let (state, _) = watch::channel(ClientState::Connecting);

        let client = Arc::new(Self {
            extension,
            connection,
            process: Mutex::new(process),
            state,
            capabilities: RwLock::new(None),
            registrations: Mutex::new(HashMap::new()),
            synced: Mutex::new(None),
            registries,
            environment,
            config,
        });

        client.install_handlers().await;

        // Cascade: whatever closes the connection releases the registrations
        let watcher = Arc::clone(&client);
        tokio::spawn(async move {
            watcher.connection.closed().await;
            watcher.release_registrations().await;
            watcher.state.send_replace(ClientState::Closed);
            tracing::info!("Extension '{}' disconnected", watcher.extension.id);
        });

        if let Err(e) = client.connection.listen().await {
            tracing::error!("Extension '{}' failed to listen: {}", client.extension.id, e);
            client.connection.close().await;
            return client;
        }

        let handshake = Arc::clone(&client);
        tokio::spawn(async move {
            if let Err(e) = handshake.initialize().await {
                tracing::error!(
                    "Extension '{}' failed to initialize: {}",
                    handshake.extension.id,
                    e
                );
                handshake.connection.close().await;
            }
        });

        client
    }

    pub fn extension(&self) -> &ExtensionDescriptor {
        &self.extension
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Resolves once the handshake completed; fails if the client closes
    /// first
    pub async fn wait_active(&self) -> Result<(), ClientError> {
        let mut state = self.state.subscribe();
        let reached = state
            .wait_for(|s| *s != ClientState::Connecting)
            .await
            .map(|s| *s)
            .unwrap_or(ClientState::Closed);

        match reached {
            ClientState::Active => Ok(()),
            _ => Err(ClientError::Closed(self.extension.id.clone())),
        }
    }

    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().await.clone()
    }

    pub async fn registration_count(&self) -> usize {
        self.registrations.lock().await.len()
    }

    /// Round trip through the extension. Every registration the extension
    /// sent before answering is applied when this resolves.
    pub async fn sync(&self) -> Result<(), RpcError> {
        self.connection
            .request::<Value>(Method::Sync, Value::Null)
            .await
            .map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    async fn initialize(self: &Arc<Self>) -> Result<(), RpcError> {
        let environment = self.environment.borrow().clone();

        let params = InitializeParams {
            root: environment.document().map(|doc| doc.uri.clone()),
            capabilities: ClientCapabilities {
                dynamic_registration: true,
                hover_merging: self.config.hover_mode == HoverMode::Merge,
            },
            client_info: Some(ClientInfo {
                name: "exthost".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            configuration: environment.configuration.clone(),
            context: environment.context.clone(),
        };

        tracing::debug!("Initializing extension '{}'", self.extension.id);

        let result: InitializeResult = self
            .connection
            .request_with_timeout(
                Method::Initialize,
                params,
                Some(self.config.initialize_timeout),
            )
            .await?;

        if result.capabilities.has_static_decorations() {
            let provider: Arc<dyn DecorationProvider> = Arc::new(RemoteProvider {
                connection: Arc::clone(&self.connection),
                registration_id: None,
            });
            let token = self
                .registries
                .decoration
                .register(DocumentSelector::all(), provider)
                .await;
            self.registrations
                .lock()
                .await
                .insert(STATIC_DECORATIONS.to_string(), token);
            if self.connection.is_closed() {
                self.release_registrations().await;
                return Err(RpcError::ConnectionClosed);
            }
        }
        *self.capabilities.write().await = Some(result.capabilities);

        self.connection
            .send_notification(Method::Initialized, serde_json::json!({}))
            .await?;

        // Configuration and context went out with `initialize`; the document
        // (and any change since) goes out now
        let mut synced = self.synced.lock().await;
        let sent = Arc::new(Environment {
            component: None,
            ..(*environment).clone()
        });
        *synced = Some(sent);
        self.push_locked(&mut synced).await?;
        self.state.send_replace(ClientState::Active);
        drop(synced);

        tracing::info!("Extension '{}' is active", self.extension.id);
        Ok(())
    }

    /// Send the extension whatever changed since the last push. A no-op
    /// until the client is active; the handshake pushes on its own.
    pub async fn push_environment(&self) -> Result<(), RpcError> {
        let mut synced = self.synced.lock().await;
        if self.state() != ClientState::Active {
            return Ok(());
        }
        self.push_locked(&mut synced).await
    }

    async fn push_locked(&self, synced: &mut Option<Arc<Environment>>) -> Result<(), RpcError> {
        let current = self.environment.borrow().clone();
        let previous = synced.replace(Arc::clone(&current));

        let (old_document, old_configuration, old_context) = match &previous {
            Some(env) => (env.document(), Some(&env.configuration), Some(&env.context)),
            None => (None, None, None),
        };

        if let Some(document) = current.document()
            && old_document != Some(document)
        {
            self.connection
                .send_notification(
                    Method::DidOpenTextDocument,
                    DidOpenTextDocumentParams {
                        text_document: document.clone(),
                    },
                )
                .await?;
        }

        if old_configuration != Some(&current.configuration) {
            self.connection
                .send_notification(
                    Method::DidChangeConfiguration,
                    DidChangeConfigurationParams {
                        settings: current.configuration.clone(),
                    },
                )
                .await?;
        }

        if old_context != Some(&current.context) {
            self.connection
                .send_notification(
                    Method::DidChangeContext,
                    DidChangeContextParams {
                        context: current.context.clone(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound from the extension
    // ------------------------------------------------------------------------

    async fn install_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.connection
            .on_notification(Method::RegisterCapability, move |params: RegisterCapabilityParams| {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(client) = weak.upgrade() {
                        client.register(params).await;
                    }
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        self.connection
            .on_notification(
                Method::UnregisterCapability,
                move |params: UnregisterCapabilityParams| {
                    let weak = Weak::clone(&weak);
                    async move {
                        if let Some(client) = weak.upgrade() {
                            client.unregister(&params.id).await;
                        }
                    }
                },
            )
            .await;

        let extension = self.extension.id.clone();
        self.connection
            .on_notification(Method::LogMessage, move |params: LogMessageParams| {
                let extension = extension.clone();
                async move { log_message(&extension, params) }
            })
            .await;

        self.connection
            .on_request(Method::Sync, |_: Value| async {
                Ok::<_, ResponseError>(Value::Null)
            })
            .await;
    }

    async fn register(&self, params: RegisterCapabilityParams) {
        let RegisterCapabilityParams {
            id,
            capability,
            selector,
            command,
        } = params;

        let token = match capability {
            Capability::Hover => {
                let provider: Arc<dyn HoverProvider> = Arc::new(RemoteProvider {
                    connection: Arc::clone(&self.connection),
                    registration_id: Some(id.clone()),
                });
                self.registries.hover.register(selector, provider).await
            }
            Capability::Decoration => {
                let provider: Arc<dyn DecorationProvider> = Arc::new(RemoteProvider {
                    connection: Arc::clone(&self.connection),
                    registration_id: Some(id.clone()),
                });
                self.registries.decoration.register(selector, provider).await
            }
            Capability::Command => {
                let Some(command) = command else {
                    tracing::warn!(
                        "Extension '{}' registered command {} without a name",
                        self.extension.id,
                        id
                    );
                    return;
                };
                let handler: Arc<dyn CommandHandler> = Arc::new(RemoteCommand {
                    connection: Arc::clone(&self.connection),
                    command: command.clone(),
                });
                match self.registries.command.register(command, handler).await {
                    Ok(token) => token,
                    Err(e) => {
                        tracing::warn!("Extension '{}': {}", self.extension.id, e);
                        return;
                    }
                }
            }
        };

        tracing::debug!(
            "Extension '{}' registered {:?} provider {}",
            self.extension.id,
            capability,
            id
        );

        let replaced = self.registrations.lock().await.insert(id.clone(), token);
        if let Some(previous) = replaced {
            previous.unsubscribe().await;
        }

        // Teardown may have drained the map while this was in flight
        if self.connection.is_closed() {
            let token = self.registrations.lock().await.remove(&id);
            if let Some(token) = token {
                token.unsubscribe().await;
            }
        }
    }

    async fn unregister(&self, id: &str) {
        let token = self.registrations.lock().await.remove(id);
        match token {
            Some(token) => {
                token.unsubscribe().await;
                tracing::debug!("Extension '{}' unregistered {}", self.extension.id, id);
            }
            None => {
                tracing::debug!(
                    "Extension '{}' unregistered unknown id {}",
                    self.extension.id,
                    id
                );
            }
        }
    }

    async fn release_registrations(&self) {
        let tokens: Vec<_> = self.registrations.lock().await.drain().collect();
        if !tokens.is_empty() {
            tracing::debug!(
                "Removing {} registrations of extension '{}'",
                tokens.len(),
                self.extension.id
            );
        }
        for (_, token) in tokens {
            token.unsubscribe().await;
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Graceful shutdown: `shutdown` request, `exit`, close, then wait for
    /// the process and kill it if it lingers
    pub async fn shutdown(&self) {
        if !self.connection.is_closed() {
            match self
                .connection
                .request_with_timeout::<Value>(
                    Method::Shutdown,
                    Value::Null,
                    Some(self.config.shutdown_timeout),
                )
                .await
            {
                Ok(_) => {
                    let _ = self
                        .connection
                        .send_notification(Method::Exit, Value::Null)
                        .await;
                }
                Err(e) => {
                    tracing::debug!(
                        "Extension '{}' shutdown request failed: {}",
                        self.extension.id,
                        e
                    );
                }
            }
        }

        self.connection.close().await;
        self.release_registrations().await;
        self.state.send_replace(ClientState::Closed);

        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("Extension '{}' exited: {:?}", self.extension.id, status);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Extension '{}' wait error: {}", self.extension.id, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Extension '{}' did not exit in time, forcing kill",
                        self.extension.id
                    );
                    let _ = child.kill().await;
                }
            }
        }
    }
}

fn log_message(extension: &str, params: LogMessageParams) {
    let message = params.message;
    match params.typ {
        MessageType::Error => tracing::error!("[{}] {}", extension, message),
        MessageType::Warning => tracing::warn!("[{}] {}", extension, message),
        MessageType::Info => tracing::info!("[{}] {}", extension, message),
        MessageType::Log => tracing::debug!("[{}] {}", extension, message),
    }
}

// ============================================================================
// Remote providers
// ============================================================================

/// Host-side stand-in for a provider living in the extension
struct RemoteProvider {
    connection: Arc<Connection>,
    /// `None` for the implicit static decoration provider
    registration_id: Option<String>,
}

#[async_trait]
impl HoverProvider for RemoteProvider {
    async fn provide_hover(
        &self,
        _document: &TextDocument,
        params: &TextDocumentPositionParams,
    ) -> Result<Option<Hover>, ProviderError> {
        let params = TextDocumentPositionParams {
            registration_id: self.registration_id.clone(),
            ..params.clone()
        };
        Ok(self.connection.request(Method::Hover, params).await?)
    }
}

#[async_trait]
impl DecorationProvider for RemoteProvider {
    async fn provide_decorations(
        &self,
        _document: &TextDocument,
        params: &TextDocumentDecorationParams,
    ) -> Result<Option<Vec<TextDocumentDecoration>>, ProviderError> {
        let params = TextDocumentDecorationParams {
            registration_id: self.registration_id.clone(),
            ..params.clone()
        };
        Ok(self.connection.request(Method::Decoration, params).await?)
    }
}

struct RemoteCommand {
    connection: Arc<Connection>,
    command: String,
}

#[async_trait]
impl CommandHandler for RemoteCommand {
    async fn execute(&self, arguments: Vec<Value>) -> Result<Value, ProviderError> {
        let params = ExecuteCommandParams {
            command: self.command.clone(),
            arguments,
        };
        Ok(self.connection.request(Method::ExecuteCommand, params).await?)
    }
}
