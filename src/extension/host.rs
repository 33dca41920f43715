//! Extension host: the API extension code registers providers through
//!
//! Every registration is installed locally first and then announced to the
//! host with `client/registerCapability`. Host invocations carry the
//! registration id and are routed to exactly that local provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{HostResult, RegistryError, RpcError};
use crate::infra::rpc::protocol::{
    Capability, DidChangeConfigurationParams, DidChangeContextParams, DidOpenTextDocumentParams,
    ExecuteCommandOptions, ExecuteCommandParams, InitializeParams, InitializeResult, LogMessageParams, MessageType,
    RegisterCapabilityParams, ServerCapabilities, TextDocumentDecorationParams,
    TextDocumentPositionParams, UnregisterCapabilityParams, error_codes,
};
use crate::infra::rpc::{Connection, ConnectionOptions, MessageTransports, Method, ResponseError};
use crate::models::{DocumentSelector, Hover, TextDocument, TextDocumentDecoration};
use crate::registry::{CommandHandler, DecorationProvider, HoverProvider};

#[derive(Default)]
struct LocalProviders {
    hover: HashMap<String, Arc<dyn HoverProvider>>,
    decoration: HashMap<String, Arc<dyn DecorationProvider>>,
    /// Command name -> (registration id, handler)
    commands: HashMap<String, (String, Arc<dyn CommandHandler>)>,
}

impl LocalProviders {
    fn remove(&mut self, id: &str) -> bool {
        let removed = self.hover.remove(id).is_some() | self.decoration.remove(id).is_some();
        let before = self.commands.len();
        self.commands.retain(|_, (registration, _)| registration != id);
        removed || before != self.commands.len()
    }
}

/// Handle for one registration made through [`ExtensionHost`]
pub struct ProviderRegistration {
    id: String,
    capability: Capability,
    host: Weak<ExtensionHost>,
    released: AtomicBool,
}

impl ProviderRegistration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Remove the local provider and tell the host. Later calls do nothing.
    pub async fn unsubscribe(&self) -> Result<(), RpcError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.host.upgrade() {
            Some(host) => host.unregister(&self.id).await,
            None => Ok(()),
        }
    }
}

pub struct ExtensionHost {
    connection: Arc<Connection>,
    next_id: AtomicU64,
    providers: RwLock<LocalProviders>,
    document: RwLock<Option<TextDocument>>,
    configuration: RwLock<Value>,
    context: RwLock<Value>,
}

/// Create an extension host and start listening
pub async fn create_extension_host(transports: MessageTransports) -> HostResult<Arc<ExtensionHost>> {
    let host = ExtensionHost::new(transports).await;
    host.listen().await?;
    Ok(host)
}

impl ExtensionHost {
    /// Create an extension host without listening yet. Registrations made
    /// before [`ExtensionHost::listen`] reach the host ahead of any reply.
    pub async fn new(transports: MessageTransports) -> Arc<Self> {
        let (connection, _) =
            Connection::from_transports("extension", transports, ConnectionOptions::default());

        let host = Arc::new(Self {
            connection,
            next_id: AtomicU64::new(1),
            providers: RwLock::new(LocalProviders::default()),
            document: RwLock::new(None),
            configuration: RwLock::new(Value::Object(Default::default())),
            context: RwLock::new(Value::Object(Default::default())),
        });
        host.install_handlers().await;
        host
    }

    pub async fn listen(self: &Arc<Self>) -> Result<(), RpcError> {
        self.connection.listen().await
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The document the host last opened
    pub async fn active_document(&self) -> Option<TextDocument> {
        self.document.read().await.clone()
    }

    pub async fn configuration(&self) -> Value {
        self.configuration.read().await.clone()
    }

    /// The host context as last pushed
    pub async fn context(&self) -> Value {
        self.context.read().await.clone()
    }

    pub async fn closed(&self) {
        self.connection.closed().await
    }

    pub async fn close(&self) {
        self.connection.close().await
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    pub async fn register_hover_provider(
        self: &Arc<Self>,
        selector: DocumentSelector,
        provider: Arc<dyn HoverProvider>,
    ) -> HostResult<ProviderRegistration> {
        let id = self.next_registration_id();
        self.providers
            .write()
            .await
            .hover
            .insert(id.clone(), provider);
        self.announce(id, Capability::Hover, selector, None).await
    }

    pub async fn register_decoration_provider(
        self: &Arc<Self>,
        selector: DocumentSelector,
        provider: Arc<dyn DecorationProvider>,
    ) -> HostResult<ProviderRegistration> {
        let id = self.next_registration_id();
        self.providers
            .write()
            .await
            .decoration
            .insert(id.clone(), provider);
        self.announce(id, Capability::Decoration, selector, None)
            .await
    }

    pub async fn register_command(
        self: &Arc<Self>,
        command: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> HostResult<ProviderRegistration> {
        let command = command.into();
        let id = self.next_registration_id();
        {
            let mut providers = self.providers.write().await;
            if providers.commands.contains_key(&command) {
                return Err(RegistryError::DuplicateRegistration(command).into());
            }
            providers
                .commands
                .insert(command.clone(), (id.clone(), handler));
        }
        self.announce(id, Capability::Command, DocumentSelector::default(), Some(command))
            .await
    }

    fn next_registration_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn announce(
        self: &Arc<Self>,
        id: String,
        capability: Capability,
        selector: DocumentSelector,
        command: Option<String>,
    ) -> HostResult<ProviderRegistration> {
        let params = RegisterCapabilityParams {
            id: id.clone(),
            capability,
            selector,
            command,
        };
        if let Err(e) = self
            .connection
            .send_notification(Method::RegisterCapability, params)
            .await
        {
            self.providers.write().await.remove(&id);
            return Err(e.into());
        }

        Ok(ProviderRegistration {
            id,
            capability,
            host: Arc::downgrade(self),
            released: AtomicBool::new(false),
        })
    }

    async fn unregister(&self, id: &str) -> Result<(), RpcError> {
        if !self.providers.write().await.remove(id) {
            return Ok(());
        }
        self.connection
            .send_notification(
                Method::UnregisterCapability,
                UnregisterCapabilityParams { id: id.to_string() },
            )
            .await
    }

    // ------------------------------------------------------------------------
    // Host-directed helpers
    // ------------------------------------------------------------------------

    /// Barrier: once this resolves, every registration sent before it is
    /// visible on the host
    pub async fn sync(&self) -> Result<(), RpcError> {
        self.connection
            .request::<Value>(Method::Sync, Value::Null)
            .await
            .map(|_| ())
    }

    pub async fn log(&self, typ: MessageType, message: impl Into<String>) -> Result<(), RpcError> {
        self.connection
            .send_notification(
                Method::LogMessage,
                LogMessageParams {
                    typ,
                    message: message.into(),
                },
            )
            .await
    }

    async fn capabilities(&self) -> ServerCapabilities {
        let providers = self.providers.read().await;
        let mut commands: Vec<_> = providers.commands.keys().cloned().collect();
        commands.sort();

        ServerCapabilities {
            hover_provider: (!providers.hover.is_empty()).then_some(true),
            decoration_provider: None,
            execute_command_provider: (!commands.is_empty())
                .then_some(ExecuteCommandOptions { commands }),
        }
    }

    async fn resolve_document(&self, uri: &str) -> TextDocument {
        self.document
            .read()
            .await
            .as_ref()
            .filter(|doc| doc.uri == uri)
            .cloned()
            .unwrap_or_else(|| TextDocument::from_uri(uri))
    }

    // ------------------------------------------------------------------------
    // Inbound from the host
    // ------------------------------------------------------------------------

    async fn install_handlers(self: &Arc<Self>) {
        let connection = &self.connection;

        let weak = Arc::downgrade(self);
        connection
            .on_request(Method::Initialize, move |params: InitializeParams| {
                let weak = Weak::clone(&weak);
                async move {
                    let host = upgrade(&weak)?;
                    *host.configuration.write().await = params.configuration;
                    *host.context.write().await = params.context;
                    Ok::<_, ResponseError>(InitializeResult {
                        capabilities: host.capabilities().await,
                    })
                }
            })
            .await;

        connection
            .on_notification(Method::Initialized, |_: Value| async {
                tracing::debug!("Host finished initialization");
            })
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_request(Method::Hover, move |params: TextDocumentPositionParams| {
                let weak = Weak::clone(&weak);
                async move {
                    let host = upgrade(&weak)?;
                    host.provide_hover(params).await
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_request(Method::Decoration, move |params: TextDocumentDecorationParams| {
                let weak = Weak::clone(&weak);
                async move {
                    let host = upgrade(&weak)?;
                    host.provide_decorations(params).await
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_request(Method::ExecuteCommand, move |params: ExecuteCommandParams| {
                let weak = Weak::clone(&weak);
                async move {
                    let host = upgrade(&weak)?;
                    host.execute_command(params).await
                }
            })
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_notification(
                Method::DidOpenTextDocument,
                move |params: DidOpenTextDocumentParams| {
                    let weak = Weak::clone(&weak);
                    async move {
                        if let Some(host) = weak.upgrade() {
                            *host.document.write().await = Some(params.text_document);
                        }
                    }
                },
            )
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_notification(
                Method::DidChangeConfiguration,
                move |params: DidChangeConfigurationParams| {
                    let weak = Weak::clone(&weak);
                    async move {
                        if let Some(host) = weak.upgrade() {
                            *host.configuration.write().await = params.settings;
                        }
                    }
                },
            )
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_notification(Method::DidChangeContext, move |params: DidChangeContextParams| {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(host) = weak.upgrade() {
                        *host.context.write().await = params.context;
                    }
                }
            })
            .await;

        connection
            .on_request(Method::Shutdown, |_: Value| async {
                Ok::<_, ResponseError>(Value::Null)
            })
            .await;

        let weak = Arc::downgrade(self);
        connection
            .on_notification(Method::Exit, move |_: Value| {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(host) = weak.upgrade() {
                        host.connection.close().await;
                    }
                }
            })
            .await;

        connection
            .on_request(Method::Sync, |_: Value| async {
                Ok::<_, ResponseError>(Value::Null)
            })
            .await;
    }

    async fn provide_hover(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<Hover>, ResponseError> {
        let provider = {
            let providers = self.providers.read().await;
            lookup(&providers.hover, params.registration_id.as_deref())?
        };
        let document = self.resolve_document(&params.text_document.uri).await;
        provider
            .provide_hover(&document, &params)
            .await
            .map_err(|e| ResponseError::from(&e))
    }

    async fn provide_decorations(
        &self,
        params: TextDocumentDecorationParams,
    ) -> Result<Option<Vec<TextDocumentDecoration>>, ResponseError> {
        let provider = {
            let providers = self.providers.read().await;
            lookup(&providers.decoration, params.registration_id.as_deref())?
        };
        let document = self.resolve_document(&params.text_document.uri).await;
        provider
            .provide_decorations(&document, &params)
            .await
            .map_err(|e| ResponseError::from(&e))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Value, ResponseError> {
        let handler = self
            .providers
            .read()
            .await
            .commands
            .get(&params.command)
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| {
                ResponseError::new(
                    error_codes::INVALID_PARAMS,
                    format!("Unknown command: {}", params.command),
                )
            })?;
        handler
            .execute(params.arguments)
            .await
            .map_err(|e| ResponseError::from(&e))
    }
}

fn upgrade(weak: &Weak<ExtensionHost>) -> Result<Arc<ExtensionHost>, ResponseError> {
    weak.upgrade()
        .ok_or_else(|| ResponseError::internal_error("extension host is gone"))
}

fn lookup<P: ?Sized>(
    providers: &HashMap<String, Arc<P>>,
    registration_id: Option<&str>,
) -> Result<Arc<P>, ResponseError> {
    let id = registration_id.ok_or_else(|| ResponseError::invalid_params("missing registrationId"))?;
    providers
        .get(id)
        .cloned()
        .ok_or_else(|| ResponseError::invalid_params(format!("unknown registrationId {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HostError, ProviderError};
    use crate::infra::rpc::transport::memory;
    use crate::models::MarkupContent;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Extension host plus a bare host-side connection that records
    /// registration notifications
    async fn setup() -> (
        Arc<ExtensionHost>,
        Arc<Connection>,
        mpsc::UnboundedReceiver<(Method, Value)>,
    ) {
        let (host_side, extension_side) = memory::pair(Duration::ZERO);
        let extension = create_extension_host(extension_side).await.unwrap();

        let (host, _) =
            Connection::from_transports("host", host_side, ConnectionOptions::default());
        let (tx, rx) = mpsc::unbounded_channel();
        for method in [Method::RegisterCapability, Method::UnregisterCapability] {
            let tx = tx.clone();
            host.on_notification(method, move |params: Value| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((method, params));
                }
            })
            .await;
        }
        host.on_request(Method::Sync, |_: Value| async {
            Ok::<_, ResponseError>(Value::Null)
        })
        .await;
        host.listen().await.unwrap();
        (extension, host, rx)
    }

    fn hover_provider(text: &'static str) -> Arc<dyn HoverProvider> {
        Arc::new(move |doc: TextDocument, _: TextDocumentPositionParams| async move {
            let language = doc.language_id.unwrap_or_default();
            Ok::<_, ProviderError>(Some(Hover::new(MarkupContent::new(format!(
                "{} {}",
                text, language
            )))))
        })
    }

    #[tokio::test]
    async fn test_registration_is_announced_and_routed() {
        let (extension, host, mut rx) = setup().await;
        let registration = extension
            .register_hover_provider(DocumentSelector::all(), hover_provider("hi"))
            .await
            .unwrap();

        let (method, params) = rx.recv().await.unwrap();
        assert_eq!(method, Method::RegisterCapability);
        assert_eq!(params["id"], registration.id());
        assert_eq!(params["capability"], "hover");
        assert_eq!(params["selector"], serde_json::json!(["*"]));

        host.send_notification(
            Method::DidOpenTextDocument,
            DidOpenTextDocumentParams {
                text_document: TextDocument::new("file:///f", "rust", "fn main() {}"),
            },
        )
        .await
        .unwrap();

        let mut params = TextDocumentPositionParams::new("file:///f", 0, 0);
        params.registration_id = Some(registration.id().to_string());
        let hover: Option<Hover> = host.request(Method::Hover, params).await.unwrap();
        assert_eq!(
            hover.map(|h| serde_json::to_value(h.contents).unwrap()),
            Some(serde_json::json!({ "value": "hi rust" }))
        );
    }

    #[tokio::test]
    async fn test_unknown_registration_is_invalid_params() {
        let (_extension, host, _rx) = setup().await;
        let mut params = TextDocumentPositionParams::new("file:///f", 0, 0);
        params.registration_id = Some("404".to_string());

        let err = host
            .request::<Option<Hover>>(Method::Hover, params)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (extension, _host, mut rx) = setup().await;
        let registration = extension
            .register_hover_provider(DocumentSelector::all(), hover_provider("x"))
            .await
            .unwrap();
        registration.unsubscribe().await.unwrap();
        registration.unsubscribe().await.unwrap();
        extension.sync().await.unwrap();

        let mut methods = Vec::new();
        while let Ok((method, _)) = rx.try_recv() {
            methods.push(method);
        }
        assert_eq!(
            methods,
            [Method::RegisterCapability, Method::UnregisterCapability]
        );
    }

    #[tokio::test]
    async fn test_duplicate_command_rejected_locally() {
        let (extension, _host, _rx) = setup().await;
        let handler: Arc<dyn CommandHandler> =
            Arc::new(|_: Vec<Value>| async { Ok::<_, ProviderError>(Value::Null) });
        extension
            .register_command("run", Arc::clone(&handler))
            .await
            .unwrap();
        assert!(matches!(
            extension.register_command("run", handler).await,
            Err(HostError::Registry(RegistryError::DuplicateRegistration(_)))
        ));
    }

    #[tokio::test]
    async fn test_initialize_reports_capabilities_and_configuration() {
        let (extension, host, _rx) = setup().await;
        extension
            .register_hover_provider(DocumentSelector::all(), hover_provider("x"))
            .await
            .unwrap();

        let result: InitializeResult = host
            .request(
                Method::Initialize,
                serde_json::json!({
                    "capabilities": { "dynamicRegistration": true },
                    "configuration": { "colors": true },
                    "context": { "theme": "dark" }
                }),
            )
            .await
            .unwrap();
        assert_eq!(result.capabilities.hover_provider, Some(true));
        assert!(result.capabilities.execute_command_provider.is_none());
        assert_eq!(
            extension.configuration().await,
            serde_json::json!({ "colors": true })
        );
        assert_eq!(extension.context().await, serde_json::json!({ "theme": "dark" }));
    }

    #[tokio::test]
    async fn test_exit_closes_connection() {
        let (extension, host, _rx) = setup().await;
        host.send_notification(Method::Exit, Value::Null).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), extension.closed())
            .await
            .unwrap();
    }
}
