//! JSON-RPC connection over a message transport
//!
//! Lifecycle is `Created -> Listening -> Closed`. Nothing is read from the
//! transport before [`Connection::listen`], so early inbound messages stay
//! queued in the transport until then.
//!
//! Notification handlers run inline in the dispatch loop, one message at a
//! time, so state they mutate changes in arrival order. Request handlers
//! run on their own tasks and may issue requests of their own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tokio::task::AbortHandle;

use super::protocol::{
    CancelParams, Message, Method, Notification, Request, RequestId, Response, ResponseError,
    error_codes,
};
use super::transport::{MessageReader, MessageTransports, MessageWriter};
use crate::error::RpcError;

type RequestHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ResponseError>> + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Listening,
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Default bound for [`Connection::request`]; `None` waits forever
    pub request_timeout: Option<Duration>,
}

/// An outstanding request. Await it with [`PendingRequest::wait`], or hand
/// its id to [`Connection::cancel_request`].
pub struct PendingRequest {
    id: u64,
    method: Method,
    rx: oneshot::Receiver<Response>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub async fn wait<T: DeserializeOwned>(self) -> Result<T, RpcError> {
        let response = self.rx.await.map_err(|_| RpcError::ConnectionClosed)?;
        let value = response.into_result()?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }
}

pub struct Connection {
    name: String,
    options: ConnectionOptions,
    reader: Mutex<Option<Box<dyn MessageReader>>>,
    writer: Mutex<Option<Box<dyn MessageWriter>>>,
    next_id: AtomicU64,
    pending: RwLock<HashMap<RequestId, oneshot::Sender<Response>>>,
    running: Mutex<HashMap<RequestId, AbortHandle>>,
    request_handlers: RwLock<HashMap<Method, RequestHandler>>,
    notification_handlers: RwLock<HashMap<Method, Vec<NotificationHandler>>>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        reader: Box<dyn MessageReader>,
        writer: Box<dyn MessageWriter>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Created);
        Arc::new(Self {
            name: name.into(),
            options,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            next_id: AtomicU64::new(1),
            pending: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            state,
        })
    }

    /// Build a connection from transports; the child process (if any) is
    /// handed back to the caller, who owns its lifecycle
    pub fn from_transports(
        name: impl Into<String>,
        transports: MessageTransports,
        options: ConnectionOptions,
    ) -> (Arc<Self>, Option<tokio::process::Child>) {
        let MessageTransports {
            reader,
            writer,
            process,
        } = transports;
        (Self::new(name, reader, writer, options), process)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Resolves once the connection is closed (immediately if it already is)
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    // ------------------------------------------------------------------------
    // Handler registration
    // ------------------------------------------------------------------------

    /// Install the handler for `method`. A later registration for the same
    /// method replaces the earlier one.
    pub async fn on_request<P, R, F, Fut>(&self, method: Method, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResponseError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: RequestHandler = Arc::new(move |params: Value| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let params: P =
                    serde_json::from_value(params).map_err(ResponseError::invalid_params)?;
                let result = handler(params).await?;
                serde_json::to_value(result).map_err(ResponseError::internal_error)
            })
        });

        let previous = self
            .request_handlers
            .write()
            .await
            .insert(method, erased);
        if previous.is_some() {
            tracing::debug!("{}: replaced request handler for {}", self.name, method);
        }
    }

    /// Add a handler for `method`. Handlers accumulate and run in
    /// registration order.
    pub async fn on_notification<P, F, Fut>(&self, method: Method, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let name = self.name.clone();
        let erased: NotificationHandler = Arc::new(move |params: Value| {
            let handler = Arc::clone(&handler);
            let name = name.clone();
            Box::pin(async move {
                match serde_json::from_value::<P>(params) {
                    Ok(params) => handler(params).await,
                    Err(e) => {
                        tracing::warn!("{}: invalid params for {}: {}", name, method, e);
                    }
                }
            })
        });

        self.notification_handlers
            .write()
            .await
            .entry(method)
            .or_default()
            .push(erased);
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Send a request and return its pending handle without waiting
    pub async fn send_request(
        &self,
        method: Method,
        params: impl Serialize,
    ) -> Result<PendingRequest, RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }

        let params = to_params(params)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(RequestId::Number(id), tx);

        tracing::trace!("{} request {}: {}", self.name, id, method);

        if let Err(e) = self.write(Request::new(id, method, params).into()).await {
            self.pending.write().await.remove(&RequestId::Number(id));
            return Err(e);
        }

        Ok(PendingRequest { id, method, rx })
    }

    /// Send a request and wait for its result under the default timeout
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        params: impl Serialize,
    ) -> Result<T, RpcError> {
        self.request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    pub async fn request_with_timeout<T: DeserializeOwned>(
        &self,
        method: Method,
        params: impl Serialize,
        limit: Option<Duration>,
    ) -> Result<T, RpcError> {
        let pending = self.send_request(method, params).await?;
        let Some(limit) = limit else {
            return pending.wait().await;
        };

        let id = pending.id();
        match tokio::time::timeout(limit, pending.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel_request(id).await;
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Abandon a pending request: its waiter gets `RequestCancelled` and the
    /// peer is told via `$/cancelRequest`
    pub async fn cancel_request(&self, id: u64) {
        let sender = self.pending.write().await.remove(&RequestId::Number(id));
        if let Some(tx) = sender {
            let _ = tx.send(Response::error(
                Some(RequestId::Number(id)),
                ResponseError::new(error_codes::REQUEST_CANCELLED, "Request cancelled"),
            ));
            let _ = self
                .send_notification(
                    Method::CancelRequest,
                    CancelParams {
                        id: RequestId::Number(id),
                    },
                )
                .await;
        }
    }

    /// Fire-and-forget; delivery is best effort
    pub async fn send_notification(
        &self,
        method: Method,
        params: impl Serialize,
    ) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        let params = to_params(params)?;
        self.write(Notification::new(method, params).into()).await
    }

    async fn write(&self, message: Message) -> Result<(), RpcError> {
        let result = {
            let mut writer_guard = self.writer.lock().await;
            let writer = writer_guard.as_mut().ok_or(RpcError::ConnectionClosed)?;
            writer.write(&message).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!("{}: transport closed while writing", self.name);
                self.close().await;
                Err(RpcError::ConnectionClosed)
            }
            Err(e) => Err(RpcError::Transport(e)),
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Start dispatching inbound messages on a background task
    pub async fn listen(self: &Arc<Self>) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| RpcError::Protocol(format!("{} is already listening", self.name)))?;

        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Created {
                *state = ConnectionState::Listening;
                true
            } else {
                false
            }
        });

        let connection = Arc::clone(self);
        tokio::spawn(async move {
            connection.dispatch(reader).await;
        });
        Ok(())
    }

    async fn dispatch(self: Arc<Self>, mut reader: Box<dyn MessageReader>) {
        let mut state = self.state.subscribe();

        loop {
            let next = tokio::select! {
                message = reader.read() => message,
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow() == ConnectionState::Closed {
                        break;
                    }
                    continue;
                }
            };

            match next {
                Ok(Some(message)) => self.handle_message(message).await,
                Ok(None) => {
                    tracing::debug!("{}: peer closed the transport", self.name);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!("{}: dropping malformed frame: {}", self.name, e);
                }
                Err(e) => {
                    if !self.is_closed() {
                        tracing::error!("{}: read error: {}", self.name, e);
                    }
                    break;
                }
            }
        }

        self.close().await;
    }

    async fn handle_message(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => {
                let Some(id) = response.id.clone() else {
                    tracing::warn!(
                        "{}: response without id: {:?}",
                        self.name,
                        response.error
                    );
                    return;
                };
                let sender = self.pending.write().await.remove(&id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(
                            "{}: response for unknown request {} (may have timed out)",
                            self.name,
                            id
                        );
                    }
                }
            }
            Message::Request(request) => self.handle_request(request).await,
            Message::Notification(notification) => self.handle_notification(notification).await,
        }
    }

    async fn handle_request(self: &Arc<Self>, request: Request) {
        let id = request.id.clone();
        let handler = match request.method.parse::<Method>() {
            Ok(method) => self.request_handlers.read().await.get(&method).cloned(),
            Err(_) => None,
        };

        let Some(handler) = handler else {
            tracing::debug!("{}: unhandled request {}", self.name, request.method);
            let _ = self
                .write(Response::error(Some(id), ResponseError::method_not_found(&request.method)).into())
                .await;
            return;
        };

        let params = request.params.unwrap_or(Value::Null);
        let connection = Arc::clone(self);
        let task_id = id.clone();

        // Hold the lock across spawn so the task cannot finish and look
        // itself up before it is recorded
        let mut running = self.running.lock().await;
        let task = tokio::spawn(async move {
            let result = handler(params).await;
            if connection.running.lock().await.remove(&task_id).is_none() {
                return;
            }
            let response = match result {
                Ok(value) => Response::success(task_id, value),
                Err(error) => Response::error(Some(task_id), error),
            };
            if let Err(e) = connection.write(response.into()).await {
                tracing::debug!("{}: failed to send response: {}", connection.name, e);
            }
        });
        running.insert(id, task.abort_handle());
    }

    async fn handle_notification(self: &Arc<Self>, notification: Notification) {
        let Ok(method) = notification.method.parse::<Method>() else {
            tracing::debug!(
                "{}: dropping notification for unknown method {}",
                self.name,
                notification.method
            );
            return;
        };
        let params = notification.params.unwrap_or(Value::Null);

        if method == Method::CancelRequest {
            self.handle_cancel(params).await;
            return;
        }

        let handlers = self
            .notification_handlers
            .read()
            .await
            .get(&method)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!("{}: no handler for notification {}", self.name, method);
        }
        for handler in handlers {
            handler(params.clone()).await;
        }
    }

    async fn handle_cancel(&self, params: Value) {
        let Ok(CancelParams { id }) = serde_json::from_value::<CancelParams>(params) else {
            tracing::warn!("{}: malformed $/cancelRequest", self.name);
            return;
        };
        let task = self.running.lock().await.remove(&id);
        if let Some(task) = task {
            task.abort();
            tracing::debug!("{}: request {} cancelled by peer", self.name, id);
            let _ = self
                .write(
                    Response::error(
                        Some(id),
                        ResponseError::new(error_codes::REQUEST_CANCELLED, "Request cancelled"),
                    )
                    .into(),
                )
                .await;
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Close the connection. Pending requests fail with `ConnectionClosed`.
    /// Safe to call any number of times.
    pub async fn close(&self) {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !transitioned {
            return;
        }

        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(e) = writer.close().await
        {
            tracing::debug!("{}: error closing writer: {}", self.name, e);
        }
        self.reader.lock().await.take();

        for (_, task) in self.running.lock().await.drain() {
            task.abort();
        }

        // Dropping the senders fails every waiter with `ConnectionClosed`
        let mut pending = self.pending.write().await;
        let count = pending.len();
        if count > 0 {
            tracing::debug!("{}: rejecting {} pending requests", self.name, count);
        }
        pending.clear();

        tracing::debug!("{}: connection closed", self.name);
    }
}

fn to_params(params: impl Serialize) -> Result<Option<Value>, RpcError> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}
