//! The app-server connection
//!
//! [`AppServerClient`] multiplexes three kinds of traffic over one transport:
//!
//! - requests it sends, correlated to replies by integer id
//! - requests the app-server sends, answered by [`ServerRequestHandlers`]
//! - notifications, queued for [`AppServerClient::notifications`]
//!
//! A single reader task owns the inbound stream. It resolves pending
//! requests, queues notifications and runs server-request handlers on tasks
//! it owns, so a handler may itself call [`AppServerClient::request`]. When
//! the inbound stream fails or ends, every pending request is failed with the
//! same error and the notification stream ends.
//!
//! # Lifecycle
//!
//! `connect` starts the transport and the reader, then performs the
//! handshake: an `initialize` request followed by an `initialized`
//! notification. Nothing else is sent before the handshake completes, and a
//! failed handshake closes the connection before the error is returned.
//!
//! `close` stops the reader, fails anything still pending and tears down the
//! transport. It is idempotent and never fails.

use crate::client_builder::{ClientBuilder, ClientOptions};
use crate::connection_state::{ConnectionState, StateTracker};
use crate::events::Event;
use crate::handler::{DispatchOutcome, ServerRequestHandlers};
use crate::metrics::ClientMetrics;
use crate::notification::{NotificationQueue, NotificationSender, ObserverTask};
use crate::request::RequestManager;
use crate::schema::SchemaValidator;
use crate::transport::{MessageStream, Transport};
use codexrpc_core::{
    encode_line, Error, IncomingMessage, Notification, OutgoingRequest, RequestId, Response,
    Result, RpcErrorObject, ServerRequest,
};
use futures::future::{ready, BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

/// Everything the builder hands over to start a connection
pub(crate) struct ClientParts {
    pub options: ClientOptions,
    pub transport: Arc<dyn Transport>,
    pub handlers: ServerRequestHandlers,
    pub validator: Option<Arc<dyn SchemaValidator>>,
    pub metrics: Option<Arc<ClientMetrics>>,
}

/// Bidirectional JSON-RPC connection to `codex app-server`
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct AppServerClient {
    options: Arc<ClientOptions>,
    transport: Arc<dyn Transport>,
    request_manager: RequestManager,
    notifications: NotificationQueue,
    state: StateTracker,
    validator: Option<Arc<dyn SchemaValidator>>,
    metrics: Option<Arc<ClientMetrics>>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
    closed: Arc<AtomicBool>,
    /// Teardown started by the first `close`, awaited by every caller
    teardown: Arc<Mutex<Option<Shared<BoxFuture<'static, ()>>>>>,
}

/// What the reader needs, detached from the client handle
#[derive(Clone)]
struct Dispatcher {
    transport: Arc<dyn Transport>,
    request_manager: RequestManager,
    handlers: ServerRequestHandlers,
    validator: Option<Arc<dyn SchemaValidator>>,
    metrics: Option<Arc<ClientMetrics>>,
    state: StateTracker,
}

/// Reply produced by a handler task
struct HandlerReply {
    id: RequestId,
    method: String,
    result: std::result::Result<Value, RpcErrorObject>,
}

impl AppServerClient {
    /// Spawn `codex app-server` with `options` and complete the handshake
    #[tracing::instrument(skip(options), fields(codex_path = %options.codex_path))]
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        ClientBuilder::new().with_options(options).connect().await
    }

    pub(crate) async fn start(parts: ClientParts) -> Result<Self> {
        let ClientParts {
            options,
            transport,
            handlers,
            validator,
            metrics,
        } = parts;

        let state = StateTracker::new().with_metrics(metrics.clone());
        let (note_tx, notifications) = NotificationQueue::new();

        let client = Self {
            options: Arc::new(options),
            transport: Arc::clone(&transport),
            request_manager: RequestManager::new(),
            notifications,
            state: state.clone(),
            validator: validator.clone(),
            metrics: metrics.clone(),
            reader: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            teardown: Arc::new(Mutex::new(None)),
        };

        state.connecting().await;
        tracing::info!("connecting to app-server");
        let messages = match transport.connect().await.and_then(|_| transport.read_messages()) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(error = %e, "failed to start transport");
                client.record_error(&e);
                state.failed(e.to_string()).await;
                transport.close().await;
                return Err(e);
            }
        };

        let dispatcher = Dispatcher {
            transport,
            request_manager: client.request_manager.clone(),
            handlers,
            validator,
            metrics,
            state: state.clone(),
        };
        let handle = tokio::spawn(dispatcher.run(messages, note_tx));
        *client.reader.lock().await = Some(handle);

        state.initializing().await;
        if let Err(e) = client.initialize().await {
            tracing::error!(error = %e, "handshake failed");
            client.close().await;
            return Err(e);
        }

        // The reader may already have lost the transport
        if !state
            .transition(&ConnectionState::Initializing, ConnectionState::Ready)
            .await
        {
            let e = client
                .request_manager
                .terminal_error()
                .await
                .unwrap_or_else(|| Error::Connection("transport closed".to_string()));
            client.close().await;
            return Err(e);
        }
        tracing::info!("app-server connection ready");
        Ok(client)
    }

    async fn initialize(&self) -> Result<()> {
        let mut params = json!({
            "clientInfo": {
                "name": self.options.client_name,
                "title": self.options.client_title,
                "version": self.options.client_version,
            },
        });
        if self.options.experimental_api {
            params["capabilities"] = json!({ "experimentalApi": true });
        }

        self.request("initialize", params).await?;
        self.notify("initialized", None).await?;
        tracing::debug!("handshake complete");
        Ok(())
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.state().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a reply
    pub async fn pending_requests(&self) -> usize {
        self.request_manager.pending_count().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Connection("Client is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn record_error(&self, error: &Error) {
        if let Some(m) = &self.metrics {
            m.record_error(error.kind());
        }
    }

    /// Send a request and wait for its result, bounded by the default timeout
    ///
    /// `params` serializing to `null` (for example `()` or `None`) is sent
    /// as `{}`.
    #[tracing::instrument(skip(self, params))]
    pub async fn request<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        self.request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    /// Send a request with an explicit bound; `None` waits indefinitely
    ///
    /// On timeout the pending slot is removed and a connection error naming
    /// the method is returned. A reply arriving afterwards is ignored.
    pub async fn request_with_timeout<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let start = Instant::now();
        let result = self.round_trip(method, params, timeout).await;
        let duration = start.elapsed().as_secs_f64();

        match &result {
            Ok(_) => {
                if let Some(m) = &self.metrics {
                    m.record_request(method, "success", duration);
                }
                tracing::debug!(method = %method, duration_secs = duration, "request completed");
            }
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.record_request(method, "error", duration);
                }
                self.record_error(e);
                tracing::warn!(method = %method, error = %e, "request failed");
            }
        }
        result
    }

    /// Like [`request`](Self::request), deserializing the result
    pub async fn request_typed<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn round_trip<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.ensure_open()?;

        let id = self.request_manager.next_id();
        let request = OutgoingRequest::new(id.clone(), method, serde_json::to_value(params)?);
        if let Some(validator) = &self.validator {
            validator.validate_outgoing_request(&serde_json::to_value(&request)?)?;
        }
        let line = encode_line(&request)?;

        let rx = self.request_manager.register(id.clone()).await?;
        if let Err(e) = self.transport.write(&line).await {
            self.request_manager.remove(&id).await;
            return Err(e);
        }
        tracing::debug!(id = %id, "request sent, waiting for reply");

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.request_manager.remove(&id).await;
                    return Err(Error::Connection(format!("Request timeout: {}", method)));
                }
            },
            None => rx.await,
        };

        // A dropped sender means the table was torn down without a verdict
        outcome.unwrap_or_else(|_| Err(Error::Connection("Connection closed".to_string())))
    }

    /// Send a one-way message; `params` is omitted from the wire when `None`
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open()?;

        let notification = Notification::new(method, params);
        if let Some(validator) = &self.validator {
            validator.validate_outgoing_notification(&notification.to_value())?;
        }
        tracing::debug!(method = %method, "sending notification");
        self.transport.write(&encode_line(&notification)?).await
    }

    /// Notifications in arrival order
    ///
    /// The stream ends once the connection is gone. All streams share one
    /// queue: with several open at once each notification goes to exactly
    /// one of them.
    pub fn notifications(&self) -> BoxStream<'static, Notification> {
        self.notifications.stream()
    }

    /// Notifications parsed into [`Event`]s
    pub fn events(&self) -> BoxStream<'static, Event> {
        self.notifications()
            .map(|n| Event::from_notification(&n))
            .boxed()
    }

    pub async fn thread_start(&self, params: Value) -> Result<Value> {
        self.request("thread/start", params).await
    }

    pub async fn thread_resume(&self, params: Value) -> Result<Value> {
        self.request("thread/resume", params).await
    }

    pub async fn thread_fork(&self, params: Value) -> Result<Value> {
        self.request("thread/fork", params).await
    }

    pub async fn turn_start(&self, params: Value) -> Result<Value> {
        self.request("turn/start", params).await
    }

    pub async fn turn_interrupt(&self, params: Value) -> Result<Value> {
        self.request("turn/interrupt", params).await
    }

    /// Start a turn and stream the assistant's text deltas
    ///
    /// The stream yields `item/agentMessage/delta` text for `thread_id` (and
    /// the started turn, when `turn/start` returned a turn id) and ends at the
    /// matching `turn/completed`. Extra `turn/start` params are merged from
    /// `turn_params` when it is an object.
    pub async fn stream_turn_text(
        &self,
        thread_id: &str,
        items: Vec<Value>,
        turn_params: Option<Value>,
    ) -> Result<BoxStream<'static, String>> {
        let mut params = Map::new();
        params.insert("threadId".to_string(), Value::String(thread_id.to_string()));
        params.insert("input".to_string(), Value::Array(items));
        if let Some(Value::Object(extra)) = turn_params {
            params.extend(extra);
        }

        let response = self.turn_start(Value::Object(params)).await?;
        let turn_id = response
            .get("turn")
            .and_then(|turn| turn.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        tracing::debug!(thread_id = %thread_id, turn_id = ?turn_id, "streaming turn text");

        let completed_turn = turn_id.clone();
        let thread_id = thread_id.to_string();
        let stream = self
            .events()
            .take_while(move |event| {
                let done = matches!(
                    event,
                    Event::TurnCompleted(turn)
                        if completed_turn.is_none() || turn.id == completed_turn
                );
                ready(!done)
            })
            .filter_map(move |event| {
                let delta = match event {
                    Event::MessageDelta(delta)
                        if delta.thread_id.as_deref() == Some(thread_id.as_str())
                            && (turn_id.is_none() || delta.turn_id == turn_id)
                            && !delta.delta.is_empty() =>
                    {
                        Some(delta.delta)
                    }
                    _ => None,
                };
                ready(delta)
            });
        Ok(stream.boxed())
    }

    /// [`stream_turn_text`](Self::stream_turn_text) with a single text item
    pub async fn stream_prompt_text(
        &self,
        thread_id: &str,
        prompt: &str,
        turn_params: Option<Value>,
    ) -> Result<BoxStream<'static, String>> {
        let items = vec![json!({"type": "text", "text": prompt})];
        self.stream_turn_text(thread_id, items, turn_params).await
    }

    /// Stop the reader, fail pending requests and tear down the transport
    ///
    /// The teardown runs on its own task, so it completes even when the
    /// caller is cancelled, for example a handler whose task the reader
    /// aborts. Every call waits for that one teardown to finish.
    pub async fn close(&self) {
        let teardown = {
            let mut slot = self.teardown.lock().await;
            slot.get_or_insert_with(|| {
                self.closed.store(true, Ordering::SeqCst);
                let client = self.clone();
                tokio::spawn(async move { client.teardown().await })
                    .map(|joined| {
                        if let Err(e) = joined {
                            tracing::warn!(error = %e, "close did not finish");
                        }
                    })
                    .boxed()
                    .shared()
            })
            .clone()
        };
        teardown.await;
    }

    async fn teardown(&self) {
        tracing::info!("closing app-server connection");

        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let failed = self
            .request_manager
            .fail_all(Error::Connection("Connection closed".to_string()))
            .await;
        if failed > 0 {
            tracing::debug!(failed, "failed pending requests on close");
        }

        self.transport.close().await;
        self.state.closed().await;
    }
}

impl Dispatcher {
    /// Reader task body
    async fn run(self, mut messages: MessageStream, notes: NotificationSender) {
        let mut tasks: JoinSet<HandlerReply> = JoinSet::new();
        let observer = self
            .handlers
            .notification_observer()
            .map(|observer| ObserverTask::spawn(Arc::clone(observer)));

        let terminal = loop {
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(reply) => self.send_reply(reply).await,
                    Err(e) => tracing::warn!(error = %e, "handler task did not finish"),
                },
                next = messages.next() => match next {
                    Some(Ok(value)) => {
                        self.handle_message(value, &notes, observer.as_ref(), &mut tasks).await
                    }
                    Some(Err(e)) => break e,
                    None => break Error::Connection("transport closed".to_string()),
                },
            }
        };

        match &terminal {
            Error::Process { exit_code, .. } => {
                tracing::error!(exit_code = ?exit_code, error = %terminal, "app-server exited");
                if let Some(m) = &self.metrics {
                    m.record_process_exit(*exit_code);
                }
            }
            Error::Connection(_) => tracing::info!(reason = %terminal, "inbound stream ended"),
            _ => tracing::error!(error = %terminal, "inbound stream failed"),
        }
        if let Some(m) = &self.metrics {
            m.record_error(terminal.kind());
        }

        let failed = self.request_manager.fail_all(terminal.clone()).await;
        if failed > 0 {
            tracing::warn!(failed, "failed pending requests");
        }
        self.state.failed(terminal.to_string()).await;
        // Dropping `notes` ends every notification stream; dropping `tasks`
        // aborts handlers still running
    }

    async fn handle_message(
        &self,
        value: Value,
        notes: &NotificationSender,
        observer: Option<&ObserverTask>,
        tasks: &mut JoinSet<HandlerReply>,
    ) {
        if let Some(validator) = &self.validator {
            if let Err(e) = validator.validate_incoming(&value) {
                tracing::warn!(error = %e, "dropping invalid message");
                if let Some(m) = &self.metrics {
                    m.record_error(e.kind());
                }
                return;
            }
        }

        match IncomingMessage::classify(value) {
            IncomingMessage::Request(request) => {
                tracing::debug!(id = %request.id, method = %request.method, "server request received");
                tasks.spawn(self.handlers.clone().answer(request));
            }
            IncomingMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, "notification received");
                if let Some(m) = &self.metrics {
                    m.record_notification(&notification.method);
                }
                let observed = observer.map(|observer| (observer, notification.clone()));
                if !notes.send(notification).await {
                    tracing::trace!("notification queue has no consumers");
                }
                if let Some((observer, notification)) = observed {
                    observer.observe(notification);
                }
            }
            IncomingMessage::Success { id, result } => {
                if !self.request_manager.complete(&id, Ok(result)).await {
                    tracing::debug!(id = %id, "reply for unknown or expired request");
                }
            }
            IncomingMessage::Error { id, error } => {
                tracing::debug!(id = %id, code = error.code, "error reply received");
                if !self.request_manager.complete(&id, Err(Error::Rpc(error))).await {
                    tracing::debug!(id = %id, "error reply for unknown or expired request");
                }
            }
            IncomingMessage::Unknown(value) => {
                tracing::debug!(message = %value, "ignoring unrecognized message");
            }
        }
    }

    async fn send_reply(&self, reply: HandlerReply) {
        let outcome = DispatchOutcome::of(&reply.result);
        if let Some(m) = &self.metrics {
            m.record_server_request(&reply.method, outcome.as_str());
        }

        let response = match reply.result {
            Ok(result) => Response::success(reply.id, result),
            Err(error) => {
                tracing::debug!(method = %reply.method, code = error.code, message = %error.message, "rejecting server request");
                Response::error(reply.id, error)
            }
        };

        let written = match encode_line(&response) {
            Ok(line) => self.transport.write(&line).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(method = %reply.method, error = %e, "failed to send reply");
        }
    }
}

impl ServerRequestHandlers {
    /// Run the matching handler for a server request, turning panics into
    /// `-32000` replies
    async fn answer(self, request: ServerRequest) -> HandlerReply {
        let ServerRequest { id, method, params } = request;
        let result = AssertUnwindSafe(self.dispatch(&method, params))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(RpcErrorObject::handler_failed(format!(
                    "Handler for {} panicked",
                    method
                )))
            });
        HandlerReply { id, method, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;

    #[tokio::test]
    async fn test_handler_panic_becomes_error_reply() {
        let handlers = ServerRequestHandlers::new()
            .on_request(|_, _| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, HandlerError>(Value::Null)
            });
        let reply = handlers
            .answer(ServerRequest {
                id: RequestId::Number(5),
                method: "custom/panic".into(),
                params: None,
            })
            .await;
        assert_eq!(reply.id, RequestId::Number(5));
        let err = reply.result.unwrap_err();
        assert_eq!(err.code, codexrpc_core::SERVER_ERROR);
        assert!(err.message.contains("custom/panic"));
    }
}
