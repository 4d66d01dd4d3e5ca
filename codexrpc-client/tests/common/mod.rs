//! Common test utilities for codexrpc-client integration tests
//!
//! [`MockAppServer`] is an in-memory [`Transport`] standing in for
//! `codex app-server`: it records every line the client writes, answers
//! requests from canned responders and lets tests inject inbound messages or
//! a transport failure.

#![allow(dead_code)]

use async_trait::async_trait;
use codexrpc_client::{AppServerClient, ClientBuilder, MessageStream, ServerRequestHandlers, Transport};
use codexrpc_core::{Error, Result};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type Responder = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

enum Reply {
    Result(Responder),
    Error(i64, String),
}

pub struct MockAppServer {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Result<Value>>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<Value>>>>,
    written: Mutex<Vec<Value>>,
    replies: Mutex<HashMap<String, Reply>>,
    ready: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockAppServer {
    /// Mock that answers the handshake and nothing else
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = Arc::new(Self {
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            written: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        server.on_request("initialize", |_| json!({"userAgent": "mock-app-server/0.0.0"}));
        server
    }

    /// Answer `method` with the responder's result
    pub fn on_request<F>(&self, method: &str, responder: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.replies
            .lock()
            .unwrap()
            .insert(method.to_string(), Reply::Result(Arc::new(responder)));
    }

    /// Answer `method` with an error object
    pub fn on_request_error(&self, method: &str, code: i64, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(method.to_string(), Reply::Error(code, message.to_string()));
    }

    /// Deliver a message to the client
    pub fn push(&self, message: Value) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(message));
        }
    }

    /// Fail the inbound stream with `error` and end it
    pub fn fail(&self, error: Error) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().take() {
            let _ = tx.send(Err(error));
        }
    }

    /// End the inbound stream cleanly
    pub fn finish(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn written(&self) -> Vec<Value> {
        self.written.lock().unwrap().clone()
    }

    pub fn written_methods(&self) -> Vec<String> {
        self.written()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Replies the client sent for server requests
    pub fn replies_sent(&self) -> Vec<Value> {
        self.written()
            .into_iter()
            .filter(|m| m.get("method").is_none())
            .collect()
    }

    /// Wait until `predicate` holds for the written messages
    pub async fn wait_for<F>(&self, predicate: F) -> Vec<Value>
    where
        F: Fn(&[Value]) -> bool,
    {
        for _ in 0..500 {
            let written = self.written();
            if predicate(&written) {
                return written;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met; written: {:?}", self.written());
    }

    /// Wait for a reply to the server request `id`
    pub async fn wait_for_reply(&self, id: Value) -> Value {
        let written = self
            .wait_for(|w| w.iter().any(|m| m.get("method").is_none() && m["id"] == id))
            .await;
        written
            .into_iter()
            .find(|m| m.get("method").is_none() && m["id"] == id)
            .unwrap()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn auto_reply(&self, message: &Value) {
        let (Some(method), Some(id)) = (message.get("method").and_then(Value::as_str), message.get("id")) else {
            return;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let reply = match self.replies.lock().unwrap().get(method) {
            Some(Reply::Result(responder)) => json!({"id": id, "result": responder(&params)}),
            Some(Reply::Error(code, msg)) => {
                json!({"id": id, "error": {"code": code, "message": msg}})
            }
            None => return,
        };
        self.push(reply);
    }
}

#[async_trait]
impl Transport for MockAppServer {
    async fn connect(&self) -> Result<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, line: &str) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(Error::Connection("Transport is not ready for writing".into()));
        }
        assert!(line.ends_with('\n'), "line without terminator: {:?}", line);
        assert_eq!(line.matches('\n').count(), 1, "embedded newline: {:?}", line);

        let message: Value = serde_json::from_str(line.trim_end())?;
        self.written.lock().unwrap().push(message.clone());
        self.auto_reply(&message);
        Ok(())
    }

    fn read_messages(&self) -> Result<MessageStream> {
        let rx = self
            .inbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Connection("read_messages called twice".into()))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed())
    }

    async fn end_input(&self) {}

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Connect a client to `server` with default handlers
pub async fn connect(server: &Arc<MockAppServer>) -> AppServerClient {
    connect_with(server, ServerRequestHandlers::new()).await
}

pub async fn connect_with(
    server: &Arc<MockAppServer>,
    handlers: ServerRequestHandlers,
) -> AppServerClient {
    ClientBuilder::new()
        .transport(server.clone())
        .handlers(handlers)
        .connect()
        .await
        .unwrap()
}

/// Poll `f` until it returns `Some`, for at most five seconds
pub async fn eventually<T, F, Fut>(f: F) -> T
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..500 {
        if let Some(value) = f().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}
