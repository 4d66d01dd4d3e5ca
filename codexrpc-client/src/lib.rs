//! JSON-RPC client for `codex app-server` over a child process's stdio
//!
//! The app-server speaks newline-delimited JSON-RPC on stdin/stdout, and
//! traffic flows both ways: the client sends requests and notifications,
//! while the server sends notifications plus requests of its own (approval
//! prompts, tool calls) that the client must answer.
//!
//! # Core Features
//!
//! - **Subprocess Transport**: spawns `codex app-server`, frames stdout into
//!   JSON values, forwards stderr, surfaces non-zero exits as errors
//! - **Request Correlation**: concurrent requests matched to replies by id,
//!   with per-request timeouts
//! - **Server Requests**: typed handlers for approvals, user input and dynamic
//!   tools, plus a generic fallback
//! - **Notifications**: a bounded queue exposed as a stream, and typed
//!   [`Event`]s for the common turn and message notifications
//! - **Schema Validation**: optional Draft 7 checks against the app-server's
//!   generated JSON Schemas (`json-schema` feature, on by default)
//! - **Observability**: OpenTelemetry metrics and tracing spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use codexrpc_client::{AppServerClient, ClientOptions};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AppServerClient::connect(ClientOptions::new()).await?;
//!
//!     let thread = client.thread_start(json!({})).await?;
//!     let thread_id = thread["thread"]["id"].as_str().unwrap_or_default().to_string();
//!
//!     let mut text = client.stream_prompt_text(&thread_id, "Say hello", None).await?;
//!     while let Some(delta) = text.next().await {
//!         print!("{}", delta);
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Answering Approvals
//!
//! ```rust,no_run
//! use codexrpc_client::{ClientBuilder, ServerRequestHandlers};
//!
//! # async fn example() -> codexrpc_core::Result<()> {
//! let handlers = ServerRequestHandlers::new()
//!     .on_command_approval(|_params| async move { Ok("accept") })
//!     .on_file_change_approval(|_params| async move { Ok("decline") })
//!     .on_dynamic_tool(|params| async move {
//!         let name = params["tool"].as_str().unwrap_or("unknown").to_string();
//!         Ok((format!("ran {}", name), true))
//!     });
//!
//! let client = ClientBuilder::new().handlers(handlers).connect().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod client_builder;
mod connection_state;
pub mod events;
mod handler;
#[cfg(feature = "json-schema")]
mod json_schema;
mod metrics;
mod notification;
mod request;
mod schema;
pub mod transport;

pub use client::AppServerClient;
pub use client_builder::{ClientBuilder, ClientOptions, DEFAULT_REQUEST_TIMEOUT};
pub use connection_state::{ConnectionState, StateTracker};
pub use events::{Event, MessageCompleted, MessageDelta, TurnInfo};
pub use handler::{
    DispatchOutcome, DynamicToolOutput, HandlerError, HandlerResult, ServerMethod,
    ServerRequestHandlers, COMMAND_APPROVAL_METHOD, DYNAMIC_TOOL_METHOD,
    FILE_CHANGE_APPROVAL_METHOD, TOOL_INPUT_METHOD,
};
#[cfg(feature = "json-schema")]
pub use json_schema::JsonSchemaValidator;
pub use metrics::ClientMetrics;
pub use notification::{
    notification_fn, NotificationFn, NotificationQueue, NotificationSender,
    NOTIFICATION_QUEUE_CAPACITY,
};
pub use request::{PendingReceiver, RequestManager};
pub use schema::{
    FnValidator, IncomingKind, SchemaValidator, CLIENT_NOTIFICATION_SCHEMA,
    CLIENT_REQUEST_SCHEMA, ERROR_RESPONSE_SCHEMA, RESPONSE_SCHEMA, SERVER_NOTIFICATION_SCHEMA,
    SERVER_REQUEST_SCHEMA,
};
pub use transport::{
    MessageStream, StderrSink, SubprocessOptions, SubprocessTransport, Transport,
};
