//! Core types for talking to `codex app-server` over JSON-RPC
//!
//! This crate holds the transport-agnostic pieces shared by the client:
//!
//! - [`types`]: request ids, outgoing messages and inbound classification
//! - [`codec`]: newline-delimited JSON framing with a bounded buffer
//! - [`error`]: the client error type and the wire error object
//! - [`observability`]: tracing subscriber and OpenTelemetry exporters
//!
//! Most users depend on `codexrpc-client` (or the `codexrpc` facade) instead
//! of using this crate directly.

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use codec::{encode_line, LineDecoder, DEFAULT_MAX_BUFFER_SIZE};
pub use error::{Error, Result, RpcErrorObject, METHOD_NOT_FOUND, SERVER_ERROR};
pub use observability::{
    init_observability, shutdown_observability, LogFormat, ObservabilityConfig, LOG_ENV,
};
pub use types::{IncomingMessage, Notification, OutgoingRequest, RequestId, Response, ServerRequest};
