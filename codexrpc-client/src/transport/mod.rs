//! Byte-level connection to an app-server
//!
//! A [`Transport`] moves whole lines out and decoded JSON values in. The
//! client never touches processes or pipes directly, so tests can swap in an
//! in-memory implementation.
//!
//! # Contract
//!
//! - `write` sends exactly one line and must not interleave with concurrent
//!   writers; it fails with a connection error unless the transport is ready
//! - `read_messages` hands out the inbound stream once; a second call fails
//! - the stream yields `Err` at most once, as its last item, when the
//!   connection dies abnormally, and simply ends on a clean shutdown
//! - `close` never fails and may be called any number of times

mod subprocess;

pub use subprocess::{StderrSink, SubprocessOptions, SubprocessTransport};

use async_trait::async_trait;
use codexrpc_core::Result;
use futures::stream::BoxStream;
use serde_json::Value;

/// Stream of decoded inbound messages
pub type MessageStream = BoxStream<'static, Result<Value>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the connection; a second call on a started transport is a no-op
    async fn connect(&self) -> Result<()>;

    /// Write one line, trailing newline included
    async fn write(&self, line: &str) -> Result<()>;

    /// Take the inbound message stream
    fn read_messages(&self) -> Result<MessageStream>;

    /// Close the write side only
    async fn end_input(&self);

    /// Tear everything down, swallowing failures
    async fn close(&self);

    /// True between a successful `connect` and `close`
    fn is_ready(&self) -> bool;
}
