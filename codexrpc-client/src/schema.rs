//! Structural validation hook
//!
//! A [`SchemaValidator`] installed on the client is consulted for every
//! outgoing request, every outgoing notification and every incoming message.
//! Outgoing failures abort the send and surface as [`Error::Schema`]. An
//! incoming message that fails is logged and dropped; the reader keeps going.
//!
//! [`JsonSchemaValidator`] checks messages against the JSON Schema files
//! that `codex app-server generate-json-schema` writes (behind the default
//! `json-schema` feature). [`FnValidator`] wraps plain functions instead.
//!
//! [`JsonSchemaValidator`]: crate::JsonSchemaValidator
//!
//! [`Error::Schema`]: codexrpc_core::Error::Schema

use codexrpc_core::{Error, Result};
use serde_json::Value;

pub const CLIENT_REQUEST_SCHEMA: &str = "ClientRequest";
pub const CLIENT_NOTIFICATION_SCHEMA: &str = "ClientNotification";
pub const SERVER_REQUEST_SCHEMA: &str = "ServerRequest";
pub const SERVER_NOTIFICATION_SCHEMA: &str = "ServerNotification";
pub const RESPONSE_SCHEMA: &str = "JSONRPCResponse";
pub const ERROR_RESPONSE_SCHEMA: &str = "JSONRPCError";

/// Which schema an incoming message is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingKind {
    ServerRequest,
    ServerNotification,
    Response,
    ErrorResponse,
}

impl IncomingKind {
    /// Classify by key presence, mirroring inbound dispatch
    pub fn of(message: &Value) -> Option<Self> {
        let has = |key: &str| message.get(key).is_some();
        if has("method") {
            Some(if has("id") {
                IncomingKind::ServerRequest
            } else {
                IncomingKind::ServerNotification
            })
        } else if has("id") && has("result") {
            Some(IncomingKind::Response)
        } else if has("id") && has("error") {
            Some(IncomingKind::ErrorResponse)
        } else {
            None
        }
    }

    /// Schema file stem for this kind of message
    pub fn schema_name(self) -> &'static str {
        match self {
            IncomingKind::ServerRequest => SERVER_REQUEST_SCHEMA,
            IncomingKind::ServerNotification => SERVER_NOTIFICATION_SCHEMA,
            IncomingKind::Response => RESPONSE_SCHEMA,
            IncomingKind::ErrorResponse => ERROR_RESPONSE_SCHEMA,
        }
    }
}

pub trait SchemaValidator: Send + Sync {
    fn validate_outgoing_request(&self, message: &Value) -> Result<()>;

    fn validate_outgoing_notification(&self, message: &Value) -> Result<()>;

    fn validate_incoming(&self, message: &Value) -> Result<()>;
}

/// Validator built from plain functions, one per message kind
///
/// Useful for tests and for lightweight structural checks.
pub struct FnValidator<F>
where
    F: Fn(&str, &Value) -> std::result::Result<(), String> + Send + Sync,
{
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&str, &Value) -> std::result::Result<(), String> + Send + Sync,
{
    /// `check` receives a schema name (`ClientRequest`,
    /// `ClientNotification`, `ServerRequest`, `ServerNotification`,
    /// `JSONRPCResponse`, `JSONRPCError`) and the message
    pub fn new(check: F) -> Self {
        Self { check }
    }

    fn run(&self, schema: &str, message: &Value) -> Result<()> {
        (self.check)(schema, message)
            .map_err(|e| Error::Schema(format!("Schema validation failed for {}: {}", schema, e)))
    }
}

impl<F> SchemaValidator for FnValidator<F>
where
    F: Fn(&str, &Value) -> std::result::Result<(), String> + Send + Sync,
{
    fn validate_outgoing_request(&self, message: &Value) -> Result<()> {
        self.run(CLIENT_REQUEST_SCHEMA, message)
    }

    fn validate_outgoing_notification(&self, message: &Value) -> Result<()> {
        self.run(CLIENT_NOTIFICATION_SCHEMA, message)
    }

    fn validate_incoming(&self, message: &Value) -> Result<()> {
        match IncomingKind::of(message) {
            Some(kind) => self.run(kind.schema_name(), message),
            None => Ok(()),
        }
    }
}
