//! Error types for codexrpc
//!
//! Two error types live here:
//!
//! - **Error**: everything that can go wrong on the client side of the
//!   connection (spawning the child, framing its output, waiting for replies)
//! - **RpcErrorObject**: the `{code, message, data}` object carried in the
//!   `error` member of a JSON-RPC reply, in either direction
//!
//! # Error Taxonomy
//!
//! - `Connection`: not connected, writing while not ready, request timeout
//! - `Decode`: a malformed line or an overflowing line buffer (fatal to the reader)
//! - `Process`: the child exited with a non-zero code after closing stdout
//! - `Rpc`: the peer answered a request with an error object
//! - `Schema`: an installed schema validator rejected a message
//! - `Serialization`: a value could not be turned into JSON
//!
//! `Error` is `Clone` so that a single terminal failure of the reader task can
//! be handed to every request that is still waiting.
//!
//! # Examples
//!
//! ```rust
//! use codexrpc_core::{Error, RpcErrorObject};
//!
//! let err = Error::Rpc(RpcErrorObject::method_not_found("item/tool/call"));
//! assert_eq!(err.rpc_code(), Some(-32601));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type for codexrpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// JSON-RPC code for a method nobody handles
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC code used for handler failures and for error replies without a code
pub const SERVER_ERROR: i64 = -32000;

/// Longest slice of an offending line kept in a decode error
const MAX_LINE_PREVIEW: usize = 100;

/// Line marker used when the framer gives up on an overlong line
pub const BUFFER_OVERFLOW_LINE: &str = "<buffer overflow>";

/// Client-side error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The connection is not usable for the requested operation
    ///
    /// Raised when the process cannot be spawned, when writing before
    /// `connect` or after `close`, and when a request times out.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A line from the child could not be decoded
    ///
    /// `line` holds at most the first 100 characters of the offending line.
    #[error("Failed to decode JSON: {line}... ({reason})")]
    Decode {
        /// Truncated copy of the offending line
        line: String,
        /// Underlying parse failure
        reason: String,
    },

    /// The child process exited with a failure code after its output closed
    #[error("{message}")]
    Process {
        /// Human readable description
        message: String,
        /// Exit code reported by the operating system
        exit_code: Option<i32>,
    },

    /// Structured error reply from the peer
    #[error("{0}")]
    Rpc(#[from] RpcErrorObject),

    /// A schema validator rejected a message
    #[error("Schema validation error: {0}")]
    Schema(String),

    /// Serialization or deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a decode error, truncating the offending line for readability
    pub fn decode(line: &str, reason: impl std::fmt::Display) -> Self {
        let line: String = line.chars().take(MAX_LINE_PREVIEW).collect();
        Error::Decode {
            line,
            reason: reason.to_string(),
        }
    }

    /// Decode error raised when unflushed output grows past `limit` bytes
    pub fn buffer_overflow(limit: usize) -> Self {
        Error::Decode {
            line: BUFFER_OVERFLOW_LINE.to_string(),
            reason: format!("buffer too large (limit {} bytes)", limit),
        }
    }

    /// Process error for a child that exited with `exit_code`
    pub fn process_exit(program: &str, exit_code: i32) -> Self {
        Error::Process {
            message: format!("{} app-server exited with code {}", program, exit_code),
            exit_code: Some(exit_code),
        }
    }

    /// JSON-RPC code if this is an `Rpc` error
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Error::Rpc(e) => Some(e.code),
            _ => None,
        }
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Decode { .. } => "decode",
            Error::Process { .. } => "process",
            Error::Rpc(_) => "rpc",
            Error::Schema(_) => "schema",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// JSON-RPC error object as it appears on the wire
///
/// ```json
/// {"code": -32601, "message": "No handler for foo", "data": null}
/// ```
///
/// `data` is omitted from the encoding when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code
    pub code: i64,
    /// Short description of the error
    pub message: String,
    /// Optional additional information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Create an error object with code and message
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error object carrying additional data
    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Reply for a server request nobody is registered to answer (-32601)
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, message)
    }

    /// Reply for a handler that failed while answering (-32000)
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(SERVER_ERROR, message)
    }

    /// Parse the `error` member of an inbound reply
    ///
    /// Peers are not trusted to send a complete object: a missing or
    /// non-integer `code` becomes -32000, a missing `message` becomes
    /// "Unknown error", and a `null` error member yields both defaults.
    pub fn from_wire(value: &Value) -> Self {
        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(SERVER_ERROR);
        let message = match value.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "Unknown error".to_string(),
            Some(other) => other.to_string(),
        };
        let data = value.get("data").filter(|d| !d.is_null()).cloned();
        Self {
            code,
            message,
            data,
        }
    }
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " (data={})", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcErrorObject {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_error_truncates_line() {
        let line = "x".repeat(500);
        let err = Error::decode(&line, "expected value");

        match err {
            Error::Decode { line, reason } => {
                assert_eq!(line.len(), 100);
                assert_eq!(reason, "expected value");
            }
            _ => panic!("Expected Decode error"),
        }
    }

    #[test]
    fn test_decode_error_truncates_on_char_boundary() {
        let line = "é".repeat(150);
        let err = Error::decode(&line, "bad");
        if let Error::Decode { line, .. } = err {
            assert_eq!(line.chars().count(), 100);
        } else {
            panic!("Expected Decode error");
        }
    }

    #[test]
    fn test_buffer_overflow_is_decode_error() {
        let err = Error::buffer_overflow(1024);
        assert_eq!(err.kind(), "decode");
        assert!(err.to_string().contains(BUFFER_OVERFLOW_LINE));
    }

    #[test]
    fn test_process_exit_carries_code() {
        let err = Error::process_exit("codex", 3);
        match err {
            Error::Process { exit_code, message } => {
                assert_eq!(exit_code, Some(3));
                assert!(message.contains("exited with code 3"));
            }
            _ => panic!("Expected Process error"),
        }
    }

    #[test]
    fn test_from_wire_defaults() {
        let err = RpcErrorObject::from_wire(&json!({}));
        assert_eq!(err.code, SERVER_ERROR);
        assert_eq!(err.message, "Unknown error");
        assert!(err.data.is_none());

        let err = RpcErrorObject::from_wire(&Value::Null);
        assert_eq!(err.code, SERVER_ERROR);
        assert_eq!(err.message, "Unknown error");
    }

    #[test]
    fn test_from_wire_full_object() {
        let err = RpcErrorObject::from_wire(&json!({
            "code": -32602,
            "message": "bad params",
            "data": {"field": "threadId"}
        }));
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "bad params");
        assert_eq!(err.data, Some(json!({"field": "threadId"})));
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcErrorObject::new(-32601, "No handler for foo");
        assert_eq!(err.to_string(), "JSON-RPC error -32601: No handler for foo");

        let err = RpcErrorObject::with_data(1, "boom", json!("ctx"));
        assert!(err.to_string().ends_with("(data=\"ctx\")"));
    }

    #[test]
    fn test_rpc_error_serialization_skips_missing_data() {
        let encoded = serde_json::to_string(&RpcErrorObject::handler_failed("oops")).unwrap();
        assert_eq!(encoded, r#"{"code":-32000,"message":"oops"}"#);
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::Connection("x".into()).kind(), "connection");
        assert_eq!(Error::Schema("x".into()).kind(), "schema");
        assert_eq!(
            Error::Rpc(RpcErrorObject::method_not_found("x")).rpc_code(),
            Some(METHOD_NOT_FOUND)
        );
        assert_eq!(Error::Serialization("x".into()).rpc_code(), None);
    }
}
