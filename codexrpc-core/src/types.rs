//! Wire types for the app-server dialect of JSON-RPC
//!
//! The app-server speaks JSON-RPC without the `"jsonrpc": "2.0"` member:
//!
//! ```text
//! request       {"id": 1, "method": "thread/start", "params": {...}}
//! notification  {"method": "initialized"}
//! success       {"id": 1, "result": {...}}
//! error         {"id": 1, "error": {"code": -32601, "message": "..."}}
//! ```
//!
//! Both sides send requests and notifications, so every inbound object is
//! classified once into an [`IncomingMessage`] before it is routed.
//!
//! # Classification
//!
//! Key presence decides, in this order:
//!
//! 1. `method` and `id` → [`IncomingMessage::Request`]
//! 2. `method` only → [`IncomingMessage::Notification`]
//! 3. `id` and `result` → [`IncomingMessage::Success`]
//! 4. `id` and `error` → [`IncomingMessage::Error`]
//!
//! Anything else is [`IncomingMessage::Unknown`] and is dropped by the client.

use crate::error::RpcErrorObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// JSON-RPC request identifier
///
/// Outbound requests always use `Number`; the peer may use either form for
/// its own requests, and the reply must echo it back unchanged.
///
/// ```rust
/// use codexrpc_core::RequestId;
///
/// let id: RequestId = 7i64.into();
/// assert_eq!(id.to_string(), "7");
/// assert_eq!(RequestId::from("abc").to_string(), "\"abc\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier, used for every request this client sends
    Number(i64),
    /// String identifier
    String(String),
}

impl RequestId {
    /// Read an identifier from the `id` member of a message
    ///
    /// Integers and strings are accepted; floats, booleans and `null` are not.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// Request sent to the peer
///
/// `params` is always present on the wire; callers that have nothing to send
/// pass an empty object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingRequest {
    /// Correlation identifier
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters object
    pub params: Value,
}

impl OutgoingRequest {
    /// Create a request; a `null` params value is replaced by `{}`
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        let params = if params.is_null() {
            Value::Object(Map::new())
        } else {
            params
        };
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// One-way message sent to the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Method or event name
    pub method: String,
    /// Optional parameters, omitted from the encoding when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// String member of `params`, if present
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }

    /// Re-encode as a plain JSON object
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("method".to_string(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            obj.insert("params".to_string(), params.clone());
        }
        Value::Object(obj)
    }
}

/// Reply to a server-initiated request
///
/// Exactly one of `result` and `error` is set; use [`Response::success`] and
/// [`Response::error`] to build one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Identifier echoed from the request
    pub id: RequestId,
    /// Successful result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl Response {
    /// Successful reply
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply
    pub fn error(id: RequestId, error: RpcErrorObject) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// True if this reply carries a result
    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

/// Request received from the peer
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    /// Identifier to echo in the reply
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters, if any
    pub params: Option<Value>,
}

/// Every shape an inbound message can take
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Server-initiated request expecting a reply
    Request(ServerRequest),
    /// Server-initiated notification
    Notification(Notification),
    /// Successful reply to one of our requests
    Success {
        /// Identifier of the request being answered
        id: RequestId,
        /// Raw result value
        result: Value,
    },
    /// Error reply to one of our requests
    Error {
        /// Identifier of the request being answered
        id: RequestId,
        /// Parsed error object, with defaults applied
        error: RpcErrorObject,
    },
    /// Object matching none of the shapes above
    Unknown(Value),
}

impl IncomingMessage {
    /// Classify a decoded JSON value by key presence
    ///
    /// ```rust
    /// use codexrpc_core::IncomingMessage;
    /// use serde_json::json;
    ///
    /// let msg = IncomingMessage::classify(json!({"id": 3, "result": {"ok": true}}));
    /// assert!(matches!(msg, IncomingMessage::Success { .. }));
    ///
    /// let msg = IncomingMessage::classify(json!({"method": "turn/started"}));
    /// assert!(matches!(msg, IncomingMessage::Notification(_)));
    /// ```
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut obj) = value else {
            return IncomingMessage::Unknown(value);
        };

        if obj.contains_key("method") {
            let method = match obj.remove("method") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let params = obj.remove("params");

            if let Some(raw_id) = obj.get("id") {
                return match RequestId::from_value(raw_id) {
                    Some(id) => IncomingMessage::Request(ServerRequest { id, method, params }),
                    None => {
                        obj.insert("method".to_string(), Value::String(method));
                        if let Some(params) = params {
                            obj.insert("params".to_string(), params);
                        }
                        IncomingMessage::Unknown(Value::Object(obj))
                    }
                };
            }

            return IncomingMessage::Notification(Notification { method, params });
        }

        let id = obj.get("id").and_then(RequestId::from_value);
        match id {
            Some(id) if obj.contains_key("result") => {
                let result = obj.remove("result").unwrap_or(Value::Null);
                IncomingMessage::Success { id, result }
            }
            Some(id) if obj.contains_key("error") => {
                let error = RpcErrorObject::from_wire(obj.get("error").unwrap_or(&Value::Null));
                IncomingMessage::Error { id, error }
            }
            _ => IncomingMessage::Unknown(Value::Object(obj)),
        }
    }

    /// Short label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingMessage::Request(_) => "request",
            IncomingMessage::Notification(_) => "notification",
            IncomingMessage::Success { .. } => "success",
            IncomingMessage::Error { .. } => "error",
            IncomingMessage::Unknown(_) => "unknown",
        }
    }
}
