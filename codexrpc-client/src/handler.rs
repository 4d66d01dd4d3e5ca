//! Handlers for requests initiated by the app-server
//!
//! The app-server asks the client for decisions through four well-known
//! methods:
//!
//! | method                                  | handler                  |
//! |-----------------------------------------|--------------------------|
//! | `item/commandExecution/requestApproval` | command approval         |
//! | `item/fileChange/requestApproval`       | file-change approval     |
//! | `item/tool/requestUserInput`            | tool user input          |
//! | `item/tool/call`                        | dynamic tool call        |
//!
//! Any other method goes to the generic request handler, which receives the
//! method name as well as the params. The generic handler is also the
//! fallback for a well-known method whose specific handler is missing. When
//! nothing applies the request is rejected with `-32601`.
//!
//! A handler returning `Err` produces a `-32000` reply carrying the error's
//! message; the connection keeps running.
//!
//! # Result shapes
//!
//! - Approval handlers may return a bare value such as `"accept"`; anything
//!   that is not a JSON object is wrapped as `{"decision": value}`
//! - Tool input results are sent as returned
//! - Dynamic tool handlers return a [`DynamicToolOutput`]; an
//!   `(output, success)` pair becomes `{"output": .., "success": ..}`
//!
//! # Examples
//!
//! ```rust
//! use codexrpc_client::ServerRequestHandlers;
//! use serde_json::json;
//!
//! let handlers = ServerRequestHandlers::new()
//!     .on_command_approval(|_params| async move { Ok(json!("accept")) })
//!     .on_dynamic_tool(|params| async move {
//!         let name = params["tool"].as_str().unwrap_or_default().to_string();
//!         Ok((format!("ran {}", name), true))
//!     });
//! ```

use codexrpc_core::{RpcErrorObject, METHOD_NOT_FOUND};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::notification::{notification_fn, NotificationFn};

/// Error type handlers may fail with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by every handler
pub type HandlerResult<T = Value> =
    Pin<Box<dyn Future<Output = std::result::Result<T, HandlerError>> + Send>>;

/// Generic handler receiving `(method, params)`
pub type RequestFn = Arc<dyn Fn(String, Option<Value>) -> HandlerResult + Send + Sync>;

/// Handler for one well-known method, receiving its params
pub type ParamsFn = Arc<dyn Fn(Value) -> HandlerResult + Send + Sync>;

/// Dynamic tool handler
pub type DynamicToolFn = Arc<dyn Fn(Value) -> HandlerResult<DynamicToolOutput> + Send + Sync>;

/// Method used to ask for command execution approval
pub const COMMAND_APPROVAL_METHOD: &str = "item/commandExecution/requestApproval";
/// Method used to ask for file change approval
pub const FILE_CHANGE_APPROVAL_METHOD: &str = "item/fileChange/requestApproval";
/// Method used to ask the user for tool input
pub const TOOL_INPUT_METHOD: &str = "item/tool/requestUserInput";
/// Method used to invoke a client-side tool
pub const DYNAMIC_TOOL_METHOD: &str = "item/tool/call";

/// Well-known server request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMethod {
    CommandApproval,
    FileChangeApproval,
    ToolInput,
    DynamicTool,
}

impl ServerMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            COMMAND_APPROVAL_METHOD => Some(ServerMethod::CommandApproval),
            FILE_CHANGE_APPROVAL_METHOD => Some(ServerMethod::FileChangeApproval),
            TOOL_INPUT_METHOD => Some(ServerMethod::ToolInput),
            DYNAMIC_TOOL_METHOD => Some(ServerMethod::DynamicTool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMethod::CommandApproval => COMMAND_APPROVAL_METHOD,
            ServerMethod::FileChangeApproval => FILE_CHANGE_APPROVAL_METHOD,
            ServerMethod::ToolInput => TOOL_INPUT_METHOD,
            ServerMethod::DynamicTool => DYNAMIC_TOOL_METHOD,
        }
    }

    /// Rejection message used when no handler is registered
    fn missing_handler_message(&self) -> &'static str {
        match self {
            ServerMethod::CommandApproval => "No command approval handler",
            ServerMethod::FileChangeApproval => "No file-change approval handler",
            ServerMethod::ToolInput => "No tool input handler",
            ServerMethod::DynamicTool => "No dynamic tool handler",
        }
    }
}

/// Result of a dynamic tool call
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicToolOutput {
    /// Text output with a success flag
    Text { output: String, success: bool },
    /// Result object sent as is
    Raw(Value),
}

impl DynamicToolOutput {
    pub fn into_value(self) -> Value {
        match self {
            DynamicToolOutput::Text { output, success } => {
                json!({"output": output, "success": success})
            }
            DynamicToolOutput::Raw(value) => value,
        }
    }
}

impl From<(String, bool)> for DynamicToolOutput {
    fn from((output, success): (String, bool)) -> Self {
        DynamicToolOutput::Text { output, success }
    }
}

impl From<(&str, bool)> for DynamicToolOutput {
    fn from((output, success): (&str, bool)) -> Self {
        DynamicToolOutput::Text {
            output: output.to_string(),
            success,
        }
    }
}

impl From<Value> for DynamicToolOutput {
    fn from(value: Value) -> Self {
        DynamicToolOutput::Raw(value)
    }
}

/// How a server request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Unhandled,
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Handled => "handled",
            DispatchOutcome::Unhandled => "unhandled",
            DispatchOutcome::Failed => "failed",
        }
    }

    pub fn of(result: &std::result::Result<Value, RpcErrorObject>) -> Self {
        match result {
            Ok(_) => DispatchOutcome::Handled,
            Err(e) if e.code == METHOD_NOT_FOUND => DispatchOutcome::Unhandled,
            Err(_) => DispatchOutcome::Failed,
        }
    }
}

/// Handler set consulted for every inbound request and notification
///
/// Cloning is cheap; handlers are reference counted.
#[derive(Clone, Default)]
pub struct ServerRequestHandlers {
    request: Option<RequestFn>,
    notification: Option<NotificationFn>,
    command_approval: Option<ParamsFn>,
    file_change_approval: Option<ParamsFn>,
    tool_input: Option<ParamsFn>,
    dynamic_tool: Option<DynamicToolFn>,
}

fn params_fn<F, Fut, R>(f: F) -> ParamsFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
    R: Into<Value> + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |params| {
        let f = Arc::clone(&f);
        Box::pin(async move { f(params).await.map(Into::into) })
    })
}

impl ServerRequestHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generic handler for methods without a specific handler
    pub fn on_request<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(String, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
        R: Into<Value> + 'static,
    {
        let f = Arc::new(f);
        let handler: RequestFn = Arc::new(move |method, params| {
            let f = Arc::clone(&f);
            Box::pin(async move { f(method, params).await.map(Into::into) })
        });
        self.request = Some(handler);
        self
    }

    /// Observer called with `(method, params)` for every notification
    pub fn on_notification<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.notification = Some(notification_fn(f));
        self
    }

    pub fn on_command_approval<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
        R: Into<Value> + 'static,
    {
        self.command_approval = Some(params_fn(f));
        self
    }

    pub fn on_file_change_approval<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
        R: Into<Value> + 'static,
    {
        self.file_change_approval = Some(params_fn(f));
        self
    }

    pub fn on_tool_input<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
        R: Into<Value> + 'static,
    {
        self.tool_input = Some(params_fn(f));
        self
    }

    pub fn on_dynamic_tool<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, HandlerError>> + Send + 'static,
        R: Into<DynamicToolOutput> + 'static,
    {
        let f = Arc::new(f);
        let handler: DynamicToolFn = Arc::new(move |params| {
            let f = Arc::clone(&f);
            Box::pin(async move { f(params).await.map(Into::into) })
        });
        self.dynamic_tool = Some(handler);
        self
    }

    pub(crate) fn notification_observer(&self) -> Option<&NotificationFn> {
        self.notification.as_ref()
    }

    /// Produce the reply payload for a server request
    ///
    /// `Err` is the error object to send back; it never escapes as a Rust
    /// error.
    pub async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, RpcErrorObject> {
        let Some(known) = ServerMethod::parse(method) else {
            return self.dispatch_generic(method, params).await;
        };

        let result = match known {
            ServerMethod::CommandApproval => match &self.command_approval {
                Some(h) => h(or_empty(params)).await.map(wrap_decision),
                None => return self.dispatch_fallback(known, params).await,
            },
            ServerMethod::FileChangeApproval => match &self.file_change_approval {
                Some(h) => h(or_empty(params)).await.map(wrap_decision),
                None => return self.dispatch_fallback(known, params).await,
            },
            ServerMethod::ToolInput => match &self.tool_input {
                Some(h) => h(or_empty(params)).await,
                None => return self.dispatch_fallback(known, params).await,
            },
            ServerMethod::DynamicTool => match &self.dynamic_tool {
                Some(h) => h(or_empty(params)).await.map(DynamicToolOutput::into_value),
                None => return self.dispatch_fallback(known, params).await,
            },
        };

        result.map_err(|e| RpcErrorObject::handler_failed(e.to_string()))
    }

    async fn dispatch_fallback(
        &self,
        known: ServerMethod,
        params: Option<Value>,
    ) -> std::result::Result<Value, RpcErrorObject> {
        match &self.request {
            Some(_) => self.dispatch_generic(known.as_str(), params).await,
            None => Err(RpcErrorObject::method_not_found(
                known.missing_handler_message(),
            )),
        }
    }

    async fn dispatch_generic(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, RpcErrorObject> {
        match &self.request {
            Some(h) => h(method.to_string(), params)
                .await
                .map_err(|e| RpcErrorObject::handler_failed(e.to_string())),
            None => Err(RpcErrorObject::method_not_found(format!(
                "No handler for {}",
                method
            ))),
        }
    }
}

fn or_empty(params: Option<Value>) -> Value {
    match params {
        Some(p) if !p.is_null() => p,
        _ => Value::Object(Map::new()),
    }
}

fn wrap_decision(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "decision": value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codexrpc_core::SERVER_ERROR;

    #[tokio::test]
    async fn test_approval_string_is_wrapped() {
        let handlers =
            ServerRequestHandlers::new().on_command_approval(|_| async move { Ok("accept") });
        let result = handlers
            .dispatch(COMMAND_APPROVAL_METHOD, Some(json!({"command": "ls"})))
            .await
            .unwrap();
        assert_eq!(result, json!({"decision": "accept"}));
    }

    #[tokio::test]
    async fn test_approval_object_passes_through() {
        let handlers = ServerRequestHandlers::new().on_file_change_approval(|_| async move {
            Ok(json!({"decision": "decline", "reason": "read only"}))
        });
        let result = handlers
            .dispatch(FILE_CHANGE_APPROVAL_METHOD, None)
            .await
            .unwrap();
        assert_eq!(result, json!({"decision": "decline", "reason": "read only"}));
    }

    #[tokio::test]
    async fn test_specific_handlers_get_empty_object_for_missing_params() {
        let handlers = ServerRequestHandlers::new().on_tool_input(|params| async move { Ok(params) });
        let result = handlers.dispatch(TOOL_INPUT_METHOD, None).await.unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn test_dynamic_tool_pair_is_normalized() {
        let handlers =
            ServerRequestHandlers::new().on_dynamic_tool(|_| async move { Ok(("42", true)) });
        let result = handlers.dispatch(DYNAMIC_TOOL_METHOD, None).await.unwrap();
        assert_eq!(result, json!({"output": "42", "success": true}));

        let handlers = ServerRequestHandlers::new()
            .on_dynamic_tool(|_| async move { Ok(json!({"contentItems": []})) });
        let result = handlers.dispatch(DYNAMIC_TOOL_METHOD, None).await.unwrap();
        assert_eq!(result, json!({"contentItems": []}));
    }

    #[tokio::test]
    async fn test_missing_specific_handler_messages() {
        let handlers = ServerRequestHandlers::new();
        for (method, message) in [
            (COMMAND_APPROVAL_METHOD, "No command approval handler"),
            (FILE_CHANGE_APPROVAL_METHOD, "No file-change approval handler"),
            (TOOL_INPUT_METHOD, "No tool input handler"),
            (DYNAMIC_TOOL_METHOD, "No dynamic tool handler"),
        ] {
            let err = handlers.dispatch(method, None).await.unwrap_err();
            assert_eq!(err.code, METHOD_NOT_FOUND);
            assert_eq!(err.message, message);
        }
    }

    #[tokio::test]
    async fn test_unknown_method_without_generic_handler() {
        let err = ServerRequestHandlers::new()
            .dispatch("custom/thing", None)
            .await
            .unwrap_err();
        assert_eq!(err, RpcErrorObject::method_not_found("No handler for custom/thing"));
    }

    #[tokio::test]
    async fn test_generic_handler_precedence() {
        let handlers = ServerRequestHandlers::new()
            .on_request(|method, _| async move { Ok(json!({"generic": method})) })
            .on_command_approval(|_| async move { Ok("accept") });

        // Specific handler wins for its own method
        let result = handlers.dispatch(COMMAND_APPROVAL_METHOD, None).await.unwrap();
        assert_eq!(result, json!({"decision": "accept"}));

        // Generic handler covers known methods without a specific handler
        let result = handlers.dispatch(TOOL_INPUT_METHOD, None).await.unwrap();
        assert_eq!(result, json!({"generic": TOOL_INPUT_METHOD}));

        let result = handlers.dispatch("custom/thing", None).await.unwrap();
        assert_eq!(result, json!({"generic": "custom/thing"}));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_server_error() {
        let handlers = ServerRequestHandlers::new()
            .on_command_approval(|_| async move { Err::<Value, _>("sandbox unavailable".into()) });
        let err = handlers
            .dispatch(COMMAND_APPROVAL_METHOD, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, SERVER_ERROR);
        assert_eq!(err.message, "sandbox unavailable");
        assert_eq!(DispatchOutcome::of(&Err(err)), DispatchOutcome::Failed);
    }

    #[test]
    fn test_server_method_round_trip() {
        for method in [
            ServerMethod::CommandApproval,
            ServerMethod::FileChangeApproval,
            ServerMethod::ToolInput,
            ServerMethod::DynamicTool,
        ] {
            assert_eq!(ServerMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(ServerMethod::parse("thread/start"), None);
    }
}
