//! Client configuration and builder
//!
//! [`ClientOptions`] describes how to launch the app-server and what to send
//! in the `initialize` handshake. [`ClientBuilder`] combines options with the
//! pluggable pieces (transport, handlers, schema validator, observability)
//! and produces a connected [`AppServerClient`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use codexrpc_client::{ClientBuilder, ClientOptions, ServerRequestHandlers};
//! use std::time::Duration;
//!
//! # async fn example() -> codexrpc_core::Result<()> {
//! let options = ClientOptions::new()
//!     .with_codex_path("/usr/local/bin/codex")
//!     .with_request_timeout(Some(Duration::from_secs(120)))
//!     .with_experimental_api(true);
//!
//! let client = ClientBuilder::new()
//!     .with_options(options)
//!     .handlers(
//!         ServerRequestHandlers::new()
//!             .on_command_approval(|_params| async move { Ok("accept") }),
//!     )
//!     .with_default_observability()
//!     .service_name("my-agent")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{AppServerClient, ClientParts};
use crate::handler::ServerRequestHandlers;
use crate::metrics::ClientMetrics;
use crate::schema::SchemaValidator;
use crate::transport::{StderrSink, SubprocessOptions, SubprocessTransport, Transport};
use codexrpc_core::{ObservabilityConfig, Result, DEFAULT_MAX_BUFFER_SIZE};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single request round trip
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Launch and handshake settings
#[derive(Clone)]
pub struct ClientOptions {
    /// Executable to run; looked up on `PATH` when not absolute
    pub codex_path: String,
    /// Extra arguments after `app-server`
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Environment overrides on top of the inherited environment
    pub env: HashMap<String, String>,
    /// Longest stdout tail tolerated without a newline
    pub max_buffer_size: usize,
    /// `clientInfo.name` in `initialize`
    pub client_name: String,
    /// `clientInfo.title` in `initialize`
    pub client_title: Option<String>,
    /// `clientInfo.version` in `initialize`
    pub client_version: String,
    /// Request `capabilities.experimentalApi`
    pub experimental_api: bool,
    /// Default per-request bound; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Receives stderr lines; stderr is inherited when unset
    pub stderr: Option<StderrSink>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            codex_path: "codex".to_string(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            client_name: "codexrpc".to_string(),
            client_title: None,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            experimental_api: false,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            stderr: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("codex_path", &self.codex_path)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .field("experimental_api", &self.experimental_api)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codex_path(mut self, path: impl Into<String>) -> Self {
        self.codex_path = path.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn with_client_info(
        mut self,
        name: impl Into<String>,
        title: Option<String>,
        version: impl Into<String>,
    ) -> Self {
        self.client_name = name.into();
        self.client_title = title;
        self.client_version = version.into();
        self
    }

    pub fn with_experimental_api(mut self, enable: bool) -> Self {
        self.experimental_api = enable;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stderr<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stderr = Some(Arc::new(sink));
        self
    }

    /// Settings for the default subprocess transport
    pub fn subprocess_options(&self) -> SubprocessOptions {
        SubprocessOptions {
            codex_path: self.codex_path.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            max_buffer_size: self.max_buffer_size,
            stderr: self.stderr.clone(),
        }
    }
}

/// Builder for [`AppServerClient`]
pub struct ClientBuilder {
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
    handlers: ServerRequestHandlers,
    validator: Option<Arc<dyn SchemaValidator>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            options: ClientOptions::default(),
            transport: None,
            handlers: ServerRequestHandlers::default(),
            validator: None,
            observability_config: None,
            service_name: None,
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom transport instead of spawning `codex app-server`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn handlers(mut self, handlers: ServerRequestHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Install tracing and OpenTelemetry exporters and record client metrics
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Start the transport, run the handshake and return the ready client
    pub async fn connect(self) -> Result<AppServerClient> {
        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }
            // A subscriber installed elsewhere is not a reason to refuse to connect
            if let Err(e) = codexrpc_core::init_observability(config.clone()) {
                tracing::warn!(error = %e, "observability setup failed");
            }
            Some(Arc::new(ClientMetrics::new(config.service_name)))
        } else {
            None
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(SubprocessTransport::new(self.options.subprocess_options())),
        };

        AppServerClient::start(ClientParts {
            options: self.options,
            transport,
            handlers: self.handlers,
            validator: self.validator,
            metrics,
        })
        .await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
