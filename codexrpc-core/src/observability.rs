//! Tracing and OpenTelemetry setup
//!
//! The client crates only emit `tracing` events and OpenTelemetry
//! instruments; nothing leaves the process until the host installs a
//! subscriber. [`init_observability`] is the batteries-included way to do
//! that: OTLP/gRPC export of spans and metrics plus log lines on stderr.
//! Stdout is left alone, since hosts driving the app-server often speak their
//! own protocol there.
//!
//! ```rust,no_run
//! use codexrpc_core::{LogFormat, ObservabilityConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = ObservabilityConfig::new("my-agent")
//!     .with_endpoint("http://localhost:4317")
//!     .with_sample_ratio(0.25)
//!     .with_log_format(Some(LogFormat::Pretty))
//!     .with_log_level("codexrpc_client=debug,info");
//! codexrpc_core::init_observability(config)?;
//! # Ok(())
//! # }
//! ```
//!
//! The filter is taken from `CODEXRPC_LOG`, then `RUST_LOG`, then
//! [`ObservabilityConfig::log_level`]. Call [`init_observability`] at most
//! once per process; the global providers cannot be replaced.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type InitResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "CODEXRPC_LOG";

const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Shape of the stderr log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line human readable output
    Pretty,
}

/// What to export and where
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub service_version: String,
    /// OTLP gRPC collector endpoint
    pub otlp_endpoint: String,
    pub export_traces: bool,
    pub export_metrics: bool,
    /// Fraction of root spans kept, clamped to `0.0..=1.0`
    pub sample_ratio: f64,
    pub metrics_interval: Duration,
    /// Stderr log lines; `None` disables them
    pub log_format: Option<LogFormat>,
    /// Fallback filter directive
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "codexrpc".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            export_traces: true,
            export_metrics: true,
            sample_ratio: 1.0,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            log_format: Some(LogFormat::Json),
            log_level: "info".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.export_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.export_metrics = enable;
        self
    }

    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn with_log_format(mut self, format: Option<LogFormat>) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Nothing exported, no log lines; only the filter is installed
    pub fn disabled(service_name: impl Into<String>) -> Self {
        Self::new(service_name)
            .with_traces(false)
            .with_metrics(false)
            .with_log_format(None)
    }

    fn sampler(&self) -> Sampler {
        if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(self.sample_ratio)))
        }
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, self.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, self.service_version.clone()),
            ])
            .build()
    }

    fn env_filter(&self) -> InitResult<EnvFilter> {
        let directive = std::env::var(LOG_ENV)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| self.log_level.clone());
        Ok(EnvFilter::try_new(directive)?)
    }
}

/// Install the global providers and the `tracing` subscriber
///
/// # Errors
///
/// Fails if an exporter cannot be built, if the filter directive does not
/// parse, or if a global subscriber is already set.
pub fn init_observability(config: ObservabilityConfig) -> InitResult<()> {
    let tracer = if config.export_traces {
        Some(install_tracer(&config)?)
    } else {
        None
    };
    if config.export_metrics {
        install_meter(&config)?;
    }

    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
    let log_layer = config.log_format.map(|format| {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);
        match format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
        }
    });

    tracing_subscriber::registry()
        .with(config.env_filter()?)
        .with(otel_layer)
        .with(log_layer)
        .try_init()?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.export_traces,
        metrics = config.export_metrics,
        sample_ratio = config.sample_ratio,
        "observability initialized"
    );
    Ok(())
}

fn install_tracer(config: &ObservabilityConfig) -> InitResult<Tracer> {
    use opentelemetry::trace::TracerProvider as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;
    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(config.sampler())
        .with_resource(config.resource())
        .build();

    // Taken before the provider moves into the global slot
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);
    Ok(tracer)
}

fn install_meter(config: &ObservabilityConfig) -> InitResult<()> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    global::set_meter_provider(
        SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(config.resource())
            .build(),
    );
    Ok(())
}

/// Mark the end of the process' telemetry in the log stream
///
/// SDK providers flush when dropped. Safe to call more than once.
pub fn shutdown_observability() {
    tracing::info!("observability shutting down");
}
