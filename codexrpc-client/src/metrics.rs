//! OpenTelemetry instruments for the app-server client
//!
//! | instrument                              | kind      | attributes        |
//! |-----------------------------------------|-----------|-------------------|
//! | `codexrpc.client.connection.state`      | gauge     |                   |
//! | `codexrpc.client.requests.total`        | counter   | method, status    |
//! | `codexrpc.client.request.duration`      | histogram | method, status    |
//! | `codexrpc.client.errors.total`          | counter   | error_type        |
//! | `codexrpc.client.notifications.received`| counter   | method            |
//! | `codexrpc.client.server_requests.total` | counter   | method, outcome   |
//! | `codexrpc.client.process.exits`         | counter   | exit_code         |
//!
//! Instruments are only created when observability is enabled on the
//! builder; they report through whatever meter provider is installed
//! globally.

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub notifications_received: Counter<u64>,
    pub server_requests_total: Counter<u64>,
    pub process_exits: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        // global::meter wants a 'static name; one leak per client is bounded
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("codexrpc.client.connection.state")
                .with_description(
                    "Connection state (0=disconnected, 1=connecting, 2=initializing, 3=ready, 4=failed, 5=closed)",
                )
                .build(),
            requests_total: meter
                .u64_counter("codexrpc.client.requests.total")
                .with_description("Total number of requests sent to the app-server")
                .build(),
            request_duration: meter
                .f64_histogram("codexrpc.client.request.duration")
                .with_description("Request round trip in seconds")
                .build(),
            errors_total: meter
                .u64_counter("codexrpc.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            notifications_received: meter
                .u64_counter("codexrpc.client.notifications.received")
                .with_description("Total number of notifications received")
                .build(),
            server_requests_total: meter
                .u64_counter("codexrpc.client.server_requests.total")
                .with_description("Server-initiated requests answered by the client")
                .build(),
            process_exits: meter
                .u64_counter("codexrpc.client.process.exits")
                .with_description("App-server process exits observed by the reader")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: &ConnectionState) {
        let value = match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Initializing => 2,
            ConnectionState::Ready => 3,
            ConnectionState::Failed(_) => 4,
            ConnectionState::Closed => 5,
        };
        self.connection_state.record(value, &[]);
    }

    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_server_request(&self, method: &str, outcome: &str) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.server_requests_total.add(1, attributes);
    }

    pub fn record_process_exit(&self, exit_code: Option<i32>) {
        let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        self.process_exits.add(1, &[KeyValue::new("exit_code", code)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ClientMetrics::new("test-client");

        metrics.update_connection_state(&ConnectionState::Ready);
        metrics.record_request("thread/start", "success", 0.05);
        metrics.record_error("decode");
        metrics.record_notification("turn/started");
        metrics.record_server_request("item/tool/call", "handled");
        metrics.record_process_exit(Some(1));
    }

    #[test]
    fn test_every_state_is_recordable() {
        let metrics = ClientMetrics::new("test-client-state");
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Initializing,
            ConnectionState::Ready,
            ConnectionState::Failed("gone".into()),
            ConnectionState::Closed,
        ] {
            metrics.update_connection_state(&state);
        }
        metrics.record_process_exit(None);
    }
}
