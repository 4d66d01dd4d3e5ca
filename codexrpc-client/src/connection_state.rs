//! Connection lifecycle tracking
//!
//! ```text
//! Disconnected → Connecting → Initializing → Ready → Closed
//!                     ↓             ↓          ↓
//!                   Failed  ←───────┴──────────┘
//! ```
//!
//! `Failed` records why the connection became unusable: a spawn failure, a
//! handshake failure, or the reader losing the transport. `Closed` is final;
//! nothing moves a closed connection anywhere else.

use crate::metrics::ClientMetrics;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, transport not started
    Disconnected,
    /// Transport starting
    Connecting,
    /// `initialize` handshake in flight
    Initializing,
    /// Handshake complete, traffic flowing
    Ready,
    /// Unusable; carries the reason
    Failed(String),
    /// Closed by the caller
    Closed,
}

impl ConnectionState {
    /// True once traffic is accepted
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// True for `Failed` and `Closed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed(_) | ConnectionState::Closed)
    }
}

/// Shared, clonable view of a connection's state
#[derive(Clone)]
pub struct StateTracker {
    state: Arc<RwLock<ConnectionState>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            metrics: None,
        }
    }

    /// Also report every transition to the connection state gauge
    pub fn with_metrics(mut self, metrics: Option<Arc<ClientMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Move to `new_state` unless the connection is already closed
    pub async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Closed {
            tracing::debug!(from = ?*state, to = ?new_state, "connection state change");
            if let Some(m) = &self.metrics {
                m.update_connection_state(&new_state);
            }
            *state = new_state;
        }
    }

    /// Move from `from` to `to` in one step; false if the state was elsewhere
    pub async fn transition(&self, from: &ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.write().await;
        if *state != *from {
            return false;
        }
        tracing::debug!(from = ?*state, to = ?to, "connection state change");
        if let Some(m) = &self.metrics {
            m.update_connection_state(&to);
        }
        *state = to;
        true
    }

    pub async fn connecting(&self) {
        self.set_state(ConnectionState::Connecting).await;
    }

    pub async fn initializing(&self) {
        self.set_state(ConnectionState::Initializing).await;
    }

    pub async fn ready(&self) {
        self.set_state(ConnectionState::Ready).await;
    }

    pub async fn failed(&self, reason: impl Into<String>) {
        self.set_state(ConnectionState::Failed(reason.into())).await;
    }

    /// Final transition; always applies
    pub async fn closed(&self) {
        *self.state.write().await = ConnectionState::Closed;
        if let Some(m) = &self.metrics {
            m.update_connection_state(&ConnectionState::Closed);
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.state().await, ConnectionState::Disconnected);

        tracker.connecting().await;
        assert_eq!(tracker.state().await, ConnectionState::Connecting);

        tracker.initializing().await;
        assert_eq!(tracker.state().await, ConnectionState::Initializing);

        tracker.ready().await;
        assert!(tracker.state().await.is_ready());

        tracker.closed().await;
        assert_eq!(tracker.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failure_reason_is_kept() {
        let tracker = StateTracker::new();
        tracker.ready().await;
        tracker.failed("codex app-server exited with code 1").await;

        let state = tracker.state().await;
        assert!(state.is_terminal());
        assert_eq!(
            state,
            ConnectionState::Failed("codex app-server exited with code 1".into())
        );
    }

    #[tokio::test]
    async fn test_transitions_with_metrics() {
        let metrics = Arc::new(ClientMetrics::new("test-state-tracker"));
        let tracker = StateTracker::new().with_metrics(Some(metrics));
        tracker.connecting().await;
        tracker.ready().await;
        tracker.closed().await;
        assert_eq!(tracker.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_transition_does_not_override_failure() {
        let tracker = StateTracker::new();
        tracker.initializing().await;
        tracker.failed("transport closed").await;

        let moved = tracker
            .transition(&ConnectionState::Initializing, ConnectionState::Ready)
            .await;
        assert!(!moved);
        assert_eq!(
            tracker.state().await,
            ConnectionState::Failed("transport closed".into())
        );

        let tracker = StateTracker::new();
        tracker.initializing().await;
        assert!(
            tracker
                .transition(&ConnectionState::Initializing, ConnectionState::Ready)
                .await
        );
        assert!(tracker.state().await.is_ready());
    }

    #[tokio::test]
    async fn test_closed_is_final() {
        let tracker = StateTracker::new();
        tracker.closed().await;
        tracker.failed("late reader error").await;
        tracker.ready().await;
        assert_eq!(tracker.state().await, ConnectionState::Closed);
    }
}
