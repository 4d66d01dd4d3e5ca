//! Pending request tracking
//!
//! Every outbound request gets a fresh integer id and a one-shot slot. The
//! reader task resolves the slot when the matching reply arrives; the caller
//! removes it itself when its timeout fires. Whichever side removes the slot
//! from the map first is the only one that can signal it, so a slot is never
//! resolved twice.
//!
//! Once the transport has died, [`RequestManager::fail_all`] resolves every
//! slot with the terminal error and remembers it: later registrations fail
//! immediately instead of waiting for a reply that can never come.

use codexrpc_core::{Error, RequestId, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Receiving half of a pending slot
pub type PendingReceiver = oneshot::Receiver<Result<Value>>;

#[derive(Default)]
struct PendingTable {
    slots: HashMap<RequestId, oneshot::Sender<Result<Value>>>,
    terminal: Option<Error>,
}

/// Id allocation and the id → slot table
#[derive(Clone, Default)]
pub struct RequestManager {
    table: Arc<Mutex<PendingTable>>,
    counter: Arc<AtomicI64>,
}

impl RequestManager {
    /// Create an empty manager; the first id handed out is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Register a slot for `id`
    ///
    /// Fails with the stored terminal error if the transport is already gone.
    pub async fn register(&self, id: RequestId) -> Result<PendingReceiver> {
        let mut table = self.table.lock().await;
        if let Some(err) = &table.terminal {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        table.slots.insert(id, tx);
        Ok(rx)
    }

    /// Resolve the slot for `id`; returns false if nobody is waiting
    pub async fn complete(&self, id: &RequestId, result: Result<Value>) -> bool {
        let slot = self.table.lock().await.slots.remove(id);
        match slot {
            Some(tx) => {
                // The caller may have given up between removal and send
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop the slot for `id` without signaling it
    pub async fn remove(&self, id: &RequestId) -> bool {
        self.table.lock().await.slots.remove(id).is_some()
    }

    /// Resolve every slot with `error` and refuse new registrations
    ///
    /// Only the first terminal error is kept. Returns how many slots were
    /// failed.
    pub async fn fail_all(&self, error: Error) -> usize {
        let mut table = self.table.lock().await;
        let slots: Vec<_> = table.slots.drain().map(|(_, tx)| tx).collect();
        let count = slots.len();
        for tx in slots {
            let _ = tx.send(Err(error.clone()));
        }
        if table.terminal.is_none() {
            table.terminal = Some(error);
        }
        count
    }

    /// Terminal error recorded by [`fail_all`](Self::fail_all), if any
    pub async fn terminal_error(&self) -> Option<Error> {
        self.table.lock().await.terminal.clone()
    }

    /// Number of requests still waiting
    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let manager = RequestManager::new();
        assert_eq!(manager.next_id(), RequestId::Number(1));
        assert_eq!(manager.next_id(), RequestId::Number(2));

        let shared = manager.clone();
        assert_eq!(shared.next_id(), RequestId::Number(3));
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let manager = RequestManager::new();
        let id = manager.next_id();

        let rx = manager.register(id.clone()).await.unwrap();
        assert_eq!(manager.pending_count().await, 1);

        assert!(manager.complete(&id, Ok(json!(42))).await);
        assert_eq!(manager.pending_count().await, 0);
        assert_eq!(rx.await.unwrap().unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_complete_is_once() {
        let manager = RequestManager::new();
        let id = RequestId::Number(7);
        let rx = manager.register(id.clone()).await.unwrap();

        assert!(manager.complete(&id, Ok(json!("first"))).await);
        assert!(!manager.complete(&id, Ok(json!("second"))).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_remove_then_late_reply() {
        let manager = RequestManager::new();
        let id = RequestId::Number(1);
        let _rx = manager.register(id.clone()).await.unwrap();

        assert!(manager.remove(&id).await);
        assert!(!manager.complete(&id, Ok(json!(null))).await);
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_all_and_terminal_error() {
        let manager = RequestManager::new();

        let rx1 = manager.register(RequestId::Number(1)).await.unwrap();
        let rx2 = manager.register(RequestId::Number(2)).await.unwrap();

        let failed = manager
            .fail_all(Error::Connection("transport closed".into()))
            .await;
        assert_eq!(failed, 2);
        assert_eq!(manager.pending_count().await, 0);
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());

        // The first terminal error sticks
        manager.fail_all(Error::Schema("later".into())).await;
        assert!(matches!(
            manager.terminal_error().await,
            Some(Error::Connection(_))
        ));
        assert!(matches!(
            manager.register(RequestId::Number(3)).await,
            Err(Error::Connection(_))
        ));
    }
}
