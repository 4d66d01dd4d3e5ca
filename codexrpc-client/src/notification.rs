//! Notification queue and observer
//!
//! Notifications from the app-server land in a bounded queue (capacity 100)
//! that the reader task writes and any number of [`NotificationQueue::stream`]
//! consumers drain. There is a single consumer position: concurrent streams
//! race for entries and each one sees a disjoint subset. Callers that need
//! every notification in several places must fan out themselves.
//!
//! When the queue is full the reader waits for room rather than dropping a
//! notification, which also pauses reply delivery until a consumer catches up.
//!
//! An optional observer callback sees each notification right after it is
//! queued. Observers run one at a time, in arrival order, on a task of their
//! own, so an observer may await [`AppServerClient::request`] without
//! stalling the reader. Notifications wait in an unbounded backlog while an
//! observer is busy.
//!
//! [`AppServerClient::request`]: crate::AppServerClient::request

use codexrpc_core::Notification;
use futures::stream::{self, BoxStream};
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Capacity of the notification queue
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 100;

/// Callback invoked with `(method, params)` for every notification
pub type NotificationFn =
    Arc<dyn Fn(String, Option<Value>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`NotificationFn`]
pub fn notification_fn<F, Fut>(f: F) -> NotificationFn
where
    F: Fn(String, Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |method, params| Box::pin(f(method, params)))
}

/// Consumer side of the notification queue
#[derive(Clone)]
pub struct NotificationQueue {
    receiver: Arc<Mutex<mpsc::Receiver<Notification>>>,
}

/// Producer side, owned by the reader task
///
/// Dropping it ends every consumer stream once the backlog is drained.
pub struct NotificationSender {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Create a connected producer/consumer pair
    pub fn new() -> (NotificationSender, NotificationQueue) {
        Self::with_capacity(NOTIFICATION_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (NotificationSender, NotificationQueue) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            NotificationSender { sender },
            NotificationQueue {
                receiver: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Receive the next notification, or `None` once the producer is gone
    pub async fn recv(&self) -> Option<Notification> {
        self.receiver.lock().await.recv().await
    }

    /// Ordered stream of notifications that ends when the producer is gone
    pub fn stream(&self) -> BoxStream<'static, Notification> {
        let queue = self.clone();
        Box::pin(stream::unfold(queue, |queue| async move {
            let next = queue.recv().await?;
            Some((next, queue))
        }))
    }
}

impl NotificationSender {
    /// Queue a notification, waiting for room if the queue is full
    ///
    /// Returns false if every consumer handle has been dropped.
    pub async fn send(&self, notification: Notification) -> bool {
        self.sender.send(notification).await.is_ok()
    }
}

/// Feeds the observer from the reader without waiting on it
pub(crate) struct ObserverTask {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ObserverTask {
    /// Start the task; it ends once this handle is dropped and the backlog
    /// has been observed
    pub(crate) fn spawn(observer: NotificationFn) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                let method = notification.method.clone();
                let observed = AssertUnwindSafe(observer(notification.method, notification.params))
                    .catch_unwind()
                    .await;
                if observed.is_err() {
                    tracing::warn!(method = %method, "notification observer panicked");
                }
            }
        });
        Self { sender }
    }

    pub(crate) fn observe(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::trace!("notification observer has stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_order_is_preserved() {
        let (tx, queue) = NotificationQueue::new();
        for i in 0..3 {
            assert!(tx.send(Notification::new("tick", Some(json!({"n": i})))).await);
        }
        drop(tx);

        let seen: Vec<_> = queue
            .stream()
            .map(|n| n.params.unwrap()["n"].as_i64().unwrap())
            .collect()
            .await;
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_stream_ends_when_producer_drops() {
        let (tx, queue) = NotificationQueue::new();
        let mut stream = queue.stream();
        drop(tx);
        assert!(stream.next().await.is_none());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_consumers_share_one_position() {
        let (tx, queue) = NotificationQueue::new();
        tx.send(Notification::new("a", None)).await;
        tx.send(Notification::new("b", None)).await;

        let mut first = queue.stream();
        let mut second = queue.stream();
        assert_eq!(first.next().await.unwrap().method, "a");
        assert_eq!(second.next().await.unwrap().method, "b");
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let (tx, queue) = NotificationQueue::with_capacity(1);
        assert!(tx.send(Notification::new("one", None)).await);

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            tx.send(Notification::new("two", None)),
        )
        .await;
        assert!(pending.is_err());

        assert_eq!(queue.recv().await.unwrap().method, "one");
        assert!(tx.send(Notification::new("two", None)).await);
    }

    #[tokio::test]
    async fn test_notification_fn_wrapper() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = notification_fn(move |method, _params| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(method);
            }
        });

        observer("turn/started".into(), None).await;
        assert_eq!(*seen.lock().await, vec!["turn/started".to_string()]);
    }

    #[tokio::test]
    async fn test_observer_task_keeps_order_and_survives_panics() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let observer = notification_fn(move |method, _params| {
            let done_tx = done_tx.clone();
            async move {
                if method == "explode" {
                    panic!("observer failure");
                }
                let _ = done_tx.send(method);
            }
        });

        let task = ObserverTask::spawn(observer);
        for method in ["a", "explode", "b", "c"] {
            task.observe(Notification::new(method, None));
        }
        drop(task);

        let mut seen = Vec::new();
        while let Some(method) = done_rx.recv().await {
            seen.push(method);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }
}
