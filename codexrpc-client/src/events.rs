//! Typed view of app-server notifications
//!
//! [`Event::from_notification`] never fails: missing or mistyped fields come
//! out as `None` (or an empty delta), and methods without a dedicated variant
//! become [`Event::Other`].

use codexrpc_core::Notification;
use serde::Deserialize;
use serde_json::Value;

pub const THREAD_STARTED: &str = "thread/started";
pub const TURN_STARTED: &str = "turn/started";
pub const TURN_COMPLETED: &str = "turn/completed";
pub const MESSAGE_DELTA: &str = "item/agentMessage/delta";
pub const MESSAGE_COMPLETED: &str = "item/agentMessage/completed";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnInfo {
    pub id: Option<String>,
    pub thread_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TurnParams {
    turn: TurnInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageDelta {
    pub delta: String,
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageCompleted {
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
    pub item_id: Option<String>,
    pub content: Option<String>,
}

/// Notification classified by method
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ThreadStarted { thread: Option<Value> },
    TurnStarted(TurnInfo),
    TurnCompleted(TurnInfo),
    MessageDelta(MessageDelta),
    MessageCompleted(MessageCompleted),
    Other(Notification),
}

fn lenient<T: for<'de> Deserialize<'de> + Default>(params: Option<&Value>) -> T {
    params
        .and_then(|p| serde_json::from_value(p.clone()).ok())
        .unwrap_or_default()
}

impl Event {
    pub fn from_notification(notification: &Notification) -> Self {
        let params = notification.params.as_ref();
        match notification.method.as_str() {
            THREAD_STARTED => Event::ThreadStarted {
                thread: params
                    .and_then(|p| p.get("thread"))
                    .filter(|t| !t.is_null())
                    .cloned(),
            },
            TURN_STARTED => Event::TurnStarted(lenient::<TurnParams>(params).turn),
            TURN_COMPLETED => Event::TurnCompleted(lenient::<TurnParams>(params).turn),
            MESSAGE_DELTA => Event::MessageDelta(lenient(params)),
            MESSAGE_COMPLETED => Event::MessageCompleted(lenient(params)),
            _ => Event::Other(notification.clone()),
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Event::ThreadStarted { .. } => THREAD_STARTED,
            Event::TurnStarted(_) => TURN_STARTED,
            Event::TurnCompleted(_) => TURN_COMPLETED,
            Event::MessageDelta(_) => MESSAGE_DELTA,
            Event::MessageCompleted(_) => MESSAGE_COMPLETED,
            Event::Other(n) => &n.method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_delta() {
        let note = Notification::new(
            MESSAGE_DELTA,
            Some(json!({"delta": "Hel", "threadId": "thr", "turnId": "t1", "itemId": "i1"})),
        );
        assert_eq!(
            Event::from_notification(&note),
            Event::MessageDelta(MessageDelta {
                delta: "Hel".into(),
                thread_id: Some("thr".into()),
                turn_id: Some("t1".into()),
                item_id: Some("i1".into()),
            })
        );
    }

    #[test]
    fn test_turn_completed() {
        let note = Notification::new(
            TURN_COMPLETED,
            Some(json!({"turn": {"id": "t1", "threadId": "thr", "status": "completed"}})),
        );
        match Event::from_notification(&note) {
            Event::TurnCompleted(turn) => {
                assert_eq!(turn.id.as_deref(), Some("t1"));
                assert_eq!(turn.status.as_deref(), Some("completed"));
            }
            other => panic!("Expected TurnCompleted, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_mistyped_fields_are_tolerated() {
        let note = Notification::new(TURN_STARTED, None);
        assert_eq!(
            Event::from_notification(&note),
            Event::TurnStarted(TurnInfo::default())
        );

        let note = Notification::new(MESSAGE_DELTA, Some(json!({"delta": 5})));
        assert_eq!(
            Event::from_notification(&note),
            Event::MessageDelta(MessageDelta::default())
        );
    }

    #[test]
    fn test_thread_started_and_other() {
        let note = Notification::new(THREAD_STARTED, Some(json!({"thread": {"id": "thr"}})));
        assert_eq!(
            Event::from_notification(&note),
            Event::ThreadStarted {
                thread: Some(json!({"id": "thr"}))
            }
        );

        let note = Notification::new("codex/event/task_started", None);
        let event = Event::from_notification(&note);
        assert_eq!(event.method(), "codex/event/task_started");
        assert!(matches!(event, Event::Other(_)));
    }
}
