use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use parlay_types::models::{Notification, NotificationPriority};

/// A notification's action payload. Most records store JSON; anything that
/// does not parse is kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    Json(Value),
    Raw(String),
}

impl ActionPayload {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(value) => Self::Json(value),
            Err(e) => {
                debug!("action payload is not JSON ({}), keeping raw value", e);
                Self::Raw(raw.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub notification_id: Uuid,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub action_type: Option<String>,
    pub action: Option<ActionPayload>,
}

impl Toast {
    pub fn from_notification(n: &Notification) -> Self {
        Self {
            notification_id: n.id,
            title: n.title.clone(),
            message: n.message.clone(),
            priority: n.priority,
            action_type: n.action_type.clone(),
            action: n.action_data.as_deref().map(ActionPayload::parse),
        }
    }
}

/// In-app banner presenter. Showing a toast is fire-and-forget.
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast);
}

/// Writes toasts to the log.
pub struct LogToastSink;

impl ToastSink for LogToastSink {
    fn show(&self, toast: Toast) {
        info!("[toast {:?}] {}: {}", toast.priority, toast.title, toast.message);
    }
}

/// Keeps every toast it is asked to show.
#[derive(Default)]
pub struct RecordingToastSink {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingToastSink {
    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ToastSink for RecordingToastSink {
    fn show(&self, toast: Toast) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_payload_is_parsed() {
        assert_eq!(
            ActionPayload::parse(r#"{"betId":"42"}"#),
            ActionPayload::Json(json!({"betId": "42"}))
        );
    }

    #[test]
    fn malformed_payload_falls_back_to_raw() {
        assert_eq!(
            ActionPayload::parse("bet:42"),
            ActionPayload::Raw("bet:42".into())
        );
    }
}
