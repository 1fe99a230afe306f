//! Notification sink for user-visible outcomes (toasts in a browser front-end).

use serde::Serialize;
use tracing::{error, info};

use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Fire-and-forget sink. Nothing is returned to the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotificationKind, message: &str);

    fn info(&self, message: &str) {
        self.notify(NotificationKind::Info, message);
    }

    fn success(&self, message: &str) {
        self.notify(NotificationKind::Success, message);
    }

    fn error(&self, message: &str) {
        self.notify(NotificationKind::Error, message);
    }
}

/// Broadcasts every notification to the bus's subscribers.
impl NotificationSink for EventBus<Notification> {
    fn notify(&self, kind: NotificationKind, message: &str) {
        self.emit(&Notification {
            kind,
            message: message.to_string(),
        });
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Error => error!(target: "notify", "{}", message),
            _ => info!(target: "notify", "{}", message),
        }
    }
}
