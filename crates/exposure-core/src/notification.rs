use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::status::{POSITIVE_UPDATE_STATUS_NOTIFICATION_ID, RISK_REMINDER_NOTIFICATION_ID};

/// Shown when detection cannot run because the service was switched off.
pub const SERVICE_NOT_ACTIVE_NOTIFICATION_ID: &str =
    "exposure_detection_not_authorized_notification_id";

/// Seconds before the "service not active" notification fires.
pub const SERVICE_NOT_ACTIVE_DELAY_SECS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RiskReminder,
    PositiveUpdateReminder,
    ServiceNotActive,
}

impl NotificationKind {
    /// Stable identifier; scheduling again under the same id replaces the
    /// pending notification.
    pub fn id(&self) -> &'static str {
        match self {
            NotificationKind::RiskReminder => RISK_REMINDER_NOTIFICATION_ID,
            NotificationKind::PositiveUpdateReminder => POSITIVE_UPDATE_STATUS_NOTIFICATION_ID,
            NotificationKind::ServiceNotActive => SERVICE_NOT_ACTIVE_NOTIFICATION_ID,
        }
    }
}

/// A local notification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalNotification {
    pub kind: NotificationKind,
    /// Seconds from now until the first delivery.
    pub after_secs: f64,
    pub repeat_every_secs: Option<f64>,
}

impl LocalNotification {
    pub fn once(kind: NotificationKind, after_secs: f64) -> Self {
        Self {
            kind,
            after_secs,
            repeat_every_secs: None,
        }
    }

    pub fn repeating(kind: NotificationKind, every_secs: f64) -> Self {
        Self {
            kind,
            after_secs: every_secs,
            repeat_every_secs: Some(every_secs),
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }
}

/// Platform local-notification center.
pub trait NotificationScheduler: Send + Sync {
    /// Schedule, replacing any pending notification with the same id.
    fn schedule(&self, notification: LocalNotification);

    /// Remove pending notifications. Unknown ids are ignored.
    fn cancel(&self, ids: &[&str]);
}

/// Keeps pending notifications in memory, keyed by id.
#[derive(Default)]
pub struct InMemoryNotificationScheduler {
    pending: Mutex<BTreeMap<String, LocalNotification>>,
}

impl InMemoryNotificationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<LocalNotification> {
        self.lock().values().cloned().collect()
    }

    pub fn is_pending(&self, kind: NotificationKind) -> bool {
        self.lock().contains_key(kind.id())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, LocalNotification>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NotificationScheduler for InMemoryNotificationScheduler {
    fn schedule(&self, notification: LocalNotification) {
        self.lock().insert(notification.id().to_string(), notification);
    }

    fn cancel(&self, ids: &[&str]) {
        let mut pending = self.lock();
        for id in ids {
            pending.remove(*id);
        }
    }
}
