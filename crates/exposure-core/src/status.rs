//! Epidemiological status machine.
//!
//! `transition` is pure: it maps the current status and an event to the next
//! status plus the effects to run on leaving and entering a case. Effects fire
//! only when the case changes; a date refresh inside `Risk` is silent.
//!
//! ## State Transitions
//!
//! ```text
//! Neutral --contact--> Risk --upload--> Positive
//!    ^                  |                  |
//!    +---- dismissal / recovery -----------+
//! ```

use serde::{Deserialize, Serialize};

use crate::calendar::CalendarDay;

/// Reminder shown periodically while at risk.
pub const RISK_REMINDER_NOTIFICATION_ID: &str = "risk_reminder_notification_id";
/// Reminder to update the status after a positive upload.
pub const POSITIVE_UPDATE_STATUS_NOTIFICATION_ID: &str = "positive_update_status_notification_id";

/// Repeat interval (s) of the positive-status reminder: the alert period.
pub const POSITIVE_REMINDER_PERIOD_SECS: f64 = 14.0 * 86_400.0;

/// The user's status. Exactly one exists at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CovidStatus {
    #[default]
    Neutral,
    Risk {
        #[serde(rename = "date")]
        last_contact_day: CalendarDay,
    },
    Positive {
        #[serde(rename = "date")]
        last_upload_day: CalendarDay,
    },
}

/// Status without its associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCase {
    Neutral,
    Risk,
    Positive,
}

/// Events initiated by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEvent {
    /// Risk or positive alert dismissed.
    AlertDismissal,
    /// User confirmed recovery.
    RecoverConfirmed,
}

/// Input of the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CovidEvent {
    ContactDetected(CalendarDay),
    DataUpload(CalendarDay),
    User(UserEvent),
}

/// Side effect attached to leaving or entering a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEffect {
    CancelRiskReminder,
    /// Repeating reminder; only scheduled when push is allowed and the app is in background.
    ScheduleRiskReminder,
    CancelPositiveReminder,
    /// Repeating reminder; only scheduled when push is allowed.
    SchedulePositiveReminder,
}

/// Result of [`transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: CovidStatus,
    pub leaving: Vec<StatusEffect>,
    pub entering: Vec<StatusEffect>,
}

impl Transition {
    /// Leaving effects followed by entering effects.
    pub fn effects(&self) -> impl Iterator<Item = StatusEffect> + '_ {
        self.leaving.iter().chain(self.entering.iter()).copied()
    }

    pub fn changes_case(&self, from: &CovidStatus) -> bool {
        from.case() != self.next.case()
    }
}

impl CovidStatus {
    // ── Queries ──────────────────────────────────────────────────────

    pub fn case(&self) -> StatusCase {
        match self {
            CovidStatus::Neutral => StatusCase::Neutral,
            CovidStatus::Risk { .. } => StatusCase::Risk,
            CovidStatus::Positive { .. } => StatusCase::Positive,
        }
    }

    pub fn is_risk(&self) -> bool {
        matches!(self, CovidStatus::Risk { .. })
    }

    // ── Effects ──────────────────────────────────────────────────────

    pub fn leaving_effects(&self) -> Vec<StatusEffect> {
        match self {
            CovidStatus::Neutral => Vec::new(),
            CovidStatus::Risk { .. } => vec![StatusEffect::CancelRiskReminder],
            CovidStatus::Positive { .. } => vec![StatusEffect::CancelPositiveReminder],
        }
    }

    pub fn entering_effects(&self) -> Vec<StatusEffect> {
        match self {
            CovidStatus::Neutral => Vec::new(),
            CovidStatus::Risk { .. } => vec![StatusEffect::ScheduleRiskReminder],
            CovidStatus::Positive { .. } => vec![StatusEffect::SchedulePositiveReminder],
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Next status for `event`, ignoring effects.
    pub fn next(&self, event: &CovidEvent) -> CovidStatus {
        match (*self, *event) {
            (CovidStatus::Neutral, CovidEvent::ContactDetected(day)) => CovidStatus::Risk {
                last_contact_day: day,
            },
            (CovidStatus::Neutral, CovidEvent::DataUpload(day)) => CovidStatus::Positive {
                last_upload_day: day,
            },
            (CovidStatus::Neutral, CovidEvent::User(_)) => CovidStatus::Neutral,

            (CovidStatus::Risk { last_contact_day }, CovidEvent::ContactDetected(day)) => {
                CovidStatus::Risk {
                    last_contact_day: last_contact_day.max(day),
                }
            }
            (CovidStatus::Risk { .. }, CovidEvent::DataUpload(day)) => CovidStatus::Positive {
                last_upload_day: day,
            },
            (CovidStatus::Risk { .. }, CovidEvent::User(_)) => CovidStatus::Neutral,

            (CovidStatus::Positive { .. }, CovidEvent::User(_)) => CovidStatus::Neutral,
            (
                CovidStatus::Positive { .. },
                CovidEvent::ContactDetected(_) | CovidEvent::DataUpload(_),
            ) => *self,
        }
    }
}

/// Effects of moving from `current` to `next`. Empty when the case is unchanged.
pub fn effects_between(
    current: &CovidStatus,
    next: &CovidStatus,
) -> (Vec<StatusEffect>, Vec<StatusEffect>) {
    if current.case() == next.case() {
        return (Vec::new(), Vec::new());
    }
    (current.leaving_effects(), next.entering_effects())
}

/// Apply `event` to `current`.
pub fn transition(current: &CovidStatus, event: &CovidEvent) -> Transition {
    let next = current.next(event);
    let (leaving, entering) = effects_between(current, &next);
    Transition {
        next,
        leaving,
        entering,
    }
}
