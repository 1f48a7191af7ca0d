//! Diagnosis-key upload: dummy traffic and one-time code bookkeeping.

mod dummy;

pub use dummy::{
    abandon_sequence, cancel_sequence, end_session, schedule_if_necessary, should_continue,
    update_dummy_ingestion_window, DummyTrafficSequence, SequencePlan,
};

use serde::{Deserialize, Serialize};

use crate::calendar::Timestamp;
use crate::error::OtpError;
use crate::otp::{backoff_secs, remaining_backoff};
use crate::state::StateUpdate;
use crate::window::OpportunityWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionState {
    /// When the next dummy sequence may start.
    #[serde(default)]
    pub dummy_traffic_window: OpportunityWindow,
    #[serde(default)]
    pub dummy_traffic_sequence_scheduled_in_session: bool,
    #[serde(default = "cancelled_by_default")]
    pub is_dummy_traffic_sequence_cancelled: bool,
    #[serde(default)]
    pub otp_upload_failed_attempts: u32,
    #[serde(default)]
    pub last_otp_upload_failed_attempt: Option<Timestamp>,
}

fn cancelled_by_default() -> bool {
    true
}

impl Default for IngestionState {
    fn default() -> Self {
        Self {
            dummy_traffic_window: OpportunityWindow::distant_past(),
            dummy_traffic_sequence_scheduled_in_session: false,
            is_dummy_traffic_sequence_cancelled: true,
            otp_upload_failed_attempts: 0,
            last_otp_upload_failed_attempt: None,
        }
    }
}

// ── One-time code attempts ────────────────────────────────────────────

/// Refuse a new validation while a previous failure is backing off.
pub fn ensure_otp_attempt_allowed(state: &IngestionState, now: Timestamp) -> Result<(), OtpError> {
    match remaining_backoff(state, now) {
        Some(retry_after_secs) => Err(OtpError::BackingOff { retry_after_secs }),
        None => Ok(()),
    }
}

/// Updates recording a rejected code.
pub fn record_otp_failure(now: Timestamp) -> Vec<StateUpdate> {
    vec![StateUpdate::RecordOtpFailure(now)]
}

/// Error to surface once a rejection has been recorded in `state`.
pub fn verification_failure(state: &IngestionState) -> OtpError {
    OtpError::VerificationFailed {
        retry_after_secs: backoff_secs(state.otp_upload_failed_attempts),
    }
}

pub fn record_otp_success(state: &IngestionState) -> Vec<StateUpdate> {
    if state.otp_upload_failed_attempts == 0 && state.last_otp_upload_failed_attempt.is_none() {
        return Vec::new();
    }
    vec![StateUpdate::ResetOtpFailures]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn fresh_install_has_no_sequence_running() {
        let state = IngestionState::default();
        assert!(!state.dummy_traffic_sequence_scheduled_in_session);
        assert!(state.is_dummy_traffic_sequence_cancelled);
        let parsed: IngestionState = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn failures_back_off_exponentially() {
        let now = Utc.with_ymd_and_hms(2021, 2, 1, 10, 0, 0).unwrap();
        let mut app = AppState::default();
        assert!(ensure_otp_attempt_allowed(&app.ingestion, now).is_ok());

        app.apply_all(record_otp_failure(now));
        assert_eq!(
            verification_failure(&app.ingestion),
            OtpError::VerificationFailed { retry_after_secs: 5 }
        );
        assert_eq!(
            ensure_otp_attempt_allowed(&app.ingestion, now + Duration::seconds(2)),
            Err(OtpError::BackingOff { retry_after_secs: 3 })
        );
        assert!(ensure_otp_attempt_allowed(&app.ingestion, now + Duration::seconds(5)).is_ok());

        app.apply_all(record_otp_failure(now + Duration::seconds(6)));
        assert_eq!(
            verification_failure(&app.ingestion),
            OtpError::VerificationFailed { retry_after_secs: 10 }
        );
        assert_eq!(app.ingestion.otp_upload_failed_attempts, 2);

        app.apply_all(record_otp_success(&app.ingestion));
        assert_eq!(app.ingestion.otp_upload_failed_attempts, 0);
        assert!(record_otp_success(&app.ingestion).is_empty());
    }
}
