//! Application state tree and the update descriptions that mutate it.
//!
//! Components never touch the tree directly: they read a snapshot and return
//! [`StateUpdate`]s, which only the [`Store`](crate::store::Store) applies.

use serde::{Deserialize, Serialize};

use crate::analytics::{AnalyticsState, AnalyticsToken};
use crate::calendar::{CalendarDay, Timestamp};
use crate::exposure::{ExposureDetectionState, PositiveExposureResult};
use crate::ingestion::IngestionState;
use crate::province::Province;
use crate::status::CovidStatus;
use crate::window::OpportunityWindow;

/// Authorization state of the proximity-matching framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureNotificationStatus {
    #[default]
    Unknown,
    NotAuthorized,
    Restricted,
    Authorized,
    AuthorizedAndActive,
    AuthorizedAndInactive,
    AuthorizedAndBluetoothOff,
}

impl ExposureNotificationStatus {
    pub const ALL: [ExposureNotificationStatus; 7] = [
        ExposureNotificationStatus::Unknown,
        ExposureNotificationStatus::NotAuthorized,
        ExposureNotificationStatus::Restricted,
        ExposureNotificationStatus::Authorized,
        ExposureNotificationStatus::AuthorizedAndActive,
        ExposureNotificationStatus::AuthorizedAndInactive,
        ExposureNotificationStatus::AuthorizedAndBluetoothOff,
    ];

    pub fn can_perform_detection(&self) -> bool {
        matches!(
            self,
            ExposureNotificationStatus::Authorized
                | ExposureNotificationStatus::AuthorizedAndActive
                | ExposureNotificationStatus::AuthorizedAndInactive
        )
    }

    pub fn is_bluetooth_active(&self) -> bool {
        *self != ExposureNotificationStatus::AuthorizedAndBluetoothOff
    }
}

/// Authorization state of local notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushNotificationStatus {
    #[default]
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
}

impl PushNotificationStatus {
    pub const ALL: [PushNotificationStatus; 4] = [
        PushNotificationStatus::NotDetermined,
        PushNotificationStatus::Denied,
        PushNotificationStatus::Authorized,
        PushNotificationStatus::Provisional,
    ];

    pub fn allows_sending_notifications(&self) -> bool {
        matches!(
            self,
            PushNotificationStatus::Authorized | PushNotificationStatus::Provisional
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub covid_status: CovidStatus,
    /// Set at onboarding. Nothing is reported before it.
    #[serde(default)]
    pub province: Option<Province>,
    #[serde(default)]
    pub last_service_not_active_notification: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentState {
    #[serde(default)]
    pub exposure_notification_status: ExposureNotificationStatus,
    #[serde(default)]
    pub push_notification_status: PushNotificationStatus,
    #[serde(default)]
    pub is_in_foreground: bool,
}

/// One-shot flags.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TogglesState {
    #[serde(default)]
    pub is_wrongly_attributed_risk_status_checked: bool,
}

/// The whole persisted state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub user: UserState,
    #[serde(default)]
    pub environment: EnvironmentState,
    #[serde(default)]
    pub toggles: TogglesState,
    #[serde(default)]
    pub exposure_detection: ExposureDetectionState,
    #[serde(default)]
    pub analytics: AnalyticsState,
    #[serde(default)]
    pub ingestion: IngestionState,
}

/// A single change to the state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateUpdate {
    // user
    SetCovidStatus(CovidStatus),
    SetProvince(Option<Province>),
    SetLastServiceNotActiveNotification(Timestamp),

    // environment
    SetExposureNotificationStatus(ExposureNotificationStatus),
    SetPushNotificationStatus(PushNotificationStatus),
    SetInForeground(bool),

    // toggles
    MarkWronglyAttributedRiskChecked,

    // exposure detection
    SetLastDetectionDate(Timestamp),
    SetLatestProcessedKeyChunkIndex(u64),
    AppendPositiveExposureResult(PositiveExposureResult),
    /// Drop results dated strictly before the cutoff.
    PrunePositiveExposureResults { cutoff: Timestamp },

    // analytics
    SetEventWithExposureLastSent(CalendarDay),
    SetEventWithoutExposureLastSent(CalendarDay),
    SetEventWithoutExposureWindow(OpportunityWindow),
    SetAnalyticsDummyTrafficWindow(OpportunityWindow),
    SetAnalyticsToken(Option<AnalyticsToken>),

    // ingestion
    SetDummyIngestionWindow(OpportunityWindow),
    SetDummyTrafficSequenceScheduled(bool),
    SetDummyTrafficSequenceCancelled(bool),
    RecordOtpFailure(Timestamp),
    ResetOtpFailures,
}

impl AppState {
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::SetCovidStatus(status) => self.user.covid_status = status,
            StateUpdate::SetProvince(province) => self.user.province = province,
            StateUpdate::SetLastServiceNotActiveNotification(at) => {
                self.user.last_service_not_active_notification = Some(at)
            }

            StateUpdate::SetExposureNotificationStatus(status) => {
                self.environment.exposure_notification_status = status
            }
            StateUpdate::SetPushNotificationStatus(status) => {
                self.environment.push_notification_status = status
            }
            StateUpdate::SetInForeground(value) => self.environment.is_in_foreground = value,

            StateUpdate::MarkWronglyAttributedRiskChecked => {
                self.toggles.is_wrongly_attributed_risk_status_checked = true
            }

            StateUpdate::SetLastDetectionDate(at) => {
                self.exposure_detection.last_detection_date = Some(at)
            }
            StateUpdate::SetLatestProcessedKeyChunkIndex(index) => {
                self.exposure_detection.latest_processed_key_chunk_index = Some(index)
            }
            StateUpdate::AppendPositiveExposureResult(result) => self
                .exposure_detection
                .recent_positive_exposure_results
                .push(result),
            StateUpdate::PrunePositiveExposureResults { cutoff } => self
                .exposure_detection
                .recent_positive_exposure_results
                .retain(|r| r.date >= cutoff),

            StateUpdate::SetEventWithExposureLastSent(day) => {
                self.analytics.event_with_exposure_last_sent = day
            }
            StateUpdate::SetEventWithoutExposureLastSent(day) => {
                self.analytics.event_without_exposure_last_sent = day
            }
            StateUpdate::SetEventWithoutExposureWindow(window) => {
                self.analytics.event_without_exposure_window = window
            }
            StateUpdate::SetAnalyticsDummyTrafficWindow(window) => {
                self.analytics.dummy_traffic_window = window
            }
            StateUpdate::SetAnalyticsToken(token) => self.analytics.token = token,

            StateUpdate::SetDummyIngestionWindow(window) => {
                self.ingestion.dummy_traffic_window = window
            }
            StateUpdate::SetDummyTrafficSequenceScheduled(value) => {
                self.ingestion.dummy_traffic_sequence_scheduled_in_session = value
            }
            StateUpdate::SetDummyTrafficSequenceCancelled(value) => {
                self.ingestion.is_dummy_traffic_sequence_cancelled = value
            }
            StateUpdate::RecordOtpFailure(at) => {
                self.ingestion.otp_upload_failed_attempts += 1;
                self.ingestion.last_otp_upload_failed_attempt = Some(at);
            }
            StateUpdate::ResetOtpFailures => {
                self.ingestion.otp_upload_failed_attempts = 0;
                self.ingestion.last_otp_upload_failed_attempt = None;
            }
        }
    }

    /// Apply updates in order.
    pub fn apply_all(&mut self, updates: impl IntoIterator<Item = StateUpdate>) {
        for update in updates {
            self.apply(update);
        }
    }

    /// Copy of `self` with `updates` applied.
    pub fn with_updates(&self, updates: &[StateUpdate]) -> AppState {
        let mut next = self.clone();
        next.apply_all(updates.iter().cloned());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn default_state_matches_fresh_install() {
        let state = AppState::default();
        assert_eq!(state.user.covid_status, CovidStatus::Neutral);
        assert!(state.user.province.is_none());
        assert!(!state.toggles.is_wrongly_attributed_risk_status_checked);
        assert!(!state.ingestion.dummy_traffic_sequence_scheduled_in_session);
        assert!(state.ingestion.is_dummy_traffic_sequence_cancelled);
        assert_eq!(state.analytics.event_with_exposure_last_sent, CalendarDay::DISTANT_PAST);
    }

    #[test]
    fn updates_apply_in_order() {
        let mut state = AppState::default();
        state.apply_all([
            StateUpdate::SetDummyTrafficSequenceScheduled(true),
            StateUpdate::SetDummyTrafficSequenceCancelled(false),
            StateUpdate::SetDummyTrafficSequenceScheduled(false),
        ]);
        assert!(!state.ingestion.dummy_traffic_sequence_scheduled_in_session);
        assert!(!state.ingestion.is_dummy_traffic_sequence_cancelled);
    }

    #[test]
    fn otp_failures_accumulate_and_reset() {
        let at = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let mut state = AppState::default();
        state.apply(StateUpdate::RecordOtpFailure(at));
        state.apply(StateUpdate::RecordOtpFailure(at));
        assert_eq!(state.ingestion.otp_upload_failed_attempts, 2);
        state.apply(StateUpdate::ResetOtpFailures);
        assert_eq!(state.ingestion.otp_upload_failed_attempts, 0);
        assert!(state.ingestion.last_otp_upload_failed_attempt.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let state: AppState =
            serde_json::from_str(r#"{"user": {"covid_status": {"type": "neutral"}}}"#).unwrap();
        assert_eq!(state, AppState::default());
    }

    #[test]
    fn with_updates_leaves_original_untouched() {
        let state = AppState::default();
        let next = state.with_updates(&[StateUpdate::MarkWronglyAttributedRiskChecked]);
        assert!(!state.toggles.is_wrongly_attributed_risk_status_checked);
        assert!(next.toggles.is_wrongly_attributed_risk_status_checked);
    }

    #[test]
    fn statuses_gate_reports() {
        assert!(ExposureNotificationStatus::AuthorizedAndActive.can_perform_detection());
        assert!(!ExposureNotificationStatus::AuthorizedAndBluetoothOff.can_perform_detection());
        assert!(!ExposureNotificationStatus::AuthorizedAndBluetoothOff.is_bluetooth_active());
        assert!(PushNotificationStatus::Provisional.allows_sending_notifications());
        assert!(!PushNotificationStatus::Denied.allows_sending_notifications());
    }
}
