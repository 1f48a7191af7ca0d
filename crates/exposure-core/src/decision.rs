//! The decision core: one operation per external trigger.
//!
//! Every operation reads an [`AppState`] snapshot and returns a [`Dispatch`]:
//! the state updates to commit, in order, followed by fire-and-forget effects.
//! Nothing here touches the network, the clock or shared memory directly; time
//! and randomness come from the injected [`RandomnessPort`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analytics::{self, AnalyticsRecord, AnalyticsToken};
use crate::calendar::{CalendarDay, Timestamp};
use crate::config::{ConfigProvider, Configuration};
use crate::error::{ExposureDetectionError, OtpError};
use crate::exposure::{
    correct_wrongly_attributed_risk, prune_outdated_results, reduce, ExposureDetectionOutcome,
};
use crate::ingestion::{
    self, cancel_sequence, end_session, schedule_if_necessary, update_dummy_ingestion_window,
};
use crate::matcher::DetectionRequest;
use crate::notification::{LocalNotification, NotificationKind, SERVICE_NOT_ACTIVE_DELAY_SECS};
use crate::random::RandomnessPort;
use crate::state::{AppState, ExposureNotificationStatus, PushNotificationStatus, StateUpdate};
use crate::status::{
    effects_between, transition, CovidEvent, CovidStatus, StatusEffect, UserEvent,
    POSITIVE_REMINDER_PERIOD_SECS,
};

/// A side effect requested by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    ScheduleNotification { notification: LocalNotification },
    CancelNotifications { kinds: Vec<NotificationKind> },
    /// Best effort, authorized by `token`. Dummy records send a random token
    /// of the same length instead.
    SendAnalytics { record: AnalyticsRecord, token: String },
    /// Submit `token` to the backend and store its verdict.
    ValidateAnalyticsToken { token: AnalyticsToken },
    StartDummySequence { start_delay: f64 },
}

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dispatch {
    pub updates: Vec<StateUpdate>,
    pub effects: Vec<Effect>,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.effects.is_empty()
    }

    fn with_updates(updates: Vec<StateUpdate>) -> Self {
        Self {
            updates,
            effects: Vec::new(),
        }
    }

    fn merge(&mut self, other: Dispatch) {
        self.updates.extend(other.updates);
        self.effects.extend(other.effects);
    }
}

/// Pure decision core parameterised by configuration and randomness.
#[derive(Clone)]
pub struct ExposureCore {
    config: Arc<ConfigProvider>,
    rng: Arc<dyn RandomnessPort>,
}

impl ExposureCore {
    pub fn new(config: Arc<ConfigProvider>, rng: Arc<dyn RandomnessPort>) -> Self {
        Self { config, rng }
    }

    pub fn config(&self) -> Arc<Configuration> {
        self.config.snapshot()
    }

    pub fn now(&self) -> Timestamp {
        self.rng.now()
    }

    // ── Detection ────────────────────────────────────────────────────

    /// Parameters of the next detection cycle. A foreground session forces a
    /// full run once the last detection is older than the maximum waiting time.
    pub fn detection_request(&self, state: &AppState) -> DetectionRequest {
        let config = self.config.snapshot();
        let now = self.rng.now();
        let detection = &state.exposure_detection;
        let force_run = state.environment.is_in_foreground
            && detection.last_detection_date.map_or(true, |last| {
                (now - last).num_seconds() as f64 >= config.maximum_exposure_detection_waiting_time
            });
        DetectionRequest {
            period: config.exposure_detection_period,
            last_detection_date: detection.last_detection_date,
            last_processed_chunk: detection.latest_processed_key_chunk_index,
            minimum_risk_score: config.exposure_info_minimum_risk_score,
            force_run,
            now,
        }
    }

    /// A detection cycle finished.
    pub fn on_detection_outcome(
        &self,
        state: &AppState,
        outcome: &ExposureDetectionOutcome,
    ) -> Dispatch {
        let config = self.config.snapshot();
        let now = self.rng.now();
        let mut dispatch = Dispatch::default();

        let reduction = reduce(outcome, &config);
        dispatch.updates.extend(reduction.updates);
        if let Some(event) = reduction.event {
            let status = self.status_dispatch(state, &config, &event);
            dispatch.updates.extend(status.updates);
            dispatch.effects.extend(status.effects);
        }

        if outcome.error() == Some(ExposureDetectionError::NotAuthorized) {
            dispatch.merge(service_not_active(state, &config, now));
        }

        let mut working = state.with_updates(&dispatch.updates);
        if let Some(update) =
            analytics::update_without_exposure_window(&working.analytics, self.rng.as_ref(), now)
        {
            working.apply(update.clone());
            dispatch.updates.push(update);
        }
        let sampling = analytics::sample(outcome, &working, &config, self.rng.as_ref());
        dispatch.updates.extend(sampling.updates);
        if let (Some(record), Some(token)) = (sampling.record, &working.analytics.token) {
            dispatch.effects.push(Effect::SendAnalytics {
                record,
                token: token.token.clone(),
            });
        }
        dispatch
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// First run of the process: housekeeping that must not wait for a session.
    pub fn on_app_launch(&self, state: &AppState) -> Dispatch {
        let config = self.config.snapshot();
        let now = self.rng.now();
        let mut dispatch = Dispatch::with_updates(prune_outdated_results(
            &state.exposure_detection,
            now,
        ));

        let working = state.with_updates(&dispatch.updates);
        let migration =
            correct_wrongly_attributed_risk(&working, config.exposure_info_minimum_risk_score, now);
        let migrated = working.with_updates(&migration);
        let (leaving, entering) =
            effects_between(&working.user.covid_status, &migrated.user.covid_status);
        dispatch.updates.extend(migration);
        dispatch
            .effects
            .extend(notification_effects(leaving.into_iter().chain(entering), &migrated, &config));

        dispatch.updates.extend(self.window_updates(&migrated, &config, now));
        dispatch.merge(self.analytics_token_dispatch(state, now));
        dispatch
    }

    pub fn on_foreground_session_started(&self, state: &AppState) -> Dispatch {
        let config = self.config.snapshot();
        let now = self.rng.now();
        let mut dispatch = Dispatch::with_updates(vec![StateUpdate::SetInForeground(true)]);
        dispatch
            .updates
            .extend(prune_outdated_results(&state.exposure_detection, now));

        let mut working = state.with_updates(&dispatch.updates);
        let windows = self.window_updates(&working, &config, now);
        working.apply_all(windows.iter().cloned());
        dispatch.updates.extend(windows);

        let plan = schedule_if_necessary(&working.ingestion, &config, self.rng.as_ref(), now);
        dispatch.updates.extend(plan.updates);
        if let Some(start_delay) = plan.start_delay {
            tracing::debug!(start_delay, "dummy traffic sequence scheduled");
            dispatch
                .effects
                .push(Effect::StartDummySequence { start_delay });
        }
        dispatch.merge(self.analytics_token_dispatch(&working, now));
        dispatch
    }

    pub fn on_foreground_session_ended(&self, _state: &AppState) -> Dispatch {
        let mut updates = end_session();
        updates.push(StateUpdate::SetInForeground(false));
        Dispatch::with_updates(updates)
    }

    /// The dummy sequences of this session were dropped without running.
    pub fn on_dummy_sequences_abandoned(&self, _state: &AppState) -> Dispatch {
        Dispatch::with_updates(ingestion::abandon_sequence())
    }

    /// The user opened the genuine upload flow; stop any dummy sequence.
    pub fn on_genuine_upload_started(&self, _state: &AppState) -> Dispatch {
        Dispatch::with_updates(cancel_sequence())
    }

    pub fn on_permissions_changed(
        &self,
        state: &AppState,
        exposure: ExposureNotificationStatus,
        push: PushNotificationStatus,
    ) -> Dispatch {
        let mut updates = Vec::new();
        if state.environment.exposure_notification_status != exposure {
            updates.push(StateUpdate::SetExposureNotificationStatus(exposure));
        }
        if state.environment.push_notification_status != push {
            updates.push(StateUpdate::SetPushNotificationStatus(push));
        }
        Dispatch::with_updates(updates)
    }

    /// Replace a missing or expired analytics token and submit any token the
    /// backend has not confirmed yet. Also part of launch and foreground.
    pub fn on_analytics_token_check(&self, state: &AppState) -> Dispatch {
        self.analytics_token_dispatch(state, self.rng.now())
    }

    // ── Status events ────────────────────────────────────────────────

    /// Diagnosis keys were uploaded successfully on `day`.
    pub fn on_data_uploaded(&self, state: &AppState, day: CalendarDay) -> Dispatch {
        let config = self.config.snapshot();
        let mut dispatch = self.status_dispatch(state, &config, &CovidEvent::DataUpload(day));
        dispatch.updates.extend(ingestion::record_otp_success(&state.ingestion));
        dispatch
    }

    pub fn on_user_event(&self, state: &AppState, event: UserEvent) -> Dispatch {
        let config = self.config.snapshot();
        self.status_dispatch(state, &config, &CovidEvent::User(event))
    }

    // ── One-time codes ───────────────────────────────────────────────

    /// Whether a validation may be attempted now.
    pub fn check_otp_attempt(&self, state: &AppState) -> Result<(), OtpError> {
        ingestion::ensure_otp_attempt_allowed(&state.ingestion, self.rng.now())
    }

    pub fn on_otp_validation_failed(&self, _state: &AppState) -> Dispatch {
        Dispatch::with_updates(ingestion::record_otp_failure(self.rng.now()))
    }

    /// Error for a rejection already committed to `state`.
    pub fn otp_failure(&self, state: &AppState) -> OtpError {
        ingestion::verification_failure(&state.ingestion)
    }

    pub fn on_otp_validation_succeeded(&self, state: &AppState) -> Dispatch {
        Dispatch::with_updates(ingestion::record_otp_success(&state.ingestion))
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn status_dispatch(
        &self,
        state: &AppState,
        config: &Configuration,
        event: &CovidEvent,
    ) -> Dispatch {
        let current = state.user.covid_status;
        let transition = transition(&current, event);
        if transition.next == current {
            return Dispatch::default();
        }
        if transition.changes_case(&current) {
            tracing::info!(from = ?current.case(), to = ?transition.next.case(), "covid status changed");
        }
        let updates = vec![StateUpdate::SetCovidStatus(transition.next)];
        let next_state = state.with_updates(&updates);
        Dispatch {
            effects: notification_effects(transition.effects(), &next_state, config),
            updates,
        }
    }

    fn analytics_token_dispatch(&self, state: &AppState, now: Timestamp) -> Dispatch {
        let refresh = analytics::refresh_token_if_needed(&state.analytics, self.rng.as_ref(), now);
        Dispatch {
            updates: refresh.updates,
            effects: refresh
                .validate
                .map(|token| Effect::ValidateAnalyticsToken { token })
                .into_iter()
                .collect(),
        }
    }

    fn window_updates(
        &self,
        state: &AppState,
        config: &Configuration,
        now: Timestamp,
    ) -> Vec<StateUpdate> {
        let rng = self.rng.as_ref();
        analytics::update_without_exposure_window(&state.analytics, rng, now)
            .into_iter()
            .chain(update_dummy_ingestion_window(&state.ingestion, config, rng, now))
            .collect()
    }
}

/// Map status effects to notification requests, honouring the push
/// permission. The risk reminder is only scheduled while in background.
fn notification_effects(
    effects: impl IntoIterator<Item = StatusEffect>,
    state: &AppState,
    config: &Configuration,
) -> Vec<Effect> {
    let push_allowed = state
        .environment
        .push_notification_status
        .allows_sending_notifications();
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            StatusEffect::CancelRiskReminder => Some(Effect::CancelNotifications {
                kinds: vec![NotificationKind::RiskReminder],
            }),
            StatusEffect::CancelPositiveReminder => Some(Effect::CancelNotifications {
                kinds: vec![NotificationKind::PositiveUpdateReminder],
            }),
            StatusEffect::ScheduleRiskReminder => (push_allowed
                && !state.environment.is_in_foreground)
                .then(|| Effect::ScheduleNotification {
                    notification: LocalNotification::repeating(
                        NotificationKind::RiskReminder,
                        config.risk_reminder_notification_period,
                    ),
                }),
            StatusEffect::SchedulePositiveReminder => push_allowed.then(|| {
                Effect::ScheduleNotification {
                    notification: LocalNotification::repeating(
                        NotificationKind::PositiveUpdateReminder,
                        POSITIVE_REMINDER_PERIOD_SECS,
                    ),
                }
            }),
        })
        .collect()
}

/// At most one "service not active" notification per configured period.
fn service_not_active(state: &AppState, config: &Configuration, now: Timestamp) -> Dispatch {
    if !state
        .environment
        .push_notification_status
        .allows_sending_notifications()
    {
        return Dispatch::default();
    }
    let due = state
        .user
        .last_service_not_active_notification
        .map_or(true, |last| {
            (now - last).num_seconds() as f64 >= config.service_not_active_notification_period
        });
    if !due {
        return Dispatch::default();
    }
    Dispatch {
        updates: vec![StateUpdate::SetLastServiceNotActiveNotification(now)],
        effects: vec![Effect::ScheduleNotification {
            notification: LocalNotification::once(
                NotificationKind::ServiceNotActive,
                SERVICE_NOT_ACTIVE_DELAY_SECS,
            ),
        }],
    }
}

/// Status the user would see after committing `dispatch`.
pub fn resulting_status(state: &AppState, dispatch: &Dispatch) -> CovidStatus {
    state.with_updates(&dispatch.updates).user.covid_status
}
