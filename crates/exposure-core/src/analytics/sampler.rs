//! Per-cycle telemetry decisions.

use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarDay, CalendarMonth, Timestamp, SECONDS_IN_DAY};
use crate::config::Configuration;
use crate::exposure::ExposureDetectionOutcome;
use crate::random::RandomnessPort;
use crate::state::{AppState, StateUpdate};
use crate::window::OpportunityWindow;

use super::{AnalyticsRecord, AnalyticsState, OperationalInfo};

/// What kind of record a cycle decided to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalyticsRequestKind {
    WithExposure { most_recent_exposure: CalendarDay },
    WithoutExposure,
    Dummy,
}

/// Output of [`sample`]. Updates must be committed before the record is sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sampling {
    pub updates: Vec<StateUpdate>,
    pub kind: Option<AnalyticsRequestKind>,
    /// `None` when nothing is sent, including when no province is set yet.
    pub record: Option<AnalyticsRecord>,
}

/// Decide whether this detection cycle reports telemetry.
///
/// Without a valid analytics token nothing is decided, dummy records
/// included. The month is marked as used before the sampling roll, so a
/// record that loses the roll still counts against the monthly cap.
pub fn sample(
    outcome: &ExposureDetectionOutcome,
    state: &AppState,
    config: &Configuration,
    rng: &dyn RandomnessPort,
) -> Sampling {
    let now = rng.now();
    let today = CalendarDay::from_timestamp(&now);
    let analytics = &state.analytics;
    if !analytics.token.as_ref().is_some_and(|t| t.is_valid(now)) {
        tracing::debug!("no valid analytics token, telemetry skipped");
        return Sampling::default();
    }
    let mut updates = Vec::new();
    let mut kind = None;

    if let Some(most_recent_exposure) = with_exposure_candidate(outcome, analytics, today) {
        updates.push(StateUpdate::SetEventWithExposureLastSent(today));
        if rng.uniform() < config.operational_info_with_exposure_sampling_rate {
            kind = Some(AnalyticsRequestKind::WithExposure {
                most_recent_exposure,
            });
        }
        updates.extend(refresh_dummy_window_if_open(analytics, config, rng, now));
    } else if should_send_without_exposure(outcome, analytics, now) {
        updates.push(StateUpdate::SetEventWithoutExposureLastSent(today));
        if rng.uniform() < config.operational_info_without_exposure_sampling_rate {
            kind = Some(AnalyticsRequestKind::WithoutExposure);
        }
        updates.extend(refresh_dummy_window_if_open(analytics, config, rng, now));
    } else if analytics.dummy_traffic_window.contains(now) {
        kind = Some(AnalyticsRequestKind::Dummy);
        updates.push(refresh_dummy_traffic_window(config, rng, now));
    }

    // The window may have been replaced above; only look at the latest one.
    let latest_window = updates
        .iter()
        .rev()
        .find_map(|u| match u {
            StateUpdate::SetAnalyticsDummyTrafficWindow(w) => Some(*w),
            _ => None,
        })
        .unwrap_or(analytics.dummy_traffic_window);
    if now >= latest_window.window_end() {
        updates.push(refresh_dummy_traffic_window(config, rng, now));
    }

    let record = kind.and_then(|kind| build_record(kind, state, today));
    if let Some(kind) = kind {
        tracing::debug!(?kind, sending = record.is_some(), "analytics decision");
    }
    Sampling {
        updates,
        kind,
        record,
    }
}

/// Draw the without-exposure window for the current month if the stored one
/// belongs to an earlier month.
pub fn update_without_exposure_window(
    state: &AnalyticsState,
    rng: &dyn RandomnessPort,
    now: Timestamp,
) -> Option<StateUpdate> {
    let current_month = CalendarMonth::from_timestamp(&now);
    if state.event_without_exposure_window.month() >= current_month {
        return None;
    }
    let max_shift = f64::from(current_month.number_of_days().saturating_sub(1)) * SECONDS_IN_DAY;
    let shift = rng.uniform_in(0.0, max_shift);
    let window = OpportunityWindow::daily_in_month(current_month, shift);
    tracing::debug!(window_start = %window.window_start, "analytics window recomputed");
    Some(StateUpdate::SetEventWithoutExposureWindow(window))
}

/// New one-day dummy analytics window opening after an exponential delay.
pub fn refresh_dummy_traffic_window(
    config: &Configuration,
    rng: &dyn RandomnessPort,
    now: Timestamp,
) -> StateUpdate {
    let delay = rng.exponential(config.dummy_analytics_mean_stochastic_delay);
    StateUpdate::SetAnalyticsDummyTrafficWindow(OpportunityWindow::starting_after(
        now,
        delay,
        SECONDS_IN_DAY,
    ))
}

fn refresh_dummy_window_if_open(
    analytics: &AnalyticsState,
    config: &Configuration,
    rng: &dyn RandomnessPort,
    now: Timestamp,
) -> Option<StateUpdate> {
    analytics
        .dummy_traffic_window
        .contains(now)
        .then(|| refresh_dummy_traffic_window(config, rng, now))
}

fn with_exposure_candidate(
    outcome: &ExposureDetectionOutcome,
    analytics: &AnalyticsState,
    today: CalendarDay,
) -> Option<CalendarDay> {
    let ExposureDetectionOutcome::FullDetection {
        summary,
        exposure_infos,
        ..
    } = outcome
    else {
        return None;
    };
    if !summary.has_matches() {
        return None;
    }
    let most_recent = exposure_infos.iter().map(|info| info.date).max()?;
    if today.month() == analytics.event_with_exposure_last_sent.month() {
        return None;
    }
    Some(most_recent)
}

fn should_send_without_exposure(
    outcome: &ExposureDetectionOutcome,
    analytics: &AnalyticsState,
    now: Timestamp,
) -> bool {
    if !matches!(outcome, ExposureDetectionOutcome::PartialDetection { .. }) {
        return false;
    }
    let today = CalendarDay::from_timestamp(&now);
    if today.month() == analytics.event_without_exposure_last_sent.month() {
        return false;
    }
    analytics.event_without_exposure_window.contains(now)
}

fn build_record(
    kind: AnalyticsRequestKind,
    state: &AppState,
    today: CalendarDay,
) -> Option<AnalyticsRecord> {
    let Some(province) = state.user.province.as_ref() else {
        tracing::debug!("no province yet, analytics record dropped");
        return None;
    };
    let env = &state.environment;
    let record = match kind {
        AnalyticsRequestKind::WithExposure {
            most_recent_exposure,
        } => AnalyticsRecord {
            body: OperationalInfo::new(
                province,
                env.exposure_notification_status,
                env.push_notification_status,
                Some(most_recent_exposure),
                today,
            ),
            is_dummy: false,
        },
        AnalyticsRequestKind::WithoutExposure => AnalyticsRecord {
            body: OperationalInfo::new(
                province,
                env.exposure_notification_status,
                env.push_notification_status,
                None,
                today,
            ),
            is_dummy: false,
        },
        AnalyticsRequestKind::Dummy => AnalyticsRecord {
            body: OperationalInfo::dummy(&mut rand::thread_rng(), today),
            is_dummy: true,
        },
    };
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsToken, AnalyticsTokenStatus};
    use crate::exposure::{ExposureDetectionSummary, ExposureInfo};
    use crate::random::ScriptedRandomness;
    use chrono::{Duration, TimeZone, Utc};

    fn june(day: u32, hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2021, 6, day, hour, 0, 0).unwrap()
    }

    fn token(status: AnalyticsTokenStatus) -> AnalyticsToken {
        AnalyticsToken {
            token: "a".repeat(crate::analytics::TOKEN_LENGTH),
            expiration: Utc.with_ymd_and_hms(2021, 8, 15, 0, 0, 0).unwrap(),
            status,
        }
    }

    fn with_valid_token() -> AppState {
        AppState::default().with_updates(&[StateUpdate::SetAnalyticsToken(Some(token(
            AnalyticsTokenStatus::Validated,
        )))])
    }

    fn onboarded() -> AppState {
        let mut state = with_valid_token();
        state.apply(StateUpdate::SetProvince(Some("RM".parse().unwrap())));
        state
    }

    fn full(matches: u32) -> ExposureDetectionOutcome {
        ExposureDetectionOutcome::FullDetection {
            detected_at: june(10, 8),
            summary: ExposureDetectionSummary {
                matched_key_count: matches,
                ..ExposureDetectionSummary::default()
            },
            exposure_infos: vec![
                ExposureInfo {
                    date: CalendarDay::from_ymd(2021, 6, 7).unwrap(),
                    duration: 0.0,
                    attenuation_value: 0,
                    transmission_risk_level: 0,
                    total_risk_score: 2,
                },
                ExposureInfo {
                    date: CalendarDay::from_ymd(2021, 6, 8).unwrap(),
                    duration: 0.0,
                    attenuation_value: 0,
                    transmission_risk_level: 0,
                    total_risk_score: 1,
                },
            ],
            chunk_bounds: None,
        }
    }

    fn partial() -> ExposureDetectionOutcome {
        ExposureDetectionOutcome::PartialDetection {
            detected_at: june(10, 8),
            summary: ExposureDetectionSummary::default(),
            chunk_bounds: None,
        }
    }

    #[test]
    fn with_exposure_marks_month_then_sends() {
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.5]);
        let sampling = sample(&full(2), &onboarded(), &Configuration::default(), &rng);
        assert_eq!(
            sampling.updates[0],
            StateUpdate::SetEventWithExposureLastSent(CalendarDay::from_ymd(2021, 6, 10).unwrap())
        );
        assert_eq!(
            sampling.kind,
            Some(AnalyticsRequestKind::WithExposure {
                most_recent_exposure: CalendarDay::from_ymd(2021, 6, 8).unwrap()
            })
        );
        let record = sampling.record.unwrap();
        assert!(!record.is_dummy);
        assert_eq!(record.body.exposure_notification, 1);
        assert_eq!(record.body.last_risky_exposure_on, "2021-06-08");
    }

    #[test]
    fn failed_roll_still_uses_the_month() {
        let config = Configuration {
            operational_info_with_exposure_sampling_rate: 0.3,
            ..Configuration::default()
        };
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.3]);
        let sampling = sample(&full(1), &onboarded(), &config, &rng);
        assert!(sampling.kind.is_none());
        assert!(sampling
            .updates
            .contains(&StateUpdate::SetEventWithExposureLastSent(
                CalendarDay::from_ymd(2021, 6, 10).unwrap()
            )));
    }

    #[test]
    fn one_record_with_exposure_per_month() {
        let config = Configuration::default();
        let mut state = onboarded();
        let rng = ScriptedRandomness::new(june(3, 8)).with_rolls([0.0, 0.0, 0.0]);

        let mut sent = 0;
        for day in [3, 12, 29] {
            rng.set_now(june(day, 8));
            let sampling = sample(&full(1), &state, &config, &rng);
            if matches!(sampling.kind, Some(AnalyticsRequestKind::WithExposure { .. })) {
                sent += 1;
            }
            state.apply_all(sampling.updates);
        }
        assert_eq!(sent, 1);

        rng.set_now(Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap());
        let sampling = sample(&full(1), &state, &config, &rng);
        assert!(matches!(
            sampling.kind,
            Some(AnalyticsRequestKind::WithExposure { .. })
        ));
    }

    #[test]
    fn same_month_of_another_year_is_not_capped() {
        let mut state = onboarded();
        state.apply(StateUpdate::SetEventWithExposureLastSent(
            CalendarDay::from_ymd(2020, 6, 10).unwrap(),
        ));
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.0]);
        let sampling = sample(&full(1), &state, &Configuration::default(), &rng);
        assert!(sampling.kind.is_some());
    }

    #[test]
    fn full_detection_without_matches_is_not_reported_with_exposure() {
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.0]);
        let sampling = sample(&full(0), &onboarded(), &Configuration::default(), &rng);
        assert!(sampling.kind.is_none());
        assert_eq!(rng.remaining_rolls(), 1);
    }

    #[test]
    fn without_exposure_checks_month_before_window() {
        let mut state = onboarded();
        state.apply(StateUpdate::SetEventWithoutExposureWindow(
            OpportunityWindow::daily_in_month(CalendarMonth::new(2021, 6).unwrap(), 9.0 * SECONDS_IN_DAY),
        ));

        // Inside the window (June 10th), month unused: record sent.
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.1]);
        let sampling = sample(&partial(), &state, &Configuration::default(), &rng);
        assert_eq!(sampling.kind, Some(AnalyticsRequestKind::WithoutExposure));
        state.apply_all(sampling.updates);

        // Same window, month already used: nothing rolled.
        let rng = ScriptedRandomness::new(june(10, 9)).with_rolls([0.1]);
        let sampling = sample(&partial(), &state, &Configuration::default(), &rng);
        assert!(sampling.kind.is_none());
        assert_eq!(rng.remaining_rolls(), 1);
    }

    #[test]
    fn without_exposure_outside_window_is_skipped() {
        let mut state = onboarded();
        state.apply(StateUpdate::SetEventWithoutExposureWindow(
            OpportunityWindow::daily_in_month(CalendarMonth::new(2021, 6).unwrap(), 20.0 * SECONDS_IN_DAY),
        ));
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.0]);
        let sampling = sample(&partial(), &state, &Configuration::default(), &rng);
        assert!(sampling.kind.is_none());
        assert!(!sampling
            .updates
            .iter()
            .any(|u| matches!(u, StateUpdate::SetEventWithoutExposureLastSent(_))));
    }

    #[test]
    fn dummy_record_inside_dummy_window() {
        let mut state = onboarded();
        state.apply(StateUpdate::SetAnalyticsDummyTrafficWindow(OpportunityWindow::new(
            june(10, 0),
            SECONDS_IN_DAY,
        )));
        let rng = ScriptedRandomness::new(june(10, 8)).with_delays([3600.0]);
        let sampling = sample(
            &ExposureDetectionOutcome::NoDetectionNecessary,
            &state,
            &Configuration::default(),
            &rng,
        );
        assert_eq!(sampling.kind, Some(AnalyticsRequestKind::Dummy));
        assert!(sampling.record.unwrap().is_dummy);
        assert_eq!(
            sampling.updates,
            vec![StateUpdate::SetAnalyticsDummyTrafficWindow(OpportunityWindow::new(
                june(10, 9),
                SECONDS_IN_DAY
            ))]
        );
    }

    #[test]
    fn expired_dummy_window_is_refreshed() {
        let rng = ScriptedRandomness::new(june(10, 8)).with_delays([60.0]);
        let sampling = sample(
            &ExposureDetectionOutcome::NoDetectionNecessary,
            &onboarded(),
            &Configuration::default(),
            &rng,
        );
        assert!(sampling.kind.is_none());
        assert_eq!(
            sampling.updates,
            vec![StateUpdate::SetAnalyticsDummyTrafficWindow(OpportunityWindow::new(
                june(10, 8) + Duration::seconds(60),
                SECONDS_IN_DAY
            ))]
        );
    }

    #[test]
    fn no_province_means_nothing_sent() {
        let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.0]);
        let sampling = sample(&full(1), &with_valid_token(), &Configuration::default(), &rng);
        assert!(sampling.kind.is_some());
        assert!(sampling.record.is_none());
        assert!(!sampling.updates.is_empty());
    }

    #[test]
    fn nothing_is_decided_without_a_valid_token() {
        let mut dummy_open = onboarded();
        dummy_open.apply(StateUpdate::SetAnalyticsDummyTrafficWindow(OpportunityWindow::new(
            june(10, 0),
            SECONDS_IN_DAY,
        )));
        let pending = dummy_open.with_updates(&[StateUpdate::SetAnalyticsToken(Some(token(
            AnalyticsTokenStatus::Generated,
        )))]);
        let missing = dummy_open.with_updates(&[StateUpdate::SetAnalyticsToken(None)]);
        let mut expired_token = token(AnalyticsTokenStatus::Validated);
        expired_token.expiration = june(10, 8);
        let expired = dummy_open.with_updates(&[StateUpdate::SetAnalyticsToken(Some(expired_token))]);

        for state in [pending, missing, expired] {
            for outcome in [full(1), partial(), ExposureDetectionOutcome::NoDetectionNecessary] {
                let rng = ScriptedRandomness::new(june(10, 8)).with_rolls([0.0]);
                assert_eq!(
                    sample(&outcome, &state, &Configuration::default(), &rng),
                    Sampling::default()
                );
                assert_eq!(rng.remaining_rolls(), 1);
            }
        }
    }

    #[test]
    fn window_recomputed_once_per_month() {
        let state = AnalyticsState::default();
        let rng = ScriptedRandomness::new(june(1, 0)).with_rolls([0.5]);
        let update = update_without_exposure_window(&state, &rng, june(1, 0)).unwrap();
        let StateUpdate::SetEventWithoutExposureWindow(window) = update else {
            panic!("unexpected update {update:?}");
        };
        assert_eq!(window.month(), CalendarMonth::new(2021, 6).unwrap());
        assert_eq!(window.window_start, june(1, 0) + Duration::seconds(29 * 86_400 / 2));

        let updated = AnalyticsState {
            event_without_exposure_window: window,
            ..state
        };
        assert!(update_without_exposure_window(&updated, &rng, june(30, 23)).is_none());
        assert!(update_without_exposure_window(
            &updated,
            &rng,
            Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap()
        )
        .is_some());
    }
}
