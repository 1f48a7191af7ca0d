//! One-shot correction of risk statuses attributed from unqualified contacts.

use crate::calendar::{CalendarDay, Timestamp};
use crate::state::{AppState, StateUpdate};
use crate::status::CovidStatus;

use super::{alert_period_cutoff, ExposureInfo};

/// Most recent day among contacts scoring at least `minimum_risk_score`.
pub fn most_recent_risky_contact_day<'a>(
    infos: impl IntoIterator<Item = &'a ExposureInfo>,
    minimum_risk_score: i32,
) -> Option<CalendarDay> {
    infos
        .into_iter()
        .filter(|info| info.total_risk_score >= minimum_risk_score)
        .map(|info| info.date)
        .max()
}

/// Re-derive a `Risk` status from the history kept for the alert period.
///
/// Runs at most once: the first call marks the persisted toggle and every
/// later call returns no updates. `Neutral` and `Positive` are untouched.
pub fn correct_wrongly_attributed_risk(
    state: &AppState,
    minimum_risk_score: i32,
    now: Timestamp,
) -> Vec<StateUpdate> {
    if state.toggles.is_wrongly_attributed_risk_status_checked {
        return Vec::new();
    }

    let mut updates = vec![StateUpdate::MarkWronglyAttributedRiskChecked];
    if !state.user.covid_status.is_risk() {
        return updates;
    }

    let cutoff = alert_period_cutoff(now);
    let infos = state
        .exposure_detection
        .recent_positive_exposure_results
        .iter()
        .filter(|result| result.date >= cutoff)
        .flat_map(|result| result.exposure_infos.iter());

    let corrected = match most_recent_risky_contact_day(infos, minimum_risk_score) {
        Some(day) => CovidStatus::Risk {
            last_contact_day: day,
        },
        None => CovidStatus::Neutral,
    };
    tracing::info!(?corrected, "risk status re-derived from history");
    updates.push(StateUpdate::SetCovidStatus(corrected));
    updates
}
