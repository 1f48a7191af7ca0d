//! Detection outcome -> history updates + derived status event.

use crate::calendar::Timestamp;
use crate::config::Configuration;
use crate::state::StateUpdate;
use crate::status::CovidEvent;

use super::{
    alert_period_cutoff, most_recent_risky_contact_day, ExposureDetectionOutcome,
    ExposureDetectionState, PositiveExposureResult,
};

/// Output of [`reduce`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reduction {
    pub updates: Vec<StateUpdate>,
    pub event: Option<CovidEvent>,
}

/// Fold one detection outcome into history updates and, for verified
/// close contacts, a `ContactDetected` event.
///
/// Partial detections are recorded but never promote the user to risk: they
/// carry no per-contact scores to check against the threshold.
pub fn reduce(outcome: &ExposureDetectionOutcome, config: &Configuration) -> Reduction {
    match outcome {
        ExposureDetectionOutcome::NoDetectionNecessary
        | ExposureDetectionOutcome::Error { .. } => Reduction::default(),

        ExposureDetectionOutcome::PartialDetection {
            detected_at,
            summary,
            chunk_bounds,
        } => {
            let mut updates = vec![StateUpdate::SetLastDetectionDate(*detected_at)];
            if let Some(bounds) = chunk_bounds {
                updates.push(StateUpdate::SetLatestProcessedKeyChunkIndex(bounds.last));
            }
            if summary.has_matches() {
                updates.push(StateUpdate::AppendPositiveExposureResult(
                    PositiveExposureResult {
                        date: *detected_at,
                        summary: summary.clone(),
                        exposure_infos: Vec::new(),
                    },
                ));
            }
            Reduction {
                updates,
                event: None,
            }
        }

        ExposureDetectionOutcome::FullDetection {
            detected_at,
            summary,
            exposure_infos,
            chunk_bounds,
        } => {
            let mut updates = vec![StateUpdate::SetLastDetectionDate(*detected_at)];
            if let Some(bounds) = chunk_bounds {
                updates.push(StateUpdate::SetLatestProcessedKeyChunkIndex(bounds.last));
            }
            if !summary.has_matches() {
                return Reduction {
                    updates,
                    event: None,
                };
            }

            updates.push(StateUpdate::AppendPositiveExposureResult(
                PositiveExposureResult {
                    date: *detected_at,
                    summary: summary.clone(),
                    exposure_infos: exposure_infos.clone(),
                },
            ));
            let event = most_recent_risky_contact_day(
                exposure_infos,
                config.exposure_info_minimum_risk_score,
            )
            .map(CovidEvent::ContactDetected);

            if event.is_none() {
                tracing::debug!(
                    matched_key_count = summary.matched_key_count,
                    "matches below the risk score threshold"
                );
            }
            Reduction { updates, event }
        }
    }
}

/// Drop positive results older than the alert period. Returns nothing when
/// there is nothing to drop, so running it again is a no-op.
pub fn prune_outdated_results(state: &ExposureDetectionState, now: Timestamp) -> Vec<StateUpdate> {
    let cutoff = alert_period_cutoff(now);
    let outdated = state
        .recent_positive_exposure_results
        .iter()
        .filter(|r| r.date < cutoff)
        .count();
    if outdated == 0 {
        return Vec::new();
    }
    tracing::debug!(outdated, "pruning positive exposure results");
    vec![StateUpdate::PrunePositiveExposureResults { cutoff }]
}
