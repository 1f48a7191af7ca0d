//! Exposure detection results and the history derived from them.

mod migration;
mod reducer;

pub use migration::{correct_wrongly_attributed_risk, most_recent_risky_contact_day};
pub use reducer::{prune_outdated_results, reduce, Reduction};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarDay, Timestamp};
use crate::error::ExposureDetectionError;

/// How long positive results stay relevant.
pub const ALERT_PERIOD_DAYS: i64 = 14;

/// Instant before which results fall out of the alert period.
pub fn alert_period_cutoff(now: Timestamp) -> Timestamp {
    now - Duration::days(ALERT_PERIOD_DAYS)
}

/// Aggregate matching result of one detection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureDetectionSummary {
    pub matched_key_count: u32,
    pub days_since_last_exposure: u32,
    pub maximum_risk_score: u32,
    /// Seconds spent in each attenuation bucket.
    #[serde(default)]
    pub attenuation_durations: Vec<f64>,
}

impl ExposureDetectionSummary {
    pub fn has_matches(&self) -> bool {
        self.matched_key_count > 0
    }
}

/// One close contact reported by a full detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureInfo {
    pub date: CalendarDay,
    /// Contact duration in seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub attenuation_value: u32,
    #[serde(default)]
    pub transmission_risk_level: u32,
    pub total_risk_score: i32,
}

/// Range of key chunk indexes a detection processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBounds {
    pub first: u64,
    pub last: u64,
}

/// What the proximity matcher reports after one detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExposureDetectionOutcome {
    NoDetectionNecessary,
    Error {
        kind: ExposureDetectionError,
    },
    /// Summary only; not verified against per-contact risk scores.
    PartialDetection {
        detected_at: Timestamp,
        summary: ExposureDetectionSummary,
        #[serde(default)]
        chunk_bounds: Option<ChunkBounds>,
    },
    FullDetection {
        detected_at: Timestamp,
        summary: ExposureDetectionSummary,
        exposure_infos: Vec<ExposureInfo>,
        #[serde(default)]
        chunk_bounds: Option<ChunkBounds>,
    },
}

impl ExposureDetectionOutcome {
    pub fn summary(&self) -> Option<&ExposureDetectionSummary> {
        match self {
            ExposureDetectionOutcome::PartialDetection { summary, .. }
            | ExposureDetectionOutcome::FullDetection { summary, .. } => Some(summary),
            ExposureDetectionOutcome::NoDetectionNecessary
            | ExposureDetectionOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<ExposureDetectionError> {
        match self {
            ExposureDetectionOutcome::Error { kind } => Some(*kind),
            _ => None,
        }
    }
}

/// A detection that produced matches, kept for the alert period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositiveExposureResult {
    pub date: Timestamp,
    pub summary: ExposureDetectionSummary,
    /// Empty for partial detections.
    #[serde(default)]
    pub exposure_infos: Vec<ExposureInfo>,
}

/// Persisted detection history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureDetectionState {
    #[serde(default)]
    pub last_detection_date: Option<Timestamp>,
    #[serde(default)]
    pub latest_processed_key_chunk_index: Option<u64>,
    #[serde(default)]
    pub recent_positive_exposure_results: Vec<PositiveExposureResult>,
}
