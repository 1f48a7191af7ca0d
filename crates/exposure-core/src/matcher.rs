//! Proximity-matching engine port.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::calendar::Timestamp;
use crate::error::ExposureDetectionError;
use crate::exposure::ExposureDetectionOutcome;

/// Inputs of one detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// Seconds between two detections; the engine answers
    /// `NoDetectionNecessary` before it has elapsed.
    pub period: f64,
    pub last_detection_date: Option<Timestamp>,
    pub last_processed_chunk: Option<u64>,
    pub minimum_risk_score: i32,
    /// Forces a full detection with per-contact details.
    pub force_run: bool,
    pub now: Timestamp,
}

#[async_trait]
pub trait ExposureMatcher: Send + Sync {
    async fn detect(
        &self,
        request: DetectionRequest,
    ) -> Result<ExposureDetectionOutcome, ExposureDetectionError>;
}

/// Hands out prepared outcomes in order, then `NoDetectionNecessary`.
#[derive(Default)]
pub struct ReplayMatcher {
    outcomes: Mutex<VecDeque<Result<ExposureDetectionOutcome, ExposureDetectionError>>>,
    requests: Mutex<Vec<DetectionRequest>>,
}

impl ReplayMatcher {
    pub fn new(
        outcomes: impl IntoIterator<Item = Result<ExposureDetectionOutcome, ExposureDetectionError>>,
    ) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<DetectionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ExposureMatcher for ReplayMatcher {
    async fn detect(
        &self,
        request: DetectionRequest,
    ) -> Result<ExposureDetectionOutcome, ExposureDetectionError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(Ok(ExposureDetectionOutcome::NoDetectionNecessary))
    }
}
