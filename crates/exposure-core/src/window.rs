//! Randomized opportunity windows.

use serde::{Deserialize, Serialize};

use crate::calendar::{add_secs, CalendarMonth, Timestamp, SECONDS_IN_DAY};

/// Half-open interval `[window_start, window_start + window_duration)` in which
/// a probabilistic action may fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpportunityWindow {
    pub window_start: Timestamp,
    /// Length in seconds. A window with a non-positive duration never contains anything.
    pub window_duration: f64,
}

impl OpportunityWindow {
    /// Empty window long gone: every "recompute if expired" check fires on it.
    pub fn distant_past() -> Self {
        Self {
            window_start: CalendarMonth::DISTANT_PAST.start(),
            window_duration: 0.0,
        }
    }

    pub fn new(window_start: Timestamp, window_duration: f64) -> Self {
        Self {
            window_start,
            window_duration,
        }
    }

    /// Window opening `shift` seconds after the start of `month`.
    pub fn from_month(month: CalendarMonth, shift: f64, window_duration: f64) -> Self {
        Self::new(add_secs(month.start(), shift), window_duration)
    }

    /// One-day window inside `month`, as used for analytics sampling.
    pub fn daily_in_month(month: CalendarMonth, shift: f64) -> Self {
        Self::from_month(month, shift, SECONDS_IN_DAY)
    }

    /// Window opening `delay` seconds after `now`.
    pub fn starting_after(now: Timestamp, delay: f64, window_duration: f64) -> Self {
        Self::new(add_secs(now, delay), window_duration)
    }

    /// Saturates instead of overflowing for very long windows.
    pub fn window_end(&self) -> Timestamp {
        add_secs(self.window_start, self.window_duration)
    }

    /// Month the window opens in.
    pub fn month(&self) -> CalendarMonth {
        CalendarMonth::from_timestamp(&self.window_start)
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        self.window_duration > 0.0 && self.window_start <= at && at < self.window_end()
    }

    /// True once `at` is strictly past the end.
    pub fn has_ended_before(&self, at: Timestamp) -> bool {
        at > self.window_end()
    }
}

impl Default for OpportunityWindow {
    fn default() -> Self {
        Self::distant_past()
    }
}
