//! Anonymous operational telemetry.
//!
//! At most one record with exposure and one without exposure leave the device
//! per calendar month. Each is sampled, and records without exposure may only
//! be sent inside a random one-day window of the month. Dummy records fill the
//! gaps so that a passive observer cannot tell the two apart. Nothing at all is
//! sent unless the device holds a validated analytics token.

mod record;
mod sampler;
mod token;

pub use record::{AnalyticsRecord, OperationalInfo};
pub use sampler::{
    refresh_dummy_traffic_window, sample, update_without_exposure_window, AnalyticsRequestKind,
    Sampling,
};
pub use token::{
    refresh_token_if_needed, token_validated, AnalyticsToken, AnalyticsTokenStatus, TokenRefresh,
    TOKEN_LENGTH,
};

use serde::{Deserialize, Serialize};

use crate::calendar::CalendarDay;
use crate::window::OpportunityWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsState {
    #[serde(default = "distant_past_day")]
    pub event_with_exposure_last_sent: CalendarDay,
    #[serde(default = "distant_past_day")]
    pub event_without_exposure_last_sent: CalendarDay,
    #[serde(default)]
    pub event_without_exposure_window: OpportunityWindow,
    /// When a dummy record may be sent.
    #[serde(default)]
    pub dummy_traffic_window: OpportunityWindow,
    #[serde(default)]
    pub token: Option<AnalyticsToken>,
}

fn distant_past_day() -> CalendarDay {
    CalendarDay::DISTANT_PAST
}

impl Default for AnalyticsState {
    fn default() -> Self {
        Self {
            event_with_exposure_last_sent: CalendarDay::DISTANT_PAST,
            event_without_exposure_last_sent: CalendarDay::DISTANT_PAST,
            event_without_exposure_window: OpportunityWindow::distant_past(),
            dummy_traffic_window: OpportunityWindow::distant_past(),
            token: None,
        }
    }
}
