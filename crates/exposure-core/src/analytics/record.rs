use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarDay;
use crate::province::{Province, PROVINCE_CODES};
use crate::state::{ExposureNotificationStatus, PushNotificationStatus};

/// Body of an operational-info request. Flags are integers so every body has
/// the same shape whatever the values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalInfo {
    pub province: String,
    pub exposure_permission: u8,
    pub notification_permission: u8,
    pub bluetooth_active: u8,
    pub exposure_notification: u8,
    /// Ignored by the backend when `exposure_notification` is 0.
    pub last_risky_exposure_on: String,
}

impl OperationalInfo {
    pub fn new(
        province: &Province,
        exposure_status: ExposureNotificationStatus,
        push_status: PushNotificationStatus,
        last_risky_exposure: Option<CalendarDay>,
        today: CalendarDay,
    ) -> Self {
        Self {
            province: province.code().to_string(),
            exposure_permission: exposure_status.can_perform_detection().into(),
            notification_permission: push_status.allows_sending_notifications().into(),
            bluetooth_active: exposure_status.is_bluetooth_active().into(),
            exposure_notification: last_risky_exposure.is_some().into(),
            last_risky_exposure_on: last_risky_exposure.unwrap_or(today).to_string(),
        }
    }

    /// Plausible body with random province and statuses.
    pub fn dummy<R: Rng + ?Sized>(rng: &mut R, today: CalendarDay) -> Self {
        let province = PROVINCE_CODES
            .choose(rng)
            .and_then(|code| code.parse::<Province>().ok())
            .unwrap_or_else(|| Province::nth(0));
        let exposure_status = ExposureNotificationStatus::ALL
            .choose(rng)
            .copied()
            .unwrap_or_default();
        let push_status = PushNotificationStatus::ALL
            .choose(rng)
            .copied()
            .unwrap_or_default();
        let last_risky_exposure = if rng.gen::<bool>() { None } else { Some(today) };
        Self::new(&province, exposure_status, push_status, last_risky_exposure, today)
    }
}

/// A record ready to send, minus the device token fetched right before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub body: OperationalInfo,
    pub is_dummy: bool,
}
