//! The analytics token authorizing operational-info records.
//!
//! A token is generated on the device, bound to it by the backend and valid
//! until a random instant of the following month. Records are only sent
//! while the stored token is validated and not expired.

use serde::{Deserialize, Serialize};

use crate::calendar::{add_secs, CalendarMonth, Timestamp, SECONDS_IN_DAY};
use crate::network::random_alphanumeric;
use crate::random::RandomnessPort;
use crate::state::StateUpdate;

use super::AnalyticsState;

pub const TOKEN_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsTokenStatus {
    /// Created locally; the backend has not confirmed it yet.
    Generated,
    Validated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsToken {
    pub token: String,
    pub expiration: Timestamp,
    pub status: AnalyticsTokenStatus,
}

impl AnalyticsToken {
    /// Fresh token expiring at a uniformly drawn instant of the month after `now`.
    pub fn generate(rng: &dyn RandomnessPort, now: Timestamp) -> Self {
        let next_month = CalendarMonth::from_timestamp(&now).next();
        let max_shift = f64::from(next_month.number_of_days().saturating_sub(1)) * SECONDS_IN_DAY;
        Self {
            token: random_alphanumeric(TOKEN_LENGTH),
            expiration: add_secs(next_month.start(), rng.uniform_in(0.0, max_shift)),
            status: AnalyticsTokenStatus::Generated,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration <= now
    }

    pub fn is_valid(&self, now: Timestamp) -> bool {
        self.status == AnalyticsTokenStatus::Validated && !self.is_expired(now)
    }

    pub fn with_status(&self, status: AnalyticsTokenStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Output of [`refresh_token_if_needed`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenRefresh {
    pub updates: Vec<StateUpdate>,
    /// Token to submit to the backend, if any.
    pub validate: Option<AnalyticsToken>,
}

/// Replace a missing or expired token and ask for validation of any token
/// the backend has not confirmed yet.
pub fn refresh_token_if_needed(
    state: &AnalyticsState,
    rng: &dyn RandomnessPort,
    now: Timestamp,
) -> TokenRefresh {
    match &state.token {
        Some(token) if !token.is_expired(now) => match token.status {
            AnalyticsTokenStatus::Validated => TokenRefresh::default(),
            AnalyticsTokenStatus::Generated => TokenRefresh {
                updates: Vec::new(),
                validate: Some(token.clone()),
            },
        },
        _ => {
            let token = AnalyticsToken::generate(rng, now);
            tracing::debug!(expiration = %token.expiration, "analytics token generated");
            TokenRefresh {
                updates: vec![StateUpdate::SetAnalyticsToken(Some(token.clone()))],
                validate: Some(token),
            }
        }
    }
}

/// Store the backend's verdict on `token`, unless a newer token replaced it
/// while the request was in flight.
pub fn token_validated(state: &AnalyticsState, token: AnalyticsToken) -> Option<StateUpdate> {
    let current = state.token.as_ref()?;
    if current.token != token.token || *current == token {
        return None;
    }
    Some(StateUpdate::SetAnalyticsToken(Some(token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandomness;
    use chrono::{Duration, TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2021, 1, 20, 10, 0, 0).unwrap()
    }

    fn with_token(token: Option<AnalyticsToken>) -> AnalyticsState {
        AnalyticsState {
            token,
            ..AnalyticsState::default()
        }
    }

    #[test]
    fn generated_token_expires_next_month() {
        let rng = ScriptedRandomness::new(now()).with_rolls([0.5]);
        let token = AnalyticsToken::generate(&rng, now());
        assert_eq!(token.token.len(), TOKEN_LENGTH);
        assert!(token.token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(token.status, AnalyticsTokenStatus::Generated);
        // February 2021 has 28 days: the shift spans 27 of them.
        let feb = Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(token.expiration, feb + Duration::seconds(27 * 86_400 / 2));
    }

    #[test]
    fn validity_needs_confirmation_and_time() {
        let token = AnalyticsToken {
            token: "t".into(),
            expiration: now() + Duration::days(3),
            status: AnalyticsTokenStatus::Generated,
        };
        assert!(!token.is_valid(now()));
        let validated = token.with_status(AnalyticsTokenStatus::Validated);
        assert!(validated.is_valid(now()));
        assert!(!validated.is_valid(validated.expiration));
        assert!(validated.is_expired(validated.expiration));
    }

    #[test]
    fn missing_or_expired_token_is_replaced() {
        let rng = ScriptedRandomness::new(now());
        let refresh = refresh_token_if_needed(&with_token(None), &rng, now());
        let Some(fresh) = refresh.validate else {
            panic!("expected a token to validate");
        };
        assert_eq!(
            refresh.updates,
            vec![StateUpdate::SetAnalyticsToken(Some(fresh.clone()))]
        );

        let expired = AnalyticsToken {
            status: AnalyticsTokenStatus::Validated,
            expiration: now(),
            ..fresh
        };
        let refresh = refresh_token_if_needed(&with_token(Some(expired.clone())), &rng, now());
        assert_ne!(refresh.validate.map(|t| t.token), Some(expired.token));
        assert_eq!(refresh.updates.len(), 1);
    }

    #[test]
    fn pending_token_is_revalidated_and_valid_one_kept() {
        let rng = ScriptedRandomness::new(now());
        let pending = AnalyticsToken {
            token: "pending".into(),
            expiration: now() + Duration::days(10),
            status: AnalyticsTokenStatus::Generated,
        };
        let refresh = refresh_token_if_needed(&with_token(Some(pending.clone())), &rng, now());
        assert!(refresh.updates.is_empty());
        assert_eq!(refresh.validate, Some(pending.clone()));

        let valid = pending.with_status(AnalyticsTokenStatus::Validated);
        assert_eq!(
            refresh_token_if_needed(&with_token(Some(valid)), &rng, now()),
            TokenRefresh::default()
        );
    }

    #[test]
    fn verdict_for_a_replaced_token_is_dropped() {
        let stored = AnalyticsToken {
            token: "current".into(),
            expiration: now() + Duration::days(10),
            status: AnalyticsTokenStatus::Generated,
        };
        let state = with_token(Some(stored.clone()));

        let stale = AnalyticsToken {
            token: "older".into(),
            ..stored.with_status(AnalyticsTokenStatus::Validated)
        };
        assert_eq!(token_validated(&state, stale), None);
        assert_eq!(token_validated(&state, stored.clone()), None);

        let validated = stored.with_status(AnalyticsTokenStatus::Validated);
        assert_eq!(
            token_validated(&state, validated.clone()),
            Some(StateUpdate::SetAnalyticsToken(Some(validated)))
        );
    }
}
