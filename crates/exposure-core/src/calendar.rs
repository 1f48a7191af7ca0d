//! UTC-normalized calendar values.
//!
//! Anything that crosses a day or month boundary (rate limits, contact days,
//! opportunity windows) is expressed with these types instead of raw
//! timestamps, so behaviour does not depend on the local time zone or the
//! time of day.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant. Always UTC.
pub type Timestamp = DateTime<Utc>;

/// Seconds per calendar day.
pub const SECONDS_IN_DAY: f64 = 86_400.0;

/// Longest period, delay or window a configuration may set: ten years.
pub const MAX_CONFIGURED_SECS: f64 = 10.0 * 365.0 * SECONDS_IN_DAY;

/// A date-only value in UTC. Ordered by (year, month, day).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    /// Stand-in for "never": earlier than every real day.
    pub const DISTANT_PAST: CalendarDay = CalendarDay(NaiveDate::MIN);

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn from_timestamp(at: &Timestamp) -> Self {
        Self(at.date_naive())
    }

    /// Parse a `YYYY-MM-DD` string.
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Self)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month_number(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn month(&self) -> CalendarMonth {
        CalendarMonth {
            year: self.0.year(),
            month: self.0.month(),
        }
    }

    /// Shift by `days` (negative goes back). Saturates at the representable range.
    pub fn add_days(&self, days: i64) -> Self {
        let shifted = if days >= 0 {
            self.0.checked_add_signed(Duration::days(days))
        } else {
            self.0.checked_sub_signed(Duration::days(-days))
        };
        match shifted {
            Some(d) => Self(d),
            None if days >= 0 => Self(NaiveDate::MAX),
            None => Self(NaiveDate::MIN),
        }
    }

    /// Days from `other` to `self`; positive when `self` is later.
    pub fn days_since(&self, other: &CalendarDay) -> i64 {
        self.0.signed_duration_since(other.0).num_days()
    }

    /// Midnight UTC at the beginning of this day.
    pub fn start(&self) -> Timestamp {
        Utc.from_utc_datetime(&self.0.and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// A UTC calendar month. Ordered by (year, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarMonth {
    year: i32,
    month: u32,
}

impl CalendarMonth {
    pub const DISTANT_PAST: CalendarMonth = CalendarMonth { year: 1, month: 1 };

    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn from_timestamp(at: &Timestamp) -> Self {
        CalendarDay::from_timestamp(at).month()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Number of days in this month (28..=31).
    pub fn number_of_days(&self) -> u32 {
        let next = self.next().first_day();
        next.signed_duration_since(self.first_day()).num_days() as u32
    }

    /// Midnight UTC of the first day of the month.
    pub fn start(&self) -> Timestamp {
        CalendarDay(self.first_day()).start()
    }
}

impl fmt::Display for CalendarMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Convert fractional seconds into a chrono duration (millisecond precision).
/// Negative or non-finite values become zero, values past the representable
/// range saturate.
pub fn duration_from_secs(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::zero();
    }
    Duration::try_milliseconds((secs * 1000.0).round() as i64).unwrap_or(Duration::MAX)
}

/// `at` plus `secs` seconds, saturating at the latest representable instant.
pub fn add_secs(at: Timestamp, secs: f64) -> Timestamp {
    at.checked_add_signed(duration_from_secs(secs))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Same as [`duration_from_secs`] for `tokio::time::sleep`.
pub fn std_duration_from_secs(secs: f64) -> std::time::Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return std::time::Duration::ZERO;
    }
    std::time::Duration::try_from_secs_f64(secs).unwrap_or(std::time::Duration::MAX)
}
