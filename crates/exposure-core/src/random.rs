//! Randomness and time source.
//!
//! Every stochastic decision in the crate goes through [`RandomnessPort`], so
//! tests can swap in a seeded or fully scripted implementation and exercise
//! each probability-gated branch deterministically.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;

use crate::calendar::{add_secs, Timestamp};

/// Uniform/exponential generators plus the wall clock.
pub trait RandomnessPort: Send + Sync {
    /// Uniform sample in `[0, 1)`.
    fn uniform(&self) -> f64;

    /// Current instant.
    fn now(&self) -> Timestamp;

    /// Uniform sample in `[low, high)`. Returns `low` for an empty range.
    fn uniform_in(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        low + (high - low) * self.uniform()
    }

    /// Exponentially distributed sample with the given mean (seconds). Always `>= 0`.
    fn exponential(&self, mean: f64) -> f64 {
        if !mean.is_finite() || mean <= 0.0 {
            return 0.0;
        }
        // Inverse CDF; 1 - u is in (0, 1] so the log is finite.
        -mean * (1.0 - self.uniform()).ln()
    }
}

/// Production source: thread-local RNG and the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandomness;

impl RandomnessPort for SystemRandomness {
    fn uniform(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Reproducible source: seeded PCG generator and a manually driven clock.
pub struct SeededRandomness {
    rng: Mutex<Mcg128Xsl64>,
    clock: Mutex<Timestamp>,
}

impl SeededRandomness {
    /// `seed = None` seeds from entropy.
    pub fn new(seed: Option<u64>, now: Timestamp) -> Self {
        let rng = match seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            clock: Mutex::new(now),
        }
    }

    pub fn set_now(&self, now: Timestamp) {
        *lock(&self.clock) = now;
    }

    pub fn advance_secs(&self, secs: f64) {
        let mut clock = lock(&self.clock);
        *clock = add_secs(*clock, secs);
    }
}

impl RandomnessPort for SeededRandomness {
    fn uniform(&self) -> f64 {
        lock(&self.rng).gen::<f64>()
    }

    fn now(&self) -> Timestamp {
        *lock(&self.clock)
    }
}

/// Fully scripted source for tests and replays.
///
/// Uniform rolls and exponential draws are popped from queues. When the roll
/// queue runs dry every roll is just below 1.0, so no probability gate passes;
/// when the delay queue runs dry the requested mean is returned.
pub struct ScriptedRandomness {
    rolls: Mutex<VecDeque<f64>>,
    delays: Mutex<VecDeque<f64>>,
    clock: Mutex<Timestamp>,
}

impl ScriptedRandomness {
    pub fn new(now: Timestamp) -> Self {
        Self {
            rolls: Mutex::new(VecDeque::new()),
            delays: Mutex::new(VecDeque::new()),
            clock: Mutex::new(now),
        }
    }

    pub fn with_rolls(self, rolls: impl IntoIterator<Item = f64>) -> Self {
        lock(&self.rolls).extend(rolls);
        self
    }

    pub fn with_delays(self, delays: impl IntoIterator<Item = f64>) -> Self {
        lock(&self.delays).extend(delays);
        self
    }

    pub fn push_roll(&self, roll: f64) {
        lock(&self.rolls).push_back(roll);
    }

    pub fn push_delay(&self, secs: f64) {
        lock(&self.delays).push_back(secs);
    }

    pub fn set_now(&self, now: Timestamp) {
        *lock(&self.clock) = now;
    }

    pub fn advance_secs(&self, secs: f64) {
        let mut clock = lock(&self.clock);
        *clock = add_secs(*clock, secs);
    }

    /// Rolls not consumed yet.
    pub fn remaining_rolls(&self) -> usize {
        lock(&self.rolls).len()
    }
}

impl RandomnessPort for ScriptedRandomness {
    fn uniform(&self) -> f64 {
        lock(&self.rolls).pop_front().unwrap_or(1.0 - f64::EPSILON)
    }

    fn now(&self) -> Timestamp {
        *lock(&self.clock)
    }

    fn exponential(&self, mean: f64) -> f64 {
        lock(&self.delays).pop_front().unwrap_or(mean).max(0.0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2021, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn seeded_is_reproducible() {
        let a = SeededRandomness::new(Some(7), epoch());
        let b = SeededRandomness::new(Some(7), epoch());
        let xs: Vec<f64> = (0..5).map(|_| a.uniform()).collect();
        let ys: Vec<f64> = (0..5).map(|_| b.uniform()).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn exponential_is_non_negative_with_expected_mean() {
        let rng = SeededRandomness::new(Some(42), epoch());
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.exponential(10.0)).collect();
        assert!(samples.iter().all(|s| *s >= 0.0));
        let mean = samples.iter().sum::<f64>() / n as f64;
        assert!((mean - 10.0).abs() < 0.5, "sample mean {mean}");
    }

    #[test]
    fn exponential_with_non_positive_mean_is_zero() {
        let rng = SeededRandomness::new(Some(1), epoch());
        assert_eq!(rng.exponential(0.0), 0.0);
        assert_eq!(rng.exponential(-5.0), 0.0);
    }

    #[test]
    fn uniform_in_respects_bounds() {
        let rng = ScriptedRandomness::new(epoch()).with_rolls([0.0, 0.5]);
        assert_eq!(rng.uniform_in(10.0, 20.0), 10.0);
        assert_eq!(rng.uniform_in(10.0, 20.0), 15.0);
        assert_eq!(rng.uniform_in(5.0, 5.0), 5.0);
    }

    #[test]
    fn scripted_queues_and_fallbacks() {
        let rng = ScriptedRandomness::new(epoch())
            .with_rolls([0.25])
            .with_delays([3.0]);
        assert_eq!(rng.uniform(), 0.25);
        assert!(rng.uniform() > 0.999);
        assert_eq!(rng.exponential(100.0), 3.0);
        assert_eq!(rng.exponential(100.0), 100.0);
    }

    #[test]
    fn clock_can_be_driven() {
        let rng = ScriptedRandomness::new(epoch());
        rng.advance_secs(90.0);
        assert_eq!(rng.now(), epoch() + chrono::Duration::seconds(90));
    }
}
