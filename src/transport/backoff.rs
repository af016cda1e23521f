//! Exponential backoff with an upper bound and optional jitter.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1.0),
            max,
            jitter: false,
        }
    }

    /// Shave up to a quarter off each delay so retrying peers spread out.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retry number `attempt` (0-based): `base * factor^attempt`,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as u64;
        let raw = base_ms * self.factor.powi(attempt.min(64) as i32);
        let capped = if raw.is_finite() {
            (raw as u64).min(max_ms)
        } else {
            max_ms
        };

        if self.jitter && capped > 0 {
            let spread = rand::thread_rng().gen_range(0..=capped / 4);
            Duration::from_millis(capped - spread)
        } else {
            Duration::from_millis(capped)
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), 2.0, Duration::from_secs(1))
    }
}
