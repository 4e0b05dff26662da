//! Retry delay calculation.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff with a cap and subtractive jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay jitter may remove, in `[0, 1]`.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(3600),
            jitter_ratio: 0.2,
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_delay_secs),
            max: Duration::from_secs(config.max_delay_secs),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt once `attempts` attempts have been made.
    ///
    /// `min(base * 2^attempts, max)` scaled into `[1 - jitter_ratio, 1]` by
    /// `jitter`, which is itself clamped to `[0, 1]` (0 keeps the full delay).
    pub fn delay_for(&self, attempts: u32, jitter: f64) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        let raw = self.base.checked_mul(factor).unwrap_or(self.max);
        let capped = raw.min(self.max);

        let scale = 1.0 - self.jitter_ratio * jitter.clamp(0.0, 1.0);
        capped.mul_f64(scale)
    }

    /// [`delay_for`](Self::delay_for) with a freshly drawn jitter value.
    pub fn delay_with_random_jitter(&self, attempts: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        self.delay_for(attempts, jitter)
    }
}
