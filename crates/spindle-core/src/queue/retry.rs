//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff with a ceiling and bounded additive jitter.
///
/// delay(n) = min(base_delay * multiplier^n, max_delay) + jitter, clamped to
/// max_delay, where n is the number of retries already consumed and jitter is
/// uniform in `[0, jitter * capped]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Ceiling for any single delay.
    pub max_delay: Duration,

    /// Jitter as a fraction of the computed delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Same curve without jitter. Handy when a test needs exact numbers.
    pub fn deterministic(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Delay before the next attempt when `retried` retries were already used.
    pub fn next_delay(&self, retried: u32) -> Duration {
        let capped = self.capped_delay(retried);
        if self.jitter <= 0.0 || capped.is_zero() {
            return capped;
        }
        let spread = capped.as_secs_f64() * self.jitter.min(1.0);
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        (capped + Duration::from_secs_f64(extra)).min(self.max_delay)
    }

    fn capped_delay(&self, retried: u32) -> Duration {
        let exponent = i32::try_from(retried).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}
