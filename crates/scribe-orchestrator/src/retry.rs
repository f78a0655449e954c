//! Exponential backoff for batch item retries.

use crate::config::BatchSettings;
use std::time::Duration;

/// Retry policy for failed batch items.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Builds the policy from batch settings.
    #[must_use]
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            max_retries: settings.retry_attempts,
            initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry_count` (zero-based):
    /// `initial_delay * multiplier^retry_count`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64
            * self.multiplier.powi(retry_count as i32))
        .min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}
