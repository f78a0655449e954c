//! Rolling per-provider performance records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of response-time samples kept per provider.
pub const RESPONSE_WINDOW: usize = 100;

/// Rolling performance and health of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPerformance {
    /// Most recent response times in seconds, oldest first.
    response_times: VecDeque<f64>,
    /// Cumulative successful calls.
    pub successes: u64,
    /// Cumulative failed calls.
    pub failures: u64,
    /// `successes / (successes + failures)`, `1.0` before any call.
    pub success_rate: f64,
    /// Result of the last completed health check.
    pub available: bool,
    /// When the last health check completed.
    pub last_health_check: Option<DateTime<Utc>>,
}

impl Default for ProviderPerformance {
    fn default() -> Self {
        Self {
            response_times: VecDeque::with_capacity(RESPONSE_WINDOW),
            successes: 0,
            failures: 0,
            success_rate: 1.0,
            available: true,
            last_health_check: None,
        }
    }
}

impl ProviderPerformance {
    /// Records a successful call.
    pub fn record_success(&mut self, latency: Duration) {
        self.push_sample(latency);
        self.successes += 1;
        self.recompute();
    }

    /// Records a failed call.
    pub fn record_failure(&mut self, latency: Duration) {
        self.push_sample(latency);
        self.failures += 1;
        self.recompute();
    }

    /// Records a health check result.
    pub fn record_health(&mut self, available: bool) {
        self.available = available;
        self.last_health_check = Some(Utc::now());
    }

    /// Mean of the retained response times, `None` before any call.
    #[must_use]
    pub fn mean_response_secs(&self) -> Option<f64> {
        if self.response_times.is_empty() {
            return None;
        }
        Some(self.response_times.iter().sum::<f64>() / self.response_times.len() as f64)
    }

    /// Number of retained samples.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.response_times.len()
    }

    /// Total calls recorded.
    #[must_use]
    pub const fn total_calls(&self) -> u64 {
        self.successes + self.failures
    }

    fn push_sample(&mut self, latency: Duration) {
        if self.response_times.len() == RESPONSE_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(latency.as_secs_f64());
    }

    fn recompute(&mut self) {
        let total = self.total_calls();
        self.success_rate = if total == 0 { 1.0 } else { self.successes as f64 / total as f64 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_provider() {
        let perf = ProviderPerformance::default();
        assert!(perf.mean_response_secs().is_none());
        assert!((perf.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(perf.available);
    }

    #[test]
    fn test_success_rate_recomputed() {
        let mut perf = ProviderPerformance::default();
        perf.record_success(Duration::from_millis(100));
        perf.record_success(Duration::from_millis(300));
        perf.record_failure(Duration::from_millis(200));
        perf.record_failure(Duration::from_millis(200));

        assert_eq!(perf.successes, 2);
        assert_eq!(perf.failures, 2);
        assert!((perf.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((perf.mean_response_secs().unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut perf = ProviderPerformance::default();
        for _ in 0..RESPONSE_WINDOW {
            perf.record_success(Duration::from_secs(10));
        }
        for _ in 0..RESPONSE_WINDOW {
            perf.record_success(Duration::from_secs(1));
        }
        assert_eq!(perf.sample_count(), RESPONSE_WINDOW);
        assert!((perf.mean_response_secs().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(perf.total_calls(), 2 * RESPONSE_WINDOW as u64);
    }
}
