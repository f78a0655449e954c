//! Shared sliding-window rate limiter.

use crate::config::RateLimitSettings;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Sliding-window admission gate.
///
/// Callers over the limit are delayed until capacity frees, never rejected.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit: limit.max(1), window, admissions: Mutex::new(VecDeque::new()) }
    }

    /// Creates a limiter from settings.
    #[must_use]
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(settings.requests_per_minute, Duration::from_secs(settings.window_secs))
    }

    /// Admissions allowed per window.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Waits until `count` requests can be admitted, then records them.
    ///
    /// A `count` larger than the limit is admitted once the window is empty.
    /// Returns how long the caller was delayed.
    pub async fn acquire(&self, count: usize) -> Duration {
        let started = Instant::now();
        loop {
            let wait = {
                let mut admissions = self.admissions.lock().await;
                let now = Instant::now();
                while admissions.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                    admissions.pop_front();
                }

                if admissions.is_empty() || admissions.len() + count <= self.limit {
                    admissions.extend(std::iter::repeat_n(now, count));
                    let waited = now.duration_since(started);
                    debug!(count, in_window = admissions.len(), "Rate limiter admitted");
                    return waited;
                }

                // Non-empty here, so front() is Some.
                admissions
                    .front()
                    .map_or(self.window, |oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            };

            info!(count, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Admissions currently inside the window.
    pub async fn in_window(&self) -> usize {
        let admissions = self.admissions.lock().await;
        let now = Instant::now();
        admissions.iter().filter(|t| now.duration_since(**t) < self.window).count()
    }
}
