//! Engine-wide generation statistics.

use crate::request::{GenerationRequest, RequestStatus};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    total_tokens: u64,
    total_cost: f64,
    total_latency_ms: u64,
    by_content_type: HashMap<String, u64>,
    by_provider: HashMap<String, u64>,
}

/// Aggregated outcome of every request the engine has finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStatsSnapshot {
    /// Requests that reached a terminal state.
    pub total_requests: u64,
    /// Completed requests.
    pub completed: u64,
    /// Failed requests.
    pub failed: u64,
    /// Cancelled requests.
    pub cancelled: u64,
    /// Tokens consumed by completed requests.
    pub total_tokens: u64,
    /// Summed provider cost estimates in USD.
    pub total_cost: f64,
    /// Mean provider latency of completed requests.
    pub average_latency_ms: f64,
    /// Completed requests per minute since the engine was created.
    pub throughput_per_minute: f64,
    /// Completed requests per content type.
    pub by_content_type: HashMap<String, u64>,
    /// Completed requests per provider.
    pub by_provider: HashMap<String, u64>,
}

/// Shared statistics aggregator owned by one engine instance.
#[derive(Debug)]
pub struct GenerationStats {
    counters: Mutex<Counters>,
    started: Instant,
}

impl Default for GenerationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationStats {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self { counters: Mutex::new(Counters::default()), started: Instant::now() }
    }

    /// Records a request that reached its final state.
    ///
    /// Non-terminal requests are ignored.
    pub async fn record(&self, request: &GenerationRequest) {
        match (request.status, request.output.as_ref()) {
            (RequestStatus::Completed, Some(output)) => {
                self.record_completed(
                    &request.content_type,
                    &output.provider,
                    output.tokens_used,
                    output.cost_estimate,
                    output.latency_ms,
                )
                .await;
            }
            (RequestStatus::Failed, _) => self.record_failed().await,
            (RequestStatus::Cancelled, _) => self.record_cancelled().await,
            _ => {}
        }
    }

    /// Records a completed request.
    pub async fn record_completed(
        &self,
        content_type: &str,
        provider: &str,
        tokens: u32,
        cost: f64,
        latency_ms: u64,
    ) {
        let mut counters = self.counters.lock().await;
        counters.completed += 1;
        counters.total_tokens += u64::from(tokens);
        counters.total_cost += cost;
        counters.total_latency_ms += latency_ms;
        *counters.by_content_type.entry(content_type.to_string()).or_default() += 1;
        *counters.by_provider.entry(provider.to_string()).or_default() += 1;
    }

    /// Records a failed request.
    pub async fn record_failed(&self) {
        self.counters.lock().await.failed += 1;
    }

    /// Records a cancelled request.
    pub async fn record_cancelled(&self) {
        self.counters.lock().await.cancelled += 1;
    }

    /// Current totals.
    pub async fn snapshot(&self) -> GenerationStatsSnapshot {
        let counters = self.counters.lock().await;
        let average_latency_ms = if counters.completed == 0 {
            0.0
        } else {
            counters.total_latency_ms as f64 / counters.completed as f64
        };
        let minutes = self.started.elapsed().as_secs_f64() / 60.0;
        let throughput_per_minute =
            if minutes > 0.0 { counters.completed as f64 / minutes } else { 0.0 };

        GenerationStatsSnapshot {
            total_requests: counters.completed + counters.failed + counters.cancelled,
            completed: counters.completed,
            failed: counters.failed,
            cancelled: counters.cancelled,
            total_tokens: counters.total_tokens,
            total_cost: counters.total_cost,
            average_latency_ms,
            throughput_per_minute,
            by_content_type: counters.by_content_type.clone(),
            by_provider: counters.by_provider.clone(),
        }
    }
}
