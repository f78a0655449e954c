//! Deterministic in-process provider for tests and simulated runs.

use async_trait::async_trait;
use scribe_abstraction::{CostModel, GenerationOptions, GenerationOutput, Provider, ProviderError};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// A provider that answers locally after a configurable delay.
///
/// Failure can be forced always, for the first N calls, for prompts containing
/// a marker, or for a deterministic fraction of prompts.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    latency: Duration,
    cost: CostModel,
    response: Option<String>,
    healthy: AtomicBool,
    always_fail: bool,
    fail_first: usize,
    fail_marker: Option<String>,
    panic_marker: Option<String>,
    failure_rate: f64,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    /// Creates a healthy, zero-latency provider.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::ZERO,
            cost: CostModel::new(0.001, 0.002),
            response: None,
            healthy: AtomicBool::new(true),
            always_fail: false,
            fail_first: 0,
            fail_marker: None,
            panic_marker: None,
            failure_rate: 0.0,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sets the simulated call latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the pricing.
    #[must_use]
    pub const fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    /// Returns this content instead of echoing the prompt.
    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Sets the initial health status.
    #[must_use]
    pub fn with_healthy(self, healthy: bool) -> Self {
        self.healthy.store(healthy, Ordering::SeqCst);
        self
    }

    /// Fails every call.
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fails the first `n` calls, then succeeds.
    #[must_use]
    pub const fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Fails any call whose prompt contains `marker`.
    #[must_use]
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Panics on any call whose prompt contains `marker`.
    #[must_use]
    pub fn panicking_on(mut self, marker: impl Into<String>) -> Self {
        self.panic_marker = Some(marker.into());
        self
    }

    /// Fails roughly `rate` of distinct prompts, chosen by prompt hash.
    #[must_use]
    pub const fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    /// Flips the health status at runtime.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `generate` calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `generate` calls observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, call_index: usize, prompt: &str) -> bool {
        if self.always_fail || call_index < self.fail_first {
            return true;
        }
        if self.fail_marker.as_deref().is_some_and(|m| prompt.contains(m)) {
            return true;
        }
        if self.failure_rate > 0.0 {
            let mut hasher = DefaultHasher::new();
            prompt.hash(&mut hasher);
            let bucket = (hasher.finish() % 10_000) as f64 / 10_000.0;
            return bucket < self.failure_rate;
        }
        false
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        content_type: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationOutput, ProviderError> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        debug!(provider = %self.name, content_type = %content_type, call = call_index, "MockProvider generating");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(marker) = self.panic_marker.as_deref()
            && prompt.contains(marker)
        {
            panic!("{} crashed on prompt containing '{marker}'", self.name);
        }

        if self.should_fail(call_index, prompt) {
            return Err(ProviderError::ResponseError(format!("{} rejected the request", self.name)));
        }

        let content = self.response.clone().unwrap_or_else(|| {
            format!("[{content_type}] {prompt}\n\nGenerated by {}.", self.name)
        });

        #[allow(clippy::cast_possible_truncation)]
        let prompt_tokens = prompt.split_whitespace().count() as u32;
        #[allow(clippy::cast_possible_truncation)]
        let completion_tokens = content.split_whitespace().count() as u32;
        let cost_estimate = self.cost.weighted(
            f64::from(prompt_tokens) / 1000.0,
            f64::from(completion_tokens) / 1000.0,
        );

        let mut provider_metadata = HashMap::new();
        provider_metadata.insert("model".to_string(), format!("{}-mock", self.name));
        if let Some(max_tokens) = options.max_tokens {
            provider_metadata.insert("max_tokens".to_string(), max_tokens.to_string());
        }

        Ok(GenerationOutput {
            content,
            tokens_used: prompt_tokens + completion_tokens,
            cost_estimate,
            provider_metadata,
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn cost_model(&self) -> CostModel {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_prompt() {
        let provider = MockProvider::new("mock");
        let output =
            provider.generate("rust tips", "article", &GenerationOptions::default()).await.unwrap();
        assert!(output.content.contains("rust tips"));
        assert!(output.tokens_used > 0);
        assert_eq!(provider.calls(), 1);
        assert_eq!(output.provider_metadata.get("model").map(String::as_str), Some("mock-mock"));
    }

    #[tokio::test]
    async fn test_failing_first() {
        let provider = MockProvider::new("mock").failing_first(2);
        let options = GenerationOptions::default();
        assert!(provider.generate("a", "article", &options).await.is_err());
        assert!(provider.generate("a", "article", &options).await.is_err());
        assert!(provider.generate("a", "article", &options).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_on_marker() {
        let provider = MockProvider::new("mock").failing_on("poison");
        let options = GenerationOptions::default();
        assert!(provider.generate("poison pill", "article", &options).await.is_err());
        assert!(provider.generate("fine", "article", &options).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_rate_bounds() {
        let options = GenerationOptions::default();
        let never = MockProvider::new("never").with_failure_rate(0.0);
        let always = MockProvider::new("always").with_failure_rate(1.0);
        for i in 0..20 {
            let prompt = format!("prompt {i}");
            assert!(never.generate(&prompt, "article", &options).await.is_ok());
            assert!(always.generate(&prompt, "article", &options).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let provider = MockProvider::new("mock").with_healthy(false);
        assert!(!provider.health_check().await);
        provider.set_healthy(true);
        assert!(provider.health_check().await);
    }
}
