//! Provider router: strategy-based ordering with fallback dispatch.

use super::performance::ProviderPerformance;
use super::types::{DispatchOutcome, FailureRecord, RouteDecision, RoutingError, RoutingStrategy};
use crate::config::RoutingSettings;
use crate::request::GenerationRequest;
use futures::future::join_all;
use scribe_abstraction::{PreparedPrompt, Provider};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Token mix assumed when ranking providers by cost (input, output).
/// Used only for ordering, never for billing.
const RANKING_TOKENS: (f64, f64) = (500.0, 300.0);

/// Balanced score weights (cost, speed, unreliability).
const BALANCED_WEIGHTS: (f64, f64, f64) = (0.3, 0.4, 0.3);

/// Key under `quality_preferences` used for unlisted content types.
const DEFAULT_PREFERENCE_KEY: &str = "default";

/// Chooses a primary provider and fallback chain per request and dispatches
/// through it, tracking rolling performance for every provider.
pub struct ProviderRouter {
    /// Registered providers, in registration order.
    providers: Vec<Arc<dyn Provider>>,
    /// Rolling performance per provider name.
    performance: Mutex<HashMap<String, ProviderPerformance>>,
    /// Strategy used when a call does not name one.
    default_strategy: RoutingStrategy,
    /// Content type -> preferred provider order.
    quality_preferences: HashMap<String, Vec<String>>,
    /// Upper bound on one health check.
    health_check_timeout: Duration,
    /// Latency assumed for unseen providers in balanced scoring.
    unseen_latency_secs: f64,
    /// Round-robin cursor.
    round_robin: AtomicUsize,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.provider_names())
            .field("default_strategy", &self.default_strategy)
            .finish_non_exhaustive()
    }
}

impl ProviderRouter {
    /// Creates a router over the given providers with default settings.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self::from_settings(providers, &RoutingSettings::default())
    }

    /// Creates a router from routing settings.
    #[must_use]
    pub fn from_settings(providers: Vec<Arc<dyn Provider>>, settings: &RoutingSettings) -> Self {
        let performance = providers
            .iter()
            .map(|p| (p.name().to_string(), ProviderPerformance::default()))
            .collect();
        Self {
            providers,
            performance: Mutex::new(performance),
            default_strategy: settings.default_strategy,
            quality_preferences: settings.quality_preferences.clone(),
            health_check_timeout: Duration::from_millis(settings.health_check_timeout_ms),
            unseen_latency_secs: settings.unseen_latency_secs,
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Sets the default routing strategy.
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the preferred provider order for a content type.
    #[must_use]
    pub fn with_quality_preference(
        mut self,
        content_type: impl Into<String>,
        providers: Vec<String>,
    ) -> Self {
        self.quality_preferences.insert(content_type.into(), providers);
        self
    }

    /// Names of the registered providers, in registration order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// The default routing strategy.
    #[must_use]
    pub const fn default_strategy(&self) -> RoutingStrategy {
        self.default_strategy
    }

    /// Snapshot of every provider's performance record.
    pub async fn performance(&self) -> HashMap<String, ProviderPerformance> {
        self.performance.lock().await.clone()
    }

    fn provider(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Runs a health check against every provider.
    ///
    /// Checks that time out leave the previous health status untouched.
    pub async fn refresh_health(&self) {
        let checks = self.providers.iter().map(|provider| async move {
            let result = tokio::time::timeout(self.health_check_timeout, provider.health_check()).await;
            (provider.name().to_string(), result)
        });
        let results = join_all(checks).await;

        let mut performance = self.performance.lock().await;
        for (name, result) in results {
            match result {
                Ok(available) => {
                    let record = performance.entry(name.clone()).or_default();
                    if record.available != available {
                        info!(provider = %name, available, "Provider health changed");
                    }
                    record.record_health(available);
                }
                Err(_) => {
                    warn!(provider = %name, "Health check timed out, keeping previous status");
                }
            }
        }
    }

    /// Chooses the primary provider and fallback chain for a request.
    ///
    /// Unhealthy providers are excluded unless none are healthy, in which case
    /// every provider is a candidate. A request's provider preference, when it
    /// names a candidate, becomes the primary.
    pub async fn route(
        &self,
        request: &GenerationRequest,
        strategy: Option<RoutingStrategy>,
    ) -> Result<RouteDecision, RoutingError> {
        if self.providers.is_empty() {
            return Err(RoutingError::NoProviders);
        }

        self.refresh_health().await;
        let strategy = strategy.unwrap_or(self.default_strategy);
        let performance = self.performance.lock().await.clone();

        let mut candidates: Vec<&Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|p| performance.get(p.name()).is_none_or(|r| r.available))
            .collect();
        if candidates.is_empty() {
            warn!(request_id = %request.id, "No healthy providers, considering all");
            candidates = self.providers.iter().collect();
        }

        let mut ordered = self.order(strategy, candidates, &request.content_type, &performance);

        if let Some(preferred) = request.provider_preference.as_deref()
            && let Some(pos) = ordered.iter().position(|p| p.name() == preferred)
        {
            let provider = ordered.remove(pos);
            ordered.insert(0, provider);
        }

        let mut names = ordered.into_iter().map(|p| p.name().to_string());
        let primary = names.next().ok_or(RoutingError::NoProviders)?;
        let decision = RouteDecision { strategy, primary, fallbacks: names.collect() };

        debug!(
            request_id = %request.id,
            strategy = %strategy,
            primary = %decision.primary,
            fallbacks = ?decision.fallbacks,
            "Routed request"
        );
        Ok(decision)
    }

    /// Calls the primary provider and walks the fallback chain on failure.
    ///
    /// Every attempt updates that provider's performance record.
    ///
    /// # Errors
    /// Returns `RoutingError::AllProvidersFailed` with every attempt's error when
    /// the whole chain fails.
    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
        prompt: &PreparedPrompt,
        strategy: Option<RoutingStrategy>,
    ) -> Result<DispatchOutcome, RoutingError> {
        let decision = self.route(request, strategy).await?;
        let mut failures = Vec::new();

        for name in decision.chain() {
            let Some(provider) = self.provider(name) else {
                continue;
            };

            let started = Instant::now();
            let result =
                provider.generate(&prompt.prompt, &request.content_type, &prompt.options).await;
            let latency = started.elapsed();

            match result {
                Ok(output) => {
                    self.record(name, latency, true).await;
                    debug!(
                        request_id = %request.id,
                        provider = %name,
                        latency_ms = latency.as_millis() as u64,
                        attempts = failures.len() + 1,
                        "Provider call succeeded"
                    );
                    return Ok(DispatchOutcome {
                        provider: name.to_string(),
                        output,
                        latency,
                        failures,
                    });
                }
                Err(error) => {
                    self.record(name, latency, false).await;
                    warn!(
                        request_id = %request.id,
                        provider = %name,
                        error = %error,
                        "Provider call failed, trying next in chain"
                    );
                    failures.push(FailureRecord::new(name.to_string(), error));
                }
            }
        }

        Err(RoutingError::AllProvidersFailed(failures))
    }

    async fn record(&self, name: &str, latency: Duration, success: bool) {
        let mut performance = self.performance.lock().await;
        let record = performance.entry(name.to_string()).or_default();
        if success {
            record.record_success(latency);
        } else {
            record.record_failure(latency);
        }
    }

    fn estimated_cost(provider: &dyn Provider) -> f64 {
        provider.cost_model().weighted(RANKING_TOKENS.0, RANKING_TOKENS.1)
    }

    fn order<'a>(
        &self,
        strategy: RoutingStrategy,
        mut candidates: Vec<&'a Arc<dyn Provider>>,
        content_type: &str,
        performance: &HashMap<String, ProviderPerformance>,
    ) -> Vec<&'a Arc<dyn Provider>> {
        match strategy {
            RoutingStrategy::CostOptimized => {
                sort_by_score(candidates, |p| Self::estimated_cost(p.as_ref()))
            }
            RoutingStrategy::SpeedFirst => {
                // Providers without samples rank after every measured provider.
                sort_by_score(candidates, |p| {
                    performance
                        .get(p.name())
                        .and_then(ProviderPerformance::mean_response_secs)
                        .unwrap_or(f64::INFINITY)
                })
            }
            RoutingStrategy::Balanced => {
                let (cost_w, speed_w, failure_w) = BALANCED_WEIGHTS;
                sort_by_score(candidates, |p| {
                    let record = performance.get(p.name());
                    let speed = record
                        .and_then(ProviderPerformance::mean_response_secs)
                        .unwrap_or(self.unseen_latency_secs);
                    let success_rate = record.map_or(1.0, |r| r.success_rate);
                    cost_w * Self::estimated_cost(p.as_ref())
                        + speed_w * speed
                        + failure_w * (1.0 - success_rate)
                })
            }
            RoutingStrategy::QualityFirst => {
                let preferences = self
                    .quality_preferences
                    .get(content_type)
                    .or_else(|| self.quality_preferences.get(DEFAULT_PREFERENCE_KEY));
                if let Some(preferences) = preferences {
                    candidates.sort_by_key(|p| {
                        preferences.iter().position(|name| name == p.name()).unwrap_or(usize::MAX)
                    });
                }
                candidates
            }
            RoutingStrategy::RoundRobin => {
                let start = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates.rotate_left(start);
                candidates
            }
        }
    }
}

/// Stable ascending sort by a floating-point score.
fn sort_by_score<'a, F>(candidates: Vec<&'a Arc<dyn Provider>>, score: F) -> Vec<&'a Arc<dyn Provider>>
where
    F: Fn(&Arc<dyn Provider>) -> f64,
{
    let mut scored: Vec<(f64, &Arc<dyn Provider>)> =
        candidates.into_iter().map(|p| (score(p), p)).collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, p)| p).collect()
}
