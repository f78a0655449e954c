//! Content engine facade.
//!
//! Owns the router, the shared rate limiter, progress tracker, statistics and
//! resource monitor, and wires them into the request scheduler and the batch
//! engine.

use crate::adaptive::{LoadProbe, ProcfsProbe, ResourceMonitor, SystemLoad};
use crate::batch::{BatchEngine, JobCounts};
use crate::config::EngineConfig;
use crate::error::{OrchestrationError, Result};
use crate::job::{BatchSpec, JobSnapshot};
use crate::pipeline::GenerationPipeline;
use crate::progress::{ProgressEvent, ProgressStatus, ProgressTracker};
use crate::queue::QueueDepths;
use crate::rate_limiter::RateLimiter;
use crate::request::{GenerationRequest, RequestSpec, RequestStatus};
use crate::routing::{ProviderPerformance, ProviderRouter, RouteDecision, RoutingStrategy};
use crate::scheduler::RequestScheduler;
use crate::stats::{GenerationStats, GenerationStatsSnapshot};
use scribe_abstraction::{ContentOptimizer, ContextProvider, Provider, QualityValidator};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatistics {
    /// Whether workers are running.
    pub running: bool,
    /// Generation outcomes.
    pub generation: GenerationStatsSnapshot,
    /// Rolling performance per provider.
    pub providers: HashMap<String, ProviderPerformance>,
    /// Single requests waiting per tier.
    pub queue: QueueDepths,
    /// Single requests queued or in progress.
    pub active_requests: usize,
    /// Batch jobs by state.
    pub jobs: JobCounts,
    /// Rate limiter admissions inside the current window.
    pub rate_limit_in_window: usize,
    /// Rate limiter admissions allowed per window.
    pub rate_limit: usize,
    /// Latest sampled system load.
    pub system_load: Option<SystemLoad>,
}

/// Builds a [`ContentEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    providers: Vec<Arc<dyn Provider>>,
    context: Option<Arc<dyn ContextProvider>>,
    validator: Option<Arc<dyn QualityValidator>>,
    optimizer: Option<Arc<dyn ContentOptimizer>>,
    probe: Arc<dyn LoadProbe>,
}

impl EngineBuilder {
    /// Registers a provider. Registration order breaks routing ties.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Registers several providers.
    #[must_use]
    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Sets the context provider.
    #[must_use]
    pub fn context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the quality validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn QualityValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Sets the content optimizer.
    #[must_use]
    pub fn optimizer(mut self, optimizer: Arc<dyn ContentOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Sets the system load probe.
    #[must_use]
    pub fn load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Validates the configuration and assembles a stopped engine.
    ///
    /// # Errors
    /// Returns `OrchestrationError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<ContentEngine> {
        self.config.validate()?;
        let config = self.config;

        let router = Arc::new(ProviderRouter::from_settings(self.providers, &config.routing));
        let mut pipeline =
            GenerationPipeline::new(Arc::clone(&router)).with_min_score(config.quality.min_score);
        if let Some(context) = self.context {
            pipeline = pipeline.with_context(context);
        }
        if let Some(validator) = self.validator {
            pipeline = pipeline.with_validator(validator);
        }
        if let Some(optimizer) = self.optimizer {
            pipeline = pipeline.with_optimizer(optimizer);
        }
        let pipeline = Arc::new(pipeline);

        let rate_limiter = Arc::new(RateLimiter::from_settings(&config.rate_limit));
        let progress =
            Arc::new(ProgressTracker::new(Duration::from_secs(config.progress.retention_secs)));
        let stats = Arc::new(GenerationStats::new());
        let monitor = Arc::new(ResourceMonitor::new(self.probe));

        let scheduler = RequestScheduler::new(
            &config.scheduler,
            Arc::clone(&pipeline),
            Arc::clone(&rate_limiter),
            Arc::clone(&progress),
            Arc::clone(&stats),
        );
        let batches = BatchEngine::new(
            &config.batch,
            Arc::clone(&pipeline),
            Arc::clone(&rate_limiter),
            Arc::clone(&progress),
            Arc::clone(&stats),
            Arc::clone(&monitor),
        );

        Ok(ContentEngine {
            config,
            router,
            scheduler,
            batches,
            rate_limiter,
            progress,
            stats,
            monitor,
            background: Mutex::new(None),
        })
    }
}

/// The orchestration engine.
pub struct ContentEngine {
    config: EngineConfig,
    router: Arc<ProviderRouter>,
    scheduler: RequestScheduler,
    batches: BatchEngine,
    rate_limiter: Arc<RateLimiter>,
    progress: Arc<ProgressTracker>,
    stats: Arc<GenerationStats>,
    monitor: Arc<ResourceMonitor>,
    background: Mutex<Option<(CancellationToken, Vec<JoinHandle<()>>)>>,
}

impl std::fmt::Debug for ContentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentEngine")
            .field("router", &self.router)
            .field("scheduler", &self.scheduler)
            .field("batches", &self.batches)
            .finish_non_exhaustive()
    }
}

impl ContentEngine {
    /// Starts building an engine from configuration.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            providers: Vec::new(),
            context: None,
            validator: None,
            optimizer: None,
            probe: Arc::new(ProcfsProbe),
        }
    }

    /// Builds an engine over providers with pass-through collaborators.
    ///
    /// # Errors
    /// Returns `OrchestrationError::Config` if the configuration is invalid.
    pub fn new(config: EngineConfig, providers: Vec<Arc<dyn Provider>>) -> Result<Self> {
        Self::builder(config).providers(providers).build()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The provider router.
    #[must_use]
    pub const fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Spawns every worker and background loop. Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let handles = vec![
            Arc::clone(&self.monitor).spawn(
                Duration::from_millis(self.config.resources.sample_interval_ms.max(1)),
                token.clone(),
            ),
            Arc::clone(&self.progress).spawn_sweeper(
                Duration::from_secs(self.config.progress.sweep_interval_secs.max(1)),
                token.clone(),
            ),
        ];
        self.scheduler.start().await;
        self.batches.start().await;
        *background = Some((token, handles));

        info!(
            providers = self.router.provider_names().len(),
            content_workers = self.config.scheduler.workers,
            batch_workers = self.config.batch.workers,
            "Content engine started"
        );
        true
    }

    /// Stops every loop and waits for all of them to exit.
    pub async fn stop(&self) {
        let Some((token, handles)) = self.background.lock().await.take() else {
            return;
        };
        self.scheduler.stop().await;
        self.batches.stop().await;
        token.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task panicked");
            }
        }
        info!("Content engine stopped");
    }

    /// Returns `true` while the engine is running.
    pub async fn is_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Submits a single request.
    ///
    /// # Errors
    /// See [`RequestScheduler::submit`].
    pub async fn submit_request(&self, spec: RequestSpec) -> Result<String> {
        self.scheduler.submit(spec).await
    }

    /// Status of a single request.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn request_status(&self, id: &str) -> Result<RequestStatus> {
        self.scheduler.status(id).await
    }

    /// Latest known state of a single request.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn request(&self, id: &str) -> Result<GenerationRequest> {
        self.scheduler.request(id).await
    }

    /// Finished request, or `None` while it is still running.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn request_result(&self, id: &str) -> Result<Option<GenerationRequest>> {
        self.scheduler.result(id).await
    }

    /// Submits a batch job.
    ///
    /// # Errors
    /// See [`BatchEngine::submit`].
    pub async fn submit_batch(&self, spec: BatchSpec) -> Result<String> {
        self.batches.submit(spec).await
    }

    /// Snapshot of a batch job.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn batch_status(&self, id: &str) -> Result<JobSnapshot> {
        self.batches.status(id).await
    }

    /// Requests of a batch job with their outputs and errors.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn batch_results(&self, id: &str) -> Result<Vec<GenerationRequest>> {
        self.batches.results(id).await
    }

    /// Cancels a batch job.
    pub async fn cancel_batch(&self, id: &str) -> bool {
        self.batches.cancel(id).await
    }

    /// Pauses a running sequential batch job.
    pub async fn pause_batch(&self, id: &str) -> bool {
        self.batches.pause(id).await
    }

    /// Resumes a paused batch job.
    pub async fn resume_batch(&self, id: &str) -> bool {
        self.batches.resume(id).await
    }

    /// Progress of a batch job or single request.
    pub async fn progress(&self, id: &str) -> Option<ProgressStatus> {
        self.progress.status(id).await
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Shows how a request would be routed without dispatching it.
    ///
    /// # Errors
    /// `Validation` for malformed specs, `Routing` when no provider is registered.
    pub async fn route_preview(
        &self,
        spec: RequestSpec,
        strategy: Option<RoutingStrategy>,
    ) -> Result<RouteDecision> {
        let request = GenerationRequest::from_spec(spec)?;
        self.router.route(&request, strategy).await.map_err(OrchestrationError::from)
    }

    /// Snapshot of engine-wide statistics.
    pub async fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            running: self.is_running().await,
            generation: self.stats.snapshot().await,
            providers: self.router.performance().await,
            queue: self.scheduler.queue_depths().await,
            active_requests: self.scheduler.active_requests().await,
            jobs: self.batches.job_counts().await,
            rate_limit_in_window: self.rate_limiter.in_window().await,
            rate_limit: self.rate_limiter.limit(),
            system_load: self.monitor.latest().await,
        }
    }
}
