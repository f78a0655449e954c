//! Priority request scheduler.
//!
//! Single requests go into a bounded four-tier queue and are drained by a
//! fixed pool of content workers. Each worker waits on the queue with a short
//! timeout so it can observe shutdown, passes the shared rate limiter, then
//! runs the generation pipeline.

use crate::config::SchedulerSettings;
use crate::error::{OrchestrationError, Result};
use crate::pipeline::GenerationPipeline;
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::queue::{AgingPolicy, PriorityQueue, QueueDepths};
use crate::rate_limiter::RateLimiter;
use crate::request::{GenerationRequest, RequestSpec, RequestStatus};
use crate::stats::GenerationStats;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Known requests: in-flight snapshots plus a bounded finished history.
#[derive(Debug, Default)]
struct RequestTable {
    active: HashMap<String, GenerationRequest>,
    finished: HashMap<String, GenerationRequest>,
    finished_order: VecDeque<String>,
}

impl RequestTable {
    fn get(&self, id: &str) -> Option<&GenerationRequest> {
        self.active.get(id).or_else(|| self.finished.get(id))
    }

    fn finish(&mut self, request: GenerationRequest, limit: usize) {
        self.active.remove(&request.id);
        self.finished_order.push_back(request.id.clone());
        self.finished.insert(request.id.clone(), request);
        while self.finished_order.len() > limit {
            if let Some(evicted) = self.finished_order.pop_front() {
                self.finished.remove(&evicted);
            }
        }
    }
}

/// Handles shared by every content worker.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<PriorityQueue<GenerationRequest>>,
    table: Arc<RwLock<RequestTable>>,
    pipeline: Arc<GenerationPipeline>,
    rate_limiter: Arc<RateLimiter>,
    progress: Arc<ProgressTracker>,
    stats: Arc<GenerationStats>,
    poll_interval: Duration,
    history_limit: usize,
}

/// Accepts single requests and dispatches them to content workers.
pub struct RequestScheduler {
    ctx: WorkerContext,
    workers: usize,
    shutdown: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler").field("workers", &self.workers).finish_non_exhaustive()
    }
}

impl RequestScheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(
        settings: &SchedulerSettings,
        pipeline: Arc<GenerationPipeline>,
        rate_limiter: Arc<RateLimiter>,
        progress: Arc<ProgressTracker>,
        stats: Arc<GenerationStats>,
    ) -> Self {
        let aging = settings
            .aging_promote_after_ms
            .map_or_else(AgingPolicy::strict, |ms| AgingPolicy::promote_after(Duration::from_millis(ms)));
        Self {
            ctx: WorkerContext {
                queue: Arc::new(PriorityQueue::new(settings.queue_capacity, aging)),
                table: Arc::new(RwLock::new(RequestTable::default())),
                pipeline,
                rate_limiter,
                progress,
                stats,
                poll_interval: settings.poll_interval(),
                history_limit: settings.history_limit,
            },
            workers: settings.workers.max(1),
            shutdown: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns `true` while workers are running.
    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.is_some()
    }

    /// Spawns the content workers. Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut shutdown = self.shutdown.lock().await;
        if shutdown.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let mut handles = self.handles.lock().await;
        for i in 0..self.workers {
            let worker = format!("content-worker-{i}");
            handles.push(tokio::spawn(worker_loop(self.ctx.clone(), worker, token.clone())));
        }
        *shutdown = Some(token);
        info!(workers = self.workers, "Request scheduler started");
        true
    }

    /// Signals the workers to stop and waits for them to exit.
    ///
    /// In-flight requests finish; queued requests stay queued.
    pub async fn stop(&self) {
        let Some(token) = self.shutdown.lock().await.take() else {
            return;
        };
        token.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Content worker panicked");
            }
        }
        info!("Request scheduler stopped");
    }

    /// Validates and enqueues a request, returning its ID.
    ///
    /// # Errors
    /// `NotRunning` when stopped, `Validation` for malformed specs,
    /// `QueueFull` when the queue is at capacity.
    pub async fn submit(&self, spec: RequestSpec) -> Result<String> {
        if !self.is_running().await {
            return Err(OrchestrationError::NotRunning);
        }
        let request = GenerationRequest::from_spec(spec)?;
        let id = request.id.clone();
        let priority = request.priority;

        self.ctx.table.write().await.active.insert(id.clone(), request.clone());
        // Tracked before it is queued so a fast worker always finds the entry.
        self.ctx.progress.create_job(&id, 1).await;
        if let Err(e) = self.ctx.queue.push(request, priority).await {
            self.ctx.table.write().await.active.remove(&id);
            self.ctx.progress.remove(&id).await;
            return Err(e);
        }

        self.ctx.progress.publish(ProgressEvent::RequestSubmitted { request_id: id.clone(), priority });
        debug!(request_id = %id, priority = %priority, "Request submitted");
        Ok(id)
    }

    /// Latest known state of a request.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn request(&self, id: &str) -> Result<GenerationRequest> {
        self.ctx
            .table
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestrationError::NotFound(id.to_string()))
    }

    /// Status of a request.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn status(&self, id: &str) -> Result<RequestStatus> {
        self.request(id).await.map(|r| r.status)
    }

    /// Finished request, or `None` while it is still pending or in progress.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn result(&self, id: &str) -> Result<Option<GenerationRequest>> {
        let request = self.request(id).await?;
        Ok(request.is_terminal().then_some(request))
    }

    /// Items waiting per tier.
    pub async fn queue_depths(&self) -> QueueDepths {
        self.ctx.queue.depths().await
    }

    /// Requests that are queued or being processed.
    pub async fn active_requests(&self) -> usize {
        self.ctx.table.read().await.active.len()
    }
}

async fn worker_loop(ctx: WorkerContext, worker: String, shutdown: CancellationToken) {
    info!(worker = %worker, "Content worker started");
    // In-flight requests run to completion on shutdown.
    let never = CancellationToken::new();

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = ctx.queue.pop_timeout(ctx.poll_interval) => next,
        };
        let Some(mut request) = next else {
            continue;
        };

        let admitted = tokio::select! {
            () = shutdown.cancelled() => false,
            _ = ctx.rate_limiter.acquire(1) => true,
        };
        if !admitted {
            // Put it back so it is served after restart.
            let priority = request.priority;
            if let Err(e) = ctx.queue.push(request.clone(), priority).await {
                error!(request_id = %request.id, error = %e, "Failed to requeue request on shutdown");
                request.fail(format!("dropped on shutdown: {e}"));
                finish(&ctx, request).await;
            }
            break;
        }

        debug!(worker = %worker, request_id = %request.id, priority = %request.priority, "Dequeued request");
        if let Some(snapshot) = ctx.table.write().await.active.get_mut(&request.id) {
            snapshot.status = RequestStatus::InProgress;
            snapshot.worker = Some(worker.clone());
        }

        ctx.pipeline.run_isolated(&mut request, &never, &worker).await;
        finish(&ctx, request).await;
    }

    info!(worker = %worker, "Content worker stopped");
}

async fn finish(ctx: &WorkerContext, request: GenerationRequest) {
    let id = request.id.clone();
    let completed = usize::from(request.status == RequestStatus::Completed);
    let failed = usize::from(request.status == RequestStatus::Failed);
    ctx.stats.record(&request).await;
    ctx.progress.update_progress(&id, completed, Some(failed)).await;
    ctx.progress.complete_job(&id).await;
    ctx.progress.publish(ProgressEvent::RequestFinished {
        request_id: id,
        status: request.status,
        provider: request.output.as_ref().map(|o| o.provider.clone()),
    });
    ctx.table.write().await.finish(request, ctx.history_limit);
}
