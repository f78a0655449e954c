//! Batch engine: multi-request jobs run sequentially, concurrently, or
//! adaptively by a fixed pool of batch workers.
//!
//! Jobs wait in a bounded queue. A worker passes the rate limiter for the
//! job's full request count, runs the requests per the job's mode, and moves
//! the finished job from the active table to a bounded completed table.

use crate::adaptive::{effective_concurrency, ResourceMonitor};
use crate::config::BatchSettings;
use crate::error::{OrchestrationError, Result};
use crate::job::{BatchJob, BatchSpec, JobSnapshot, JobStatus, ProcessingMode};
use crate::pipeline::GenerationPipeline;
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::rate_limiter::RateLimiter;
use crate::request::{GenerationRequest, RequestStatus};
use crate::retry::RetryPolicy;
use crate::stats::GenerationStats;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cancel and pause signals for one job.
#[derive(Debug, Default)]
struct JobControl {
    cancel: CancellationToken,
    paused: AtomicBool,
    resume: Notify,
}

impl JobControl {
    /// Waits while the job is paused. Returns early on cancellation.
    async fn wait_while_paused(&self, poll: Duration) {
        while self.paused.load(Ordering::SeqCst) && !self.cancel.is_cancelled() {
            tokio::select! {
                () = self.resume.notified() => {}
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[derive(Debug)]
struct JobRecord {
    job: BatchJob,
    control: Arc<JobControl>,
}

/// Active jobs plus a bounded completed history.
#[derive(Debug, Default)]
struct JobTables {
    active: HashMap<String, JobRecord>,
    completed: HashMap<String, BatchJob>,
    completed_order: VecDeque<String>,
}

impl JobTables {
    fn get(&self, id: &str) -> Option<&BatchJob> {
        self.active.get(id).map(|r| &r.job).or_else(|| self.completed.get(id))
    }

    fn retire(&mut self, id: &str, limit: usize) -> Option<JobStatus> {
        let record = self.active.remove(id)?;
        let status = record.job.status;
        self.completed_order.push_back(id.to_string());
        self.completed.insert(id.to_string(), record.job);
        while self.completed_order.len() > limit {
            if let Some(evicted) = self.completed_order.pop_front() {
                self.completed.remove(&evicted);
                debug!(job_id = %evicted, "Evicted completed job");
            }
        }
        Some(status)
    }

    fn count(&self, status: JobStatus) -> usize {
        self.active.values().filter(|r| r.job.status == status).count()
    }
}

/// Job counts by table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Accepted but not yet picked up.
    pub pending: usize,
    /// Being processed.
    pub running: usize,
    /// Paused between items.
    pub paused: usize,
    /// Retained finished jobs.
    pub completed: usize,
}

/// Handles shared by every batch worker.
#[derive(Clone)]
struct BatchContext {
    tables: Arc<RwLock<JobTables>>,
    pipeline: Arc<GenerationPipeline>,
    rate_limiter: Arc<RateLimiter>,
    progress: Arc<ProgressTracker>,
    stats: Arc<GenerationStats>,
    monitor: Arc<ResourceMonitor>,
    retry: RetryPolicy,
    pause_poll: Duration,
    completed_history: usize,
}

/// How a job run ended, before the final state is written.
enum RunOutcome {
    Finished,
    Aborted(String),
}

/// Accepts batch jobs and runs them on batch workers.
pub struct BatchEngine {
    ctx: BatchContext,
    workers: usize,
    queue_capacity: usize,
    max_active_jobs: usize,
    sender: mpsc::Sender<String>,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("workers", &self.workers)
            .field("max_active_jobs", &self.max_active_jobs)
            .finish_non_exhaustive()
    }
}

impl BatchEngine {
    /// Creates a stopped batch engine.
    #[must_use]
    pub fn new(
        settings: &BatchSettings,
        pipeline: Arc<GenerationPipeline>,
        rate_limiter: Arc<RateLimiter>,
        progress: Arc<ProgressTracker>,
        stats: Arc<GenerationStats>,
        monitor: Arc<ResourceMonitor>,
    ) -> Self {
        let queue_capacity = settings.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        Self {
            ctx: BatchContext {
                tables: Arc::new(RwLock::new(JobTables::default())),
                pipeline,
                rate_limiter,
                progress,
                stats,
                monitor,
                retry: RetryPolicy::from_settings(settings),
                pause_poll: Duration::from_millis(settings.pause_poll_interval_ms.max(1)),
                completed_history: settings.completed_history.max(1),
            },
            workers: settings.workers.max(1),
            queue_capacity,
            max_active_jobs: settings.max_active_jobs,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            shutdown: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns `true` while workers are running.
    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.is_some()
    }

    /// Spawns the batch workers. Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut shutdown = self.shutdown.lock().await;
        if shutdown.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let mut handles = self.handles.lock().await;
        for i in 0..self.workers {
            let worker = BatchWorker {
                name: format!("batch-worker-{i}"),
                ctx: self.ctx.clone(),
                receiver: Arc::clone(&self.receiver),
                requeue: self.sender.clone(),
            };
            handles.push(tokio::spawn(worker.run(token.clone())));
        }
        *shutdown = Some(token);
        info!(workers = self.workers, "Batch engine started");
        true
    }

    /// Signals the workers to stop and waits for them to exit.
    ///
    /// Running jobs finish and pending jobs stay queued. Paused jobs are
    /// cancelled, since nothing would resume them.
    pub async fn stop(&self) {
        let Some(token) = self.shutdown.lock().await.take() else {
            return;
        };
        token.cancel();

        let paused: Vec<String> = {
            let tables = self.ctx.tables.read().await;
            tables
                .active
                .iter()
                .filter(|(_, record)| record.job.status == JobStatus::Paused)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in paused {
            warn!(job_id = %id, "Cancelling paused job on shutdown");
            self.cancel(&id).await;
        }

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Batch worker panicked");
            }
        }
        info!("Batch engine stopped");
    }

    /// Validates and enqueues a job, returning its ID.
    ///
    /// # Errors
    /// `NotRunning` when stopped, `Validation` for malformed jobs,
    /// `TooManyActiveJobs` at the active-job limit, `QueueFull` when the job
    /// queue is at capacity.
    pub async fn submit(&self, spec: BatchSpec) -> Result<String> {
        if !self.is_running().await {
            return Err(OrchestrationError::NotRunning);
        }
        let job = BatchJob::from_spec(spec)?;
        let id = job.id.clone();
        let total = job.total;

        {
            let mut tables = self.ctx.tables.write().await;
            let active = tables.active.len();
            if active >= self.max_active_jobs {
                return Err(OrchestrationError::TooManyActiveJobs {
                    active,
                    max: self.max_active_jobs,
                });
            }
            match self.sender.try_send(id.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(OrchestrationError::QueueFull { capacity: self.queue_capacity });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(OrchestrationError::NotRunning);
                }
            }
            info!(job_id = %id, name = %job.name, mode = %job.mode, total, "Batch job submitted");
            tables.active.insert(id.clone(), JobRecord { job, control: Arc::default() });
        }

        self.ctx.progress.create_job(&id, total).await;
        self.ctx.progress.publish(ProgressEvent::JobSubmitted { job_id: id.clone(), total });
        Ok(id)
    }

    /// Snapshot of a job.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn status(&self, id: &str) -> Result<JobSnapshot> {
        self.ctx
            .tables
            .read()
            .await
            .get(id)
            .map(BatchJob::snapshot)
            .ok_or_else(|| OrchestrationError::NotFound(id.to_string()))
    }

    /// The job's requests with whatever outputs and errors they have so far.
    ///
    /// # Errors
    /// `NotFound` for unknown or evicted IDs.
    pub async fn results(&self, id: &str) -> Result<Vec<GenerationRequest>> {
        self.ctx
            .tables
            .read()
            .await
            .get(id)
            .map(|job| job.requests.clone())
            .ok_or_else(|| OrchestrationError::NotFound(id.to_string()))
    }

    /// Cancels a pending, running, or paused job.
    ///
    /// Returns `false` if the job is unknown or already terminal.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut tables = self.ctx.tables.write().await;
        let Some(record) = tables.active.get_mut(id) else {
            return false;
        };
        let was_pending = record.job.status == JobStatus::Pending;
        if record.job.transition(JobStatus::Cancelled).is_err() {
            return false;
        }
        record.control.cancel.cancel();
        record.control.paused.store(false, Ordering::SeqCst);
        record.control.resume.notify_waiters();
        info!(job_id = %id, "Batch job cancelled");

        // No worker owns a pending job yet, so retire it here.
        if was_pending {
            tables.retire(id, self.ctx.completed_history);
            drop(tables);
            self.ctx.progress.complete_job(id).await;
        } else {
            drop(tables);
        }
        self.ctx.progress.publish(ProgressEvent::JobStatusChanged {
            job_id: id.to_string(),
            status: JobStatus::Cancelled,
        });
        true
    }

    /// Pauses a running sequential job before its next item.
    ///
    /// Returns `false` if the job is unknown, not running, or not sequential.
    pub async fn pause(&self, id: &str) -> bool {
        let mut tables = self.ctx.tables.write().await;
        let Some(record) = tables.active.get_mut(id) else {
            return false;
        };
        if record.job.mode != ProcessingMode::Sequential {
            debug!(job_id = %id, mode = %record.job.mode, "Pause ignored for non-sequential job");
            return false;
        }
        if record.job.status != JobStatus::Running || record.job.transition(JobStatus::Paused).is_err() {
            return false;
        }
        record.control.paused.store(true, Ordering::SeqCst);
        drop(tables);
        info!(job_id = %id, "Batch job paused");
        self.ctx.progress.publish(ProgressEvent::JobStatusChanged {
            job_id: id.to_string(),
            status: JobStatus::Paused,
        });
        true
    }

    /// Resumes a paused job.
    ///
    /// Returns `false` if the job is unknown or not paused.
    pub async fn resume(&self, id: &str) -> bool {
        let mut tables = self.ctx.tables.write().await;
        let Some(record) = tables.active.get_mut(id) else {
            return false;
        };
        if record.job.status != JobStatus::Paused || record.job.transition(JobStatus::Running).is_err() {
            return false;
        }
        record.control.paused.store(false, Ordering::SeqCst);
        record.control.resume.notify_waiters();
        drop(tables);
        info!(job_id = %id, "Batch job resumed");
        self.ctx.progress.publish(ProgressEvent::JobStatusChanged {
            job_id: id.to_string(),
            status: JobStatus::Running,
        });
        true
    }

    /// Job counts by state.
    pub async fn job_counts(&self) -> JobCounts {
        let tables = self.ctx.tables.read().await;
        JobCounts {
            pending: tables.count(JobStatus::Pending),
            running: tables.count(JobStatus::Running),
            paused: tables.count(JobStatus::Paused),
            completed: tables.completed.len(),
        }
    }
}

/// One batch worker loop.
struct BatchWorker {
    name: String,
    ctx: BatchContext,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    requeue: mpsc::Sender<String>,
}

impl BatchWorker {
    async fn run(self, shutdown: CancellationToken) {
        info!(worker = %self.name, "Batch worker started");
        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => break,
                next = async { self.receiver.lock().await.recv().await } => next,
            };
            let Some(job_id) = next else {
                break;
            };
            self.process(&job_id, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }
        }
        info!(worker = %self.name, "Batch worker stopped");
    }

    async fn process(&self, job_id: &str, shutdown: &CancellationToken) {
        let (control, total) = {
            let tables = self.ctx.tables.read().await;
            match tables.active.get(job_id) {
                Some(record) if record.job.status == JobStatus::Pending => {
                    (Arc::clone(&record.control), record.job.total)
                }
                _ => {
                    debug!(worker = %self.name, job_id = %job_id, "Skipping job that is no longer pending");
                    return;
                }
            }
        };

        let admitted = tokio::select! {
            () = shutdown.cancelled() => false,
            () = control.cancel.cancelled() => false,
            waited = self.ctx.rate_limiter.acquire(total) => {
                if !waited.is_zero() {
                    info!(job_id = %job_id, waited_ms = waited.as_millis() as u64, "Batch job delayed by rate limit");
                }
                true
            }
        };
        if !admitted {
            if shutdown.is_cancelled() && !control.cancel.is_cancelled() {
                // Still pending; leave it for the next start.
                if self.requeue.try_send(job_id.to_string()).is_err() {
                    warn!(job_id = %job_id, "Could not requeue pending job on shutdown");
                }
            }
            return;
        }

        let Some((requests, mode, max_concurrent, stop_on_error, retry_failed)) =
            self.begin(job_id).await
        else {
            return;
        };

        info!(
            worker = %self.name,
            job_id = %job_id,
            mode = %mode,
            total,
            "Batch job started"
        );

        let outcome = match mode {
            ProcessingMode::Sequential => {
                self.run_sequential(job_id, requests, &control, stop_on_error, retry_failed).await
            }
            ProcessingMode::Concurrent => {
                self.run_concurrent(job_id, requests, &control, max_concurrent, stop_on_error, retry_failed)
                    .await
            }
            ProcessingMode::Adaptive => {
                let limit = self.adaptive_limit(job_id, max_concurrent).await;
                self.run_concurrent(job_id, requests, &control, limit, stop_on_error, retry_failed).await
            }
        };

        self.finish(job_id, outcome).await;
    }

    /// Moves a pending job to running and hands out its requests.
    async fn begin(
        &self,
        job_id: &str,
    ) -> Option<(Vec<GenerationRequest>, ProcessingMode, usize, bool, bool)> {
        let mut tables = self.ctx.tables.write().await;
        let record = tables.active.get_mut(job_id)?;
        if record.job.transition(JobStatus::Running).is_err() {
            return None;
        }
        let job = &record.job;
        let started =
            (job.requests.clone(), job.mode, job.max_concurrent, job.stop_on_error, job.retry_failed);
        drop(tables);
        self.ctx.progress.publish(ProgressEvent::JobStatusChanged {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
        });
        Some(started)
    }

    async fn adaptive_limit(&self, job_id: &str, base: usize) -> usize {
        let load = self.ctx.monitor.current().await;
        let mut tables = self.ctx.tables.write().await;
        let active = tables.count(JobStatus::Running) + tables.count(JobStatus::Paused);
        let limit = effective_concurrency(base, load, active);
        if let Some(record) = tables.active.get_mut(job_id) {
            record.job.effective_concurrency = Some(limit);
        }
        info!(
            job_id = %job_id,
            base,
            effective = limit,
            active_jobs = active,
            memory_percent = load.map(|l| l.memory_percent),
            cpu_percent = load.map(|l| l.cpu_percent),
            "Adaptive concurrency computed"
        );
        limit
    }

    async fn run_sequential(
        &self,
        job_id: &str,
        requests: Vec<GenerationRequest>,
        control: &JobControl,
        stop_on_error: bool,
        retry_failed: bool,
    ) -> RunOutcome {
        for (index, request) in requests.into_iter().enumerate() {
            control.wait_while_paused(self.ctx.pause_poll).await;
            if control.cancel.is_cancelled() {
                debug!(job_id = %job_id, index, "Job cancelled, stopping before next item");
                break;
            }

            let (request, panic) =
                run_item(&self.ctx, request, &control.cancel, &self.name, retry_failed).await;
            let failure = (request.status == RequestStatus::Failed)
                .then(|| request.error.clone().unwrap_or_default());
            self.record(job_id, index, request).await;

            if let Some(message) = panic {
                return RunOutcome::Aborted(format!("request {index} panicked: {message}"));
            }
            if let Some(reason) = failure
                && stop_on_error
            {
                warn!(job_id = %job_id, index, "Stopping job on first failure");
                return RunOutcome::Aborted(format!("stopped on error at request {index}: {reason}"));
            }
        }
        RunOutcome::Finished
    }

    async fn run_concurrent(
        &self,
        job_id: &str,
        requests: Vec<GenerationRequest>,
        control: &JobControl,
        limit: usize,
        stop_on_error: bool,
        retry_failed: bool,
    ) -> RunOutcome {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        // Child of the job's cancel token; also fired by `stop_on_error`.
        let abort = control.cancel.child_token();
        let mut set = JoinSet::new();

        for (index, mut request) in requests.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let abort = abort.clone();
            let ctx = self.ctx.clone();
            let worker = self.name.clone();
            set.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    () = abort.cancelled() => None,
                };
                if permit.is_none() || abort.is_cancelled() {
                    request.cancel();
                    return (index, request, None);
                }
                let (request, panic) = run_item(&ctx, request, &abort, &worker, retry_failed).await;
                drop(permit);
                (index, request, panic)
            });
        }

        let mut outcome = RunOutcome::Finished;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, request, panic)) => {
                    let failure = (request.status == RequestStatus::Failed)
                        .then(|| request.error.clone().unwrap_or_default());
                    self.record(job_id, index, request).await;
                    if let Some(message) = panic {
                        abort.cancel();
                        if matches!(outcome, RunOutcome::Finished) {
                            outcome =
                                RunOutcome::Aborted(format!("request {index} panicked: {message}"));
                        }
                    } else if let Some(reason) = failure
                        && stop_on_error
                        && matches!(outcome, RunOutcome::Finished)
                    {
                        warn!(job_id = %job_id, index, "Aborting remaining requests on first failure");
                        abort.cancel();
                        outcome = RunOutcome::Aborted(format!(
                            "stopped on error at request {index}: {reason}"
                        ));
                    }
                }
                Err(e) => {
                    error!(job_id = %job_id, worker = %self.name, error = %e, "Batch item task failed");
                    abort.cancel();
                    outcome = RunOutcome::Aborted(format!("item task failed: {e}"));
                }
            }
        }
        outcome
    }

    async fn record(&self, job_id: &str, index: usize, request: GenerationRequest) {
        let counts = {
            let mut tables = self.ctx.tables.write().await;
            tables.active.get_mut(job_id).map(|record| {
                record.job.record_outcome(index, request, &self.name);
                (record.job.completed, record.job.failed)
            })
        };
        if let Some((completed, failed)) = counts {
            self.ctx.progress.update_progress(job_id, completed, Some(failed)).await;
        }
    }

    async fn finish(&self, job_id: &str, outcome: RunOutcome) {
        let status = {
            let mut tables = self.ctx.tables.write().await;
            let Some(record) = tables.active.get_mut(job_id) else {
                return;
            };
            let job = &mut record.job;
            if job.status == JobStatus::Paused {
                settle(job, JobStatus::Running);
            }
            if !job.status.is_terminal() {
                match outcome {
                    RunOutcome::Finished => settle(job, JobStatus::Completed),
                    RunOutcome::Aborted(reason) => {
                        job.record_job_error(reason, &self.name);
                        settle(job, JobStatus::Failed);
                    }
                }
            }
            info!(
                worker = %self.name,
                job_id = %job_id,
                status = %job.status,
                completed = job.completed,
                failed = job.failed,
                total = job.total,
                "Batch job finished"
            );
            tables.retire(job_id, self.ctx.completed_history)
        };

        self.ctx.progress.complete_job(job_id).await;
        if let Some(status) = status
            && status != JobStatus::Cancelled
        {
            // Cancellation was already announced by `cancel`.
            self.ctx.progress.publish(ProgressEvent::JobStatusChanged {
                job_id: job_id.to_string(),
                status,
            });
        }
    }
}

/// Applies a closing transition, logging the rare case where the lifecycle rejects it.
fn settle(job: &mut BatchJob, next: JobStatus) {
    if let Err(current) = job.transition(next) {
        warn!(job_id = %job.id, from = %current, to = %next, "Rejected batch job transition");
    }
}

/// Runs one item, retrying failures per the policy when `retry` is set.
///
/// A panic is never retried; its message comes back alongside the failed request.
async fn run_item(
    ctx: &BatchContext,
    request: GenerationRequest,
    cancel: &CancellationToken,
    worker: &str,
    retry: bool,
) -> (GenerationRequest, Option<String>) {
    let max_retries = if retry { ctx.retry.max_retries } else { 0 };
    let mut attempt = 0;
    loop {
        let mut current = request.clone();
        let panic = ctx.pipeline.run_isolated(&mut current, cancel, worker).await;

        if panic.is_some() || current.status != RequestStatus::Failed || attempt >= max_retries {
            ctx.stats.record(&current).await;
            return (current, panic);
        }

        let delay = ctx.retry.calculate_delay(attempt);
        warn!(
            request_id = %current.id,
            worker = %worker,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Retrying failed request after backoff"
        );
        tokio::select! {
            () = cancel.cancelled() => {
                ctx.stats.record(&current).await;
                return (current, None);
            }
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::{FixedLoad, SystemLoad};
    use crate::providers::MockProvider;
    use crate::request::RequestSpec;
    use crate::routing::ProviderRouter;
    use scribe_abstraction::Provider;

    fn engine(provider: Arc<MockProvider>, settings: &BatchSettings) -> BatchEngine {
        let providers: Vec<Arc<dyn Provider>> = vec![provider];
        let pipeline = Arc::new(GenerationPipeline::new(Arc::new(ProviderRouter::new(providers))));
        BatchEngine::new(
            settings,
            pipeline,
            Arc::new(RateLimiter::new(1000, Duration::from_secs(60))),
            Arc::new(ProgressTracker::new(Duration::from_secs(3600))),
            Arc::new(GenerationStats::new()),
            Arc::new(ResourceMonitor::new(Arc::new(FixedLoad(SystemLoad {
                memory_percent: 75.0,
                cpu_percent: 50.0,
            })))),
        )
    }

    fn spec(count: usize) -> BatchSpec {
        BatchSpec::new(
            "test batch",
            (0..count).map(|i| RequestSpec::new("article", format!("topic {i}"))).collect(),
        )
    }

    async fn wait_terminal(engine: &BatchEngine, id: &str) -> JobSnapshot {
        for _ in 0..500 {
            let snapshot = engine.status(id).await.unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn test_sequential_job_completes() {
        let engine = engine(Arc::new(MockProvider::new("alpha")), &BatchSettings::default());
        engine.start().await;
        let id = engine.submit(spec(4)).await.unwrap();
        let snapshot = wait_terminal(&engine, &id).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!((snapshot.completed, snapshot.failed, snapshot.total), (4, 0, 4));
        assert!((snapshot.progress_percent - 100.0).abs() < f64::EPSILON);
        let results = engine.results(&id).await.unwrap();
        assert!(results.iter().all(|r| r.status == RequestStatus::Completed));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_empty_job_rejected() {
        let engine = engine(Arc::new(MockProvider::new("alpha")), &BatchSettings::default());
        engine.start().await;
        let err = engine.submit(spec(0)).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_active_job_limit() {
        let settings = BatchSettings { workers: 1, max_active_jobs: 1, ..BatchSettings::default() };
        let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(200)));
        let engine = engine(provider, &settings);
        engine.start().await;

        let first = engine.submit(spec(2)).await.unwrap();
        let err = engine.submit(spec(1)).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::TooManyActiveJobs { active: 1, max: 1 }));

        wait_terminal(&engine, &first).await;
        assert!(engine.submit(spec(1)).await.is_ok());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_retry_failed_items() {
        let settings = BatchSettings { retry_attempts: 2, retry_initial_delay_ms: 1, ..BatchSettings::default() };
        let provider = Arc::new(MockProvider::new("alpha").failing_first(2));
        let engine = engine(Arc::clone(&provider), &settings);
        engine.start().await;

        let id = engine.submit(spec(1).with_retry_failed(true)).await.unwrap();
        let snapshot = wait_terminal(&engine, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(provider.calls(), 3);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_adaptive_records_effective_concurrency() {
        let engine = engine(Arc::new(MockProvider::new("alpha")), &BatchSettings::default());
        engine.start().await;
        let id = engine
            .submit(spec(6).with_mode(ProcessingMode::Adaptive).with_max_concurrent(10))
            .await
            .unwrap();
        let snapshot = wait_terminal(&engine, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.mode, ProcessingMode::Adaptive);
        assert_eq!(snapshot.effective_concurrency, Some(5));
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_finished() {
        let engine = engine(Arc::new(MockProvider::new("alpha")), &BatchSettings::default());
        engine.start().await;
        assert!(!engine.cancel("job-missing").await);
        let id = engine.submit(spec(1)).await.unwrap();
        wait_terminal(&engine, &id).await;
        assert!(!engine.cancel(&id).await);
        assert!(!engine.pause(&id).await);
        assert!(!engine.resume(&id).await);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_pause_rejected_for_concurrent_jobs() {
        let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(100)));
        let engine = engine(provider, &BatchSettings::default());
        engine.start().await;
        let id = engine.submit(spec(3).with_mode(ProcessingMode::Concurrent)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!engine.pause(&id).await);
        wait_terminal(&engine, &id).await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_paused_job() {
        let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(50)));
        let engine = engine(provider, &BatchSettings::default());
        engine.start().await;
        let id = engine.submit(spec(4)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.pause(&id).await);
        tokio::time::sleep(Duration::from_millis(80)).await;

        tokio::time::timeout(Duration::from_secs(2), engine.stop())
            .await
            .expect("stop returns while a job is paused");
        let snapshot = engine.status(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(snapshot.completed < 4);
    }

    #[tokio::test]
    async fn test_panicking_item_fails_sequential_job() {
        let settings = BatchSettings { workers: 1, ..BatchSettings::default() };
        let provider = Arc::new(MockProvider::new("alpha").panicking_on("topic 1"));
        let engine = engine(Arc::clone(&provider), &settings);
        engine.start().await;

        let id = engine.submit(spec(4)).await.unwrap();
        let snapshot = wait_terminal(&engine, &id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(provider.calls(), 2);
        assert!(snapshot.errors.iter().any(|e| e.index.is_none() && e.message.contains("panicked")));
        assert_eq!(engine.job_counts().await.running, 0);

        // The single batch worker keeps serving jobs.
        let next = engine.submit(BatchSpec::new("after", vec![RequestSpec::new("article", "calm")])).await.unwrap();
        assert_eq!(wait_terminal(&engine, &next).await.status, JobStatus::Completed);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_item_aborts_concurrent_job() {
        let provider = Arc::new(
            MockProvider::new("alpha").with_latency(Duration::from_millis(20)).panicking_on("topic 0"),
        );
        let engine = engine(Arc::clone(&provider), &BatchSettings::default());
        engine.start().await;

        let id = engine
            .submit(spec(8).with_mode(ProcessingMode::Concurrent).with_max_concurrent(2))
            .await
            .unwrap();
        let snapshot = wait_terminal(&engine, &id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.failed >= 1);
        assert!(snapshot.completed + snapshot.failed < 8);
        assert!(provider.calls() < 8);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_completed_history_bounded() {
        let settings = BatchSettings { completed_history: 2, ..BatchSettings::default() };
        let engine = engine(Arc::new(MockProvider::new("alpha")), &settings);
        engine.start().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = engine.submit(spec(1)).await.unwrap();
            wait_terminal(&engine, &id).await;
            ids.push(id);
        }
        assert!(matches!(engine.status(&ids[0]).await, Err(OrchestrationError::NotFound(_))));
        assert_eq!(engine.job_counts().await.completed, 2);
        engine.stop().await;
    }
}
