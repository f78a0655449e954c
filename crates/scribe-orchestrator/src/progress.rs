//! Progress tracking and the engine event stream.
//!
//! The tracker keeps per-job item counts, projects a completion time from
//! observed throughput, and broadcasts [`ProgressEvent`]s to subscribers.
//! Finished entries are evicted by a periodic sweep once they have been
//! terminal for the retention window.

use crate::job::JobStatus;
use crate::request::{Priority, RequestStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A single request was accepted.
    RequestSubmitted {
        /// Request ID.
        request_id: String,
        /// Priority tier.
        priority: Priority,
    },
    /// A single request reached a terminal state.
    RequestFinished {
        /// Request ID.
        request_id: String,
        /// Final state.
        status: RequestStatus,
        /// Provider that produced the content, if any.
        provider: Option<String>,
    },
    /// A batch job was accepted.
    JobSubmitted {
        /// Job ID.
        job_id: String,
        /// Number of requests.
        total: usize,
    },
    /// A batch job changed state.
    JobStatusChanged {
        /// Job ID.
        job_id: String,
        /// New state.
        status: JobStatus,
    },
    /// Tracked item counts changed.
    Progress {
        /// Tracked job ID.
        job_id: String,
        /// Completed items.
        completed: usize,
        /// Failed items.
        failed: usize,
        /// Total items.
        total: usize,
        /// `completed / total * 100`.
        percent: f64,
    },
}

/// Point-in-time progress of a tracked job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressStatus {
    /// Tracked job ID.
    pub job_id: String,
    /// Total items.
    pub total: usize,
    /// Completed items.
    pub completed: usize,
    /// Failed items.
    pub failed: usize,
    /// Items not yet processed.
    pub remaining: usize,
    /// `completed / total * 100`.
    pub percent: f64,
    /// Projected completion, once at least one item has completed.
    pub estimated_completion: Option<DateTime<Utc>>,
    /// When tracking started.
    pub started_at: DateTime<Utc>,
    /// Whether the job has been marked complete.
    pub finished: bool,
}

#[derive(Debug, Clone)]
struct JobProgress {
    total: usize,
    completed: usize,
    failed: usize,
    started: Instant,
    started_at: DateTime<Utc>,
    finished: Option<Instant>,
    estimated_completion: Option<DateTime<Utc>>,
}

impl JobProgress {
    fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }

    fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    fn project(&mut self) {
        if self.completed == 0 {
            self.estimated_completion = None;
            return;
        }
        let now = Utc::now();
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            self.estimated_completion = Some(now);
            return;
        }
        let rate = self.completed as f64 / elapsed;
        let seconds_left = self.remaining() as f64 / rate;
        self.estimated_completion = Duration::try_from_secs_f64(seconds_left)
            .ok()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);
    }

    fn status(&self, job_id: &str) -> ProgressStatus {
        ProgressStatus {
            job_id: job_id.to_string(),
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            remaining: self.remaining(),
            percent: self.percent(),
            estimated_completion: self.estimated_completion,
            started_at: self.started_at,
            finished: self.finished.is_some(),
        }
    }
}

/// Tracks progress for batch jobs and single requests.
#[derive(Debug)]
pub struct ProgressTracker {
    jobs: Mutex<HashMap<String, JobProgress>>,
    retention: Duration,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressTracker {
    /// Creates a tracker that keeps finished jobs for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { jobs: Mutex::new(HashMap::new()), retention, events }
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Publishes an event. Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    /// Starts tracking a job of `total` items.
    pub async fn create_job(&self, job_id: &str, total: usize) {
        let progress = JobProgress {
            total,
            completed: 0,
            failed: 0,
            started: Instant::now(),
            started_at: Utc::now(),
            finished: None,
            estimated_completion: None,
        };
        self.jobs.lock().await.insert(job_id.to_string(), progress);
        debug!(job_id = %job_id, total, "Tracking progress");
    }

    /// Sets the absolute item counts for a job and re-projects its completion.
    ///
    /// Counts are clamped to the job's total. Returns `false` for unknown jobs.
    pub async fn update_progress(&self, job_id: &str, completed: usize, failed: Option<usize>) -> bool {
        let event = {
            let mut jobs = self.jobs.lock().await;
            let Some(progress) = jobs.get_mut(job_id) else {
                return false;
            };
            progress.completed = completed.min(progress.total);
            if let Some(failed) = failed {
                progress.failed = failed.min(progress.total - progress.completed);
            }
            progress.project();
            ProgressEvent::Progress {
                job_id: job_id.to_string(),
                completed: progress.completed,
                failed: progress.failed,
                total: progress.total,
                percent: progress.percent(),
            }
        };
        self.publish(event);
        true
    }

    /// Current progress, or `None` for unknown or evicted jobs.
    pub async fn status(&self, job_id: &str) -> Option<ProgressStatus> {
        self.jobs.lock().await.get(job_id).map(|p| p.status(job_id))
    }

    /// Marks a job finished, starting its retention window.
    pub async fn complete_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(progress) = jobs.get_mut(job_id) else {
            return false;
        };
        if progress.finished.is_none() {
            progress.finished = Some(Instant::now());
            if progress.completed > 0 && progress.remaining() == 0 {
                progress.estimated_completion = Some(Utc::now());
            }
        }
        true
    }

    /// Drops a job's entry outright. Returns `false` when it was not tracked.
    pub async fn remove(&self, job_id: &str) -> bool {
        self.jobs.lock().await.remove(job_id).is_some()
    }

    /// Number of tracked jobs.
    pub async fn tracked(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Evicts jobs finished at least the retention window ago.
    pub async fn sweep(&self) -> usize {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        let retention = self.retention;
        jobs.retain(|_, p| p.finished.is_none_or(|at| at.elapsed() < retention));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!(evicted, remaining = jobs.len(), "Swept finished progress entries");
        }
        evicted
    }

    /// Spawns the periodic sweep. It exits when `shutdown` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Progress sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            info!("Progress sweeper stopped");
        })
    }
}
