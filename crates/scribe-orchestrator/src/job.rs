//! Batch job model and lifecycle.

use crate::error::{OrchestrationError, Result};
use crate::request::{GenerationRequest, Priority, RequestSpec, RequestStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

/// How a batch job's requests are processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One request at a time, in order. Honors pause.
    #[default]
    Sequential,
    /// Up to `max_concurrent` requests in flight.
    Concurrent,
    /// Concurrent, with the ceiling derived from system load.
    Adaptive,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Concurrent => write!(f, "concurrent"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" => Ok(Self::Concurrent),
            "adaptive" => Ok(Self::Adaptive),
            other => {
                Err(OrchestrationError::Validation(format!("unknown processing mode '{other}'")))
            }
        }
    }
}

/// Execution state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a batch worker.
    Pending,
    /// Being processed.
    Running,
    /// Suspended between items (sequential mode only).
    Paused,
    /// Finished normally.
    Completed,
    /// Aborted by `stop_on_error` or an orchestration failure.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl JobStatus {
    /// Returns `true` for states that never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Checks if the job can transition to the given state.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct state transition rule
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            // From Pending: picked up, or cancelled before a worker got to it
            (Self::Pending, Self::Running | Self::Cancelled) => true,
            // From Running: pause, finish, abort, or cancel
            (Self::Running, Self::Paused | Self::Completed | Self::Failed | Self::Cancelled) => true,
            // From Paused: resume, abort, or cancel
            (Self::Paused, Self::Running | Self::Failed | Self::Cancelled) => true,
            // Terminal states never move
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

fn default_max_concurrent() -> usize {
    5
}

/// Caller-supplied description of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSpec {
    /// Human-readable job name.
    pub name: String,
    /// Requests to generate.
    pub requests: Vec<RequestSpec>,
    /// Processing mode.
    #[serde(default)]
    pub mode: ProcessingMode,
    /// Concurrency ceiling for concurrent/adaptive modes.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Job priority.
    #[serde(default)]
    pub priority: Priority,
    /// Re-run failed items before counting them failed.
    #[serde(default)]
    pub retry_failed: bool,
    /// Abort the job on the first item failure.
    #[serde(default)]
    pub stop_on_error: bool,
}

impl BatchSpec {
    /// Creates a sequential batch spec.
    #[must_use]
    pub fn new(name: impl Into<String>, requests: Vec<RequestSpec>) -> Self {
        Self {
            name: name.into(),
            requests,
            mode: ProcessingMode::Sequential,
            max_concurrent: default_max_concurrent(),
            priority: Priority::Normal,
            retry_failed: false,
            stop_on_error: false,
        }
    }

    /// Sets the processing mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the job priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Enables per-item retries.
    #[must_use]
    pub fn with_retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    /// Enables abort-on-first-failure.
    #[must_use]
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }
}

/// A failure recorded against a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Failing request, if the error belongs to one item.
    pub request_id: Option<String>,
    /// Position of the item in the job.
    pub index: Option<usize>,
    /// Error message.
    pub message: String,
    /// Worker that observed the error.
    pub worker: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// A multi-request job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique ID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Owned requests, in submission order.
    pub requests: Vec<GenerationRequest>,
    /// Fixed at submission.
    pub mode: ProcessingMode,
    /// Requested concurrency ceiling.
    pub max_concurrent: usize,
    /// Concurrency actually used (adaptive mode may lower it).
    pub effective_concurrency: Option<usize>,
    /// Job priority.
    pub priority: Priority,
    /// Retry flag.
    pub retry_failed: bool,
    /// Stop-on-error flag.
    pub stop_on_error: bool,
    /// Current state.
    pub status: JobStatus,
    /// Number of requests.
    pub total: usize,
    /// Requests that completed.
    pub completed: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Accumulated errors.
    pub errors: Vec<JobError>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Time a worker started the job.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    /// Builds a pending job, validating the spec and every request in it.
    pub fn from_spec(spec: BatchSpec) -> Result<Self> {
        if spec.requests.is_empty() {
            return Err(OrchestrationError::Validation(
                "batch job must contain at least one request".to_string(),
            ));
        }
        if spec.max_concurrent == 0 {
            return Err(OrchestrationError::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        let requests = spec
            .requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                GenerationRequest::from_spec(request).map_err(|e| {
                    OrchestrationError::Validation(format!("request {index}: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let total = requests.len();

        Ok(Self {
            id: format!("job-{}", uuid::Uuid::new_v4()),
            name: spec.name,
            requests,
            mode: spec.mode,
            max_concurrent: spec.max_concurrent,
            effective_concurrency: None,
            priority: spec.priority,
            retry_failed: spec.retry_failed,
            stop_on_error: spec.stop_on_error,
            status: JobStatus::Pending,
            total,
            completed: 0,
            failed: 0,
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Moves the job to a new state.
    ///
    /// # Returns
    /// Returns `Ok(())` on success, or `Err(current)` if the transition is invalid.
    pub fn transition(&mut self, to: JobStatus) -> std::result::Result<(), JobStatus> {
        if !self.status.can_transition_to(to) {
            error!(job_id = %self.id, from = %self.status, to = %to, "Invalid job transition");
            return Err(self.status);
        }
        debug!(job_id = %self.id, from = %self.status, to = %to, "Job transition");
        self.status = to;
        match to {
            JobStatus::Running if self.started_at.is_none() => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    /// Stores a finished request and updates the counts.
    ///
    /// Cancelled requests are stored but not counted.
    pub fn record_outcome(&mut self, index: usize, request: GenerationRequest, worker: &str) {
        match request.status {
            RequestStatus::Completed if self.completed + self.failed < self.total => {
                self.completed += 1;
            }
            RequestStatus::Failed if self.completed + self.failed < self.total => {
                self.failed += 1;
                self.errors.push(JobError {
                    request_id: Some(request.id.clone()),
                    index: Some(index),
                    message: request.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                    worker: worker.to_string(),
                    timestamp: Utc::now(),
                });
            }
            _ => {}
        }
        if let Some(slot) = self.requests.get_mut(index) {
            *slot = request;
        }
    }

    /// Records an orchestration-level error not tied to one item.
    pub fn record_job_error(&mut self, message: impl Into<String>, worker: &str) {
        self.errors.push(JobError {
            request_id: None,
            index: None,
            message: message.into(),
            worker: worker.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Percentage of requests that completed.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    /// Status view without the request bodies.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            mode: self.mode,
            priority: self.priority,
            max_concurrent: self.max_concurrent,
            effective_concurrency: self.effective_concurrency,
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            progress_percent: self.progress_percent(),
            errors: self.errors.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time view of a job, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job ID.
    pub id: String,
    /// Job name.
    pub name: String,
    /// State.
    pub status: JobStatus,
    /// Processing mode.
    pub mode: ProcessingMode,
    /// Priority.
    pub priority: Priority,
    /// Requested concurrency.
    pub max_concurrent: usize,
    /// Concurrency in effect.
    pub effective_concurrency: Option<usize>,
    /// Number of requests.
    pub total: usize,
    /// Completed requests.
    pub completed: usize,
    /// Failed requests.
    pub failed: usize,
    /// `completed / total * 100`.
    pub progress_percent: f64,
    /// Accumulated errors.
    pub errors: Vec<JobError>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(count: usize) -> BatchSpec {
        BatchSpec::new(
            "weekly digest",
            (0..count).map(|i| RequestSpec::new("article", format!("topic {i}"))).collect(),
        )
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = BatchJob::from_spec(spec(0)).unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[test]
    fn test_invalid_request_rejected() {
        let mut batch = spec(2);
        batch.requests[1].topic = String::new();
        let err = BatchJob::from_spec(batch).unwrap_err();
        assert!(err.to_string().contains("request 1"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(BatchJob::from_spec(spec(1).with_max_concurrent(0)).is_err());
    }

    #[test]
    fn test_job_transitions() {
        let mut job = BatchJob::from_spec(spec(1)).unwrap();
        assert!(job.transition(JobStatus::Paused).is_err());
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Paused).unwrap();
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
        assert_eq!(job.transition(JobStatus::Running), Err(JobStatus::Completed));
        assert_eq!(job.transition(JobStatus::Cancelled), Err(JobStatus::Completed));
    }

    #[test]
    fn test_record_outcome_counts() {
        let mut job = BatchJob::from_spec(spec(3)).unwrap();

        let mut ok = job.requests[0].clone();
        for s in [
            RequestStatus::InProgress,
            RequestStatus::Generated,
            RequestStatus::Validated,
            RequestStatus::Optimized,
            RequestStatus::Completed,
        ] {
            ok.transition(s).unwrap();
        }
        job.record_outcome(0, ok, "batch-worker-0");

        let mut bad = job.requests[1].clone();
        bad.fail("provider exploded");
        job.record_outcome(1, bad, "batch-worker-0");

        let mut cancelled = job.requests[2].clone();
        cancelled.cancel();
        job.record_outcome(2, cancelled, "batch-worker-0");

        assert_eq!(job.completed, 1);
        assert_eq!(job.failed, 1);
        assert!(job.completed + job.failed <= job.total);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].index, Some(1));
        assert_eq!(job.errors[0].worker, "batch-worker-0");
        assert_eq!(job.requests[2].status, RequestStatus::Cancelled);
    }

    #[test]
    fn test_snapshot_percent() {
        let mut job = BatchJob::from_spec(spec(4)).unwrap();
        job.completed = 1;
        let snapshot = job.snapshot();
        assert!((snapshot.progress_percent - 25.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.total, 4);
    }

    #[test]
    fn test_spec_from_json() {
        let json = r#"{
            "name": "launch",
            "requests": [{"content_type": "social_post", "topic": "release"}],
            "mode": "adaptive",
            "stop_on_error": true
        }"#;
        let spec: BatchSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.mode, ProcessingMode::Adaptive);
        assert_eq!(spec.max_concurrent, 5);
        assert!(spec.stop_on_error);
        assert_eq!(spec.requests[0].priority, Priority::Normal);
    }
}
