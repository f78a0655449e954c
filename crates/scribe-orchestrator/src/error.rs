// Error types for orchestration

use crate::config::ConfigError;
use crate::routing::RoutingError;
use scribe_abstraction::ProcessingError;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Malformed submission; nothing was enqueued.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The shared request or job queue is at capacity.
    #[error("Queue is full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// Too many batch jobs are already active.
    #[error("Too many active jobs ({active}/{max})")]
    TooManyActiveJobs {
        /// Currently active jobs
        active: usize,
        /// Configured maximum
        max: usize,
    },

    /// Every provider in the fallback chain failed.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A single generation request failed terminally.
    #[error("Request '{id}' failed: {reason}")]
    RequestFailed {
        /// Request ID
        id: String,
        /// Failure reason
        reason: String,
    },

    /// Batch orchestration itself failed.
    #[error("Job '{id}' failed: {reason}")]
    JobFailed {
        /// Job ID
        id: String,
        /// Failure reason
        reason: String,
    },

    /// Unknown request or job ID.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine has not been started or is shutting down.
    #[error("Engine is not running")]
    NotRunning,

    /// Content-processing collaborator error
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestrationError {
    /// Returns `true` if the caller should retry the submission later.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::TooManyActiveJobs { .. } | Self::NotRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_classification() {
        assert!(OrchestrationError::QueueFull { capacity: 10 }.is_capacity());
        assert!(OrchestrationError::TooManyActiveJobs { active: 3, max: 3 }.is_capacity());
        assert!(!OrchestrationError::Validation("empty topic".to_string()).is_capacity());
        assert!(!OrchestrationError::NotFound("job-1".to_string()).is_capacity());
    }

    #[test]
    fn test_display() {
        let err = OrchestrationError::TooManyActiveJobs { active: 3, max: 3 };
        assert_eq!(err.to_string(), "Too many active jobs (3/3)");
    }
}
