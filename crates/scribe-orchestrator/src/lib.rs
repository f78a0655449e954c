//! Content generation orchestrator for Scribe.
//!
//! Schedules single requests and batch jobs across interchangeable providers,
//! enforcing a shared rate limit, routing with fallback, load-aware batch
//! concurrency, and progress tracking.

pub mod adaptive;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod queue;
pub mod rate_limiter;
pub mod request;
pub mod retry;
pub mod routing;
pub mod scheduler;
pub mod stats;

pub use adaptive::{effective_concurrency, FixedLoad, LoadProbe, ProcfsProbe, ResourceMonitor, SystemLoad};
pub use batch::{BatchEngine, JobCounts};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ContentEngine, EngineBuilder, EngineStatistics};
pub use error::{OrchestrationError, Result};
pub use job::{BatchJob, BatchSpec, JobError, JobSnapshot, JobStatus, ProcessingMode};
pub use pipeline::{GenerationPipeline, PassThrough};
pub use progress::{ProgressEvent, ProgressStatus, ProgressTracker};
pub use providers::MockProvider;
pub use queue::{AgingPolicy, PriorityQueue, QueueDepths};
pub use rate_limiter::RateLimiter;
pub use request::{GeneratedContent, GenerationRequest, Priority, RequestSpec, RequestStatus};
pub use retry::RetryPolicy;
pub use routing::{
    DispatchOutcome, FailureRecord, ProviderPerformance, ProviderRouter, RouteDecision,
    RoutingError, RoutingStrategy,
};
pub use scheduler::RequestScheduler;
pub use stats::{GenerationStats, GenerationStatsSnapshot};
