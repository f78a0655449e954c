//! TOML configuration for the engine.

use crate::routing::RoutingStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log level for binaries embedding the engine.
    pub log_level: Option<String>,
    /// Single-request scheduler settings.
    pub scheduler: SchedulerSettings,
    /// Batch engine settings.
    pub batch: BatchSettings,
    /// Shared rate limiter settings.
    pub rate_limit: RateLimitSettings,
    /// Provider routing settings.
    pub routing: RoutingSettings,
    /// Progress tracker settings.
    pub progress: ProgressSettings,
    /// Resource sampling settings.
    pub resources: ResourceSettings,
    /// Quality gate settings.
    pub quality: QualitySettings,
}

/// Single-request scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of content workers.
    pub workers: usize,
    /// Capacity of the shared priority queue.
    pub queue_capacity: usize,
    /// How long a worker waits on an empty queue before re-checking.
    pub poll_interval_ms: u64,
    /// Finished requests kept for status/result queries.
    pub history_limit: usize,
    /// Promote a waiting item one tier per interval. Unset keeps strict priority.
    pub aging_promote_after_ms: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 1000,
            poll_interval_ms: 100,
            history_limit: 1000,
            aging_promote_after_ms: None,
        }
    }
}

impl SchedulerSettings {
    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Batch engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Number of batch workers.
    pub workers: usize,
    /// Capacity of the job queue.
    pub queue_capacity: usize,
    /// Maximum jobs that may be pending or running at once.
    pub max_active_jobs: usize,
    /// Finished jobs kept for status/result queries.
    pub completed_history: usize,
    /// Poll interval while a sequential job is paused.
    pub pause_poll_interval_ms: u64,
    /// Extra attempts for failed items when a job sets `retry_failed`.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub retry_initial_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 100,
            max_active_jobs: 10,
            completed_history: 100,
            pause_poll_interval_ms: 100,
            retry_attempts: 1,
            retry_initial_delay_ms: 200,
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Admissions allowed per window.
    pub requests_per_minute: usize,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { requests_per_minute: 60, window_secs: 60 }
    }
}

/// Provider routing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Strategy used when a call does not name one.
    pub default_strategy: RoutingStrategy,
    /// Upper bound on a single provider health check.
    pub health_check_timeout_ms: u64,
    /// Latency (seconds) assumed for providers with no samples when scoring `balanced`.
    pub unseen_latency_secs: f64,
    /// Content type -> ordered provider names for `quality_first`.
    /// The `default` key applies to unlisted content types.
    pub quality_preferences: HashMap<String, Vec<String>>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::Balanced,
            health_check_timeout_ms: 2000,
            unseen_latency_secs: 10.0,
            quality_preferences: HashMap::new(),
        }
    }
}

/// Progress tracker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    /// How long finished jobs stay queryable.
    pub retention_secs: u64,
    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self { retention_secs: 3600, sweep_interval_secs: 300 }
    }
}

/// Resource sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Interval between system load samples.
    pub sample_interval_ms: u64,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self { sample_interval_ms: 5000 }
    }
}

/// Quality gate settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Content scoring below this is rejected. `0.0` accepts everything.
    pub min_score: f64,
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("scheduler.workers", self.scheduler.workers),
            ("scheduler.queue_capacity", self.scheduler.queue_capacity),
            ("batch.workers", self.batch.workers),
            ("batch.queue_capacity", self.batch.queue_capacity),
            ("batch.max_active_jobs", self.batch.max_active_jobs),
            ("batch.completed_history", self.batch.completed_history),
            ("rate_limit.requests_per_minute", self.rate_limit.requests_per_minute),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be greater than 0")));
            }
        }

        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.window_secs must be greater than 0".to_string(),
            ));
        }

        if self.scheduler.aging_promote_after_ms == Some(0) {
            return Err(ConfigError::Validation(
                "scheduler.aging_promote_after_ms must be greater than 0 when set".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.quality.min_score) {
            return Err(ConfigError::Validation(format!(
                "Invalid quality.min_score: {}. Must be between 0.0 and 1.0",
                self.quality.min_score
            )));
        }

        if !self.routing.unseen_latency_secs.is_finite() || self.routing.unseen_latency_secs < 0.0 {
            return Err(ConfigError::Validation(
                "routing.unseen_latency_secs must be a non-negative number".to_string(),
            ));
        }

        for (content_type, providers) in &self.routing.quality_preferences {
            if providers.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "quality_preferences.{content_type} must list at least one provider"
                )));
            }
        }

        Ok(())
    }
}
