//! Types for provider routing.

use crate::error::OrchestrationError;
use chrono::{DateTime, Utc};
use scribe_abstraction::{GenerationOutput, ProviderError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How the router orders candidate providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Cheapest estimated cost first.
    CostOptimized,
    /// Configured per-content-type preference order.
    QualityFirst,
    /// Lowest mean observed response time first.
    SpeedFirst,
    /// Rotate the starting provider on each call.
    RoundRobin,
    /// Weighted blend of cost, speed, and reliability.
    #[default]
    Balanced,
}

impl RoutingStrategy {
    /// All strategies.
    pub const ALL: [Self; 5] =
        [Self::CostOptimized, Self::QualityFirst, Self::SpeedFirst, Self::RoundRobin, Self::Balanced];
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CostOptimized => write!(f, "cost_optimized"),
            Self::QualityFirst => write!(f, "quality_first"),
            Self::SpeedFirst => write!(f, "speed_first"),
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Balanced => write!(f, "balanced"),
        }
    }
}

impl std::str::FromStr for RoutingStrategy {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cost_optimized" => Ok(Self::CostOptimized),
            "quality_first" => Ok(Self::QualityFirst),
            "speed_first" => Ok(Self::SpeedFirst),
            "round_robin" => Ok(Self::RoundRobin),
            "balanced" => Ok(Self::Balanced),
            other => Err(OrchestrationError::Validation(format!(
                "Invalid routing strategy: {other}. Valid options: cost_optimized, quality_first, speed_first, round_robin, balanced"
            ))),
        }
    }
}

/// A single failed provider attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Provider that failed.
    pub provider: String,
    /// The error it returned.
    pub error: ProviderError,
    /// When the attempt failed.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a failure record stamped with the current time.
    #[must_use]
    pub fn new(provider: String, error: ProviderError) -> Self {
        Self { provider, error, timestamp: Utc::now() }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

fn describe_failures(failures: &[FailureRecord]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Routing errors.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// No provider has been registered with the router.
    #[error("No providers registered")]
    NoProviders,

    /// Every provider in the chain failed; records are in attempt order.
    #[error("All {} providers failed: {}", .0.len(), describe_failures(.0))]
    AllProvidersFailed(Vec<FailureRecord>),
}

impl RoutingError {
    /// The error from the last provider tried, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&ProviderError> {
        match self {
            Self::NoProviders => None,
            Self::AllProvidersFailed(failures) => failures.last().map(|f| &f.error),
        }
    }
}

/// Primary provider and ordered fallback chain for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Strategy that produced the order.
    pub strategy: RoutingStrategy,
    /// First provider to try.
    pub primary: String,
    /// Providers tried after the primary fails, in order.
    pub fallbacks: Vec<String>,
}

impl RouteDecision {
    /// Primary followed by the fallbacks.
    pub fn chain(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// Successful dispatch through the chain.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Provider that succeeded.
    pub provider: String,
    /// Its output.
    pub output: GenerationOutput,
    /// Latency of the successful call.
    pub latency: Duration,
    /// Failures from providers tried before it.
    pub failures: Vec<FailureRecord>,
}
