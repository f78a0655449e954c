//! Generation request model and lifecycle.
//!
//! A request moves forward through
//! `Pending -> InProgress -> Generated -> Validated -> Optimized -> Completed`,
//! and may short-circuit to `Failed` (or `Cancelled`) from any non-terminal state.

use crate::error::{OrchestrationError, Result};
use chrono::{DateTime, Utc};
use scribe_abstraction::Requirements;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

/// Priority tier of a request (`Low < Normal < High < Urgent`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular work.
    #[default]
    Normal,
    /// Ahead of regular work.
    High,
    /// Served before anything else.
    Urgent,
}

impl Priority {
    /// All tiers, highest first (the order workers poll in).
    pub const DESCENDING: [Self; 4] = [Self::Urgent, Self::High, Self::Normal, Self::Low];

    /// Index of the tier, `Low = 0` through `Urgent = 3`.
    #[must_use]
    pub const fn rank(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    /// Tier for a rank, saturating at `Urgent`.
    #[must_use]
    pub const fn from_rank(rank: usize) -> Self {
        match rank {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Urgent,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(OrchestrationError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// Execution state of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting in a queue.
    Pending,
    /// Picked up by a worker.
    InProgress,
    /// A provider returned content.
    Generated,
    /// Content passed quality validation.
    Validated,
    /// Content went through the optimization pass.
    Optimized,
    /// Finalized and ready to return.
    Completed,
    /// Terminal failure.
    Failed,
    /// Discarded because its owner was cancelled.
    Cancelled,
}

impl RequestStatus {
    /// Returns `true` for states that never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Checks if the request can transition to the given state.
    ///
    /// The success path advances exactly one stage at a time; any non-terminal
    /// state may jump to `Failed` or `Cancelled`.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct state transition rule
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Self::Failed | Self::Cancelled) => true,
            (Self::Pending, Self::InProgress) => true,
            (Self::InProgress, Self::Generated) => true,
            (Self::Generated, Self::Validated) => true,
            (Self::Validated, Self::Optimized) => true,
            (Self::Optimized, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Generated => "generated",
            Self::Validated => "validated",
            Self::Optimized => "optimized",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Caller-supplied description of a piece of content to generate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Content-kind tag (newsletter, article, social_post, ...).
    pub content_type: String,
    /// What the content is about.
    pub topic: String,
    /// Free-form requirements forwarded to the collaborators.
    #[serde(default)]
    pub requirements: Requirements,
    /// Priority tier.
    #[serde(default)]
    pub priority: Priority,
    /// Preferred provider name.
    #[serde(default)]
    pub provider: Option<String>,
    /// Template to render the final content through.
    #[serde(default)]
    pub template: Option<String>,
    /// SEO keywords for the optimization pass.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Target audience for the optimization pass.
    #[serde(default)]
    pub audience: Option<String>,
}

impl RequestSpec {
    /// Creates a spec with the given content type and topic.
    #[must_use]
    pub fn new(content_type: impl Into<String>, topic: impl Into<String>) -> Self {
        Self { content_type: content_type.into(), topic: topic.into(), ..Self::default() }
    }

    /// Sets the priority tier.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the preferred provider.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the output template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Adds a requirement entry.
    #[must_use]
    pub fn with_requirement(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.requirements.insert(key.into(), value);
        self
    }

    /// Rejects malformed specs.
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(OrchestrationError::Validation("topic must not be empty".to_string()));
        }
        if self.content_type.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "content_type must not be empty".to_string(),
            ));
        }
        if self.provider.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(OrchestrationError::Validation(
                "provider preference must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Content produced for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Final content.
    pub content: String,
    /// Provider that produced it.
    pub provider: String,
    /// Tokens consumed.
    pub tokens_used: u32,
    /// Cost estimate in USD.
    pub cost_estimate: f64,
    /// Quality score from validation.
    pub quality_score: Option<f64>,
    /// Optimizations applied.
    pub optimizations: Vec<String>,
    /// Provider call latency in milliseconds (successful attempt).
    pub latency_ms: u64,
    /// Errors from providers tried before the successful one.
    pub fallback_errors: Vec<String>,
}

/// A single unit of generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Unique ID.
    pub id: String,
    /// Content-kind tag.
    pub content_type: String,
    /// Topic.
    pub topic: String,
    /// Requirements map.
    pub requirements: Requirements,
    /// Priority tier.
    pub priority: Priority,
    /// Preferred provider.
    pub provider_preference: Option<String>,
    /// Template reference.
    pub template: Option<String>,
    /// SEO keywords.
    pub keywords: Vec<String>,
    /// Target audience.
    pub audience: Option<String>,
    /// Current state.
    pub status: RequestStatus,
    /// Output, once produced.
    pub output: Option<GeneratedContent>,
    /// Failure detail.
    pub error: Option<String>,
    /// Worker that processed the request.
    pub worker: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the request reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationRequest {
    /// Builds a pending request from a validated spec.
    pub fn from_spec(spec: RequestSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            id: format!("req-{}", uuid::Uuid::new_v4()),
            content_type: spec.content_type,
            topic: spec.topic,
            requirements: spec.requirements,
            priority: spec.priority,
            provider_preference: spec.provider,
            template: spec.template,
            keywords: spec.keywords,
            audience: spec.audience,
            status: RequestStatus::Pending,
            output: None,
            error: None,
            worker: None,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    /// Moves the request to a new state.
    ///
    /// # Returns
    /// Returns `Ok(())` on success, or `Err(current)` if the transition is invalid.
    pub fn transition(&mut self, to: RequestStatus) -> std::result::Result<(), RequestStatus> {
        if !self.status.can_transition_to(to) {
            error!(request_id = %self.id, from = %self.status, to = %to, "Invalid request transition");
            return Err(self.status);
        }
        debug!(request_id = %self.id, from = %self.status, to = %to, "Request transition");
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Marks the request failed with the given reason. No-op once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.transition(RequestStatus::Failed).is_ok() {
            self.error = Some(reason.into());
        }
    }

    /// Marks the request cancelled. No-op once terminal.
    pub fn cancel(&mut self) {
        let _ = self.transition(RequestStatus::Cancelled);
    }

    /// Returns `true` once the request can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::from_spec(RequestSpec::new("newsletter", "rust async")).unwrap()
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
        assert_eq!(Priority::from_rank(7), Priority::Urgent);
        assert_eq!(Priority::from_rank(Priority::High.rank()), Priority::High);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn test_success_path_transitions() {
        let mut req = request();
        for next in [
            RequestStatus::InProgress,
            RequestStatus::Generated,
            RequestStatus::Validated,
            RequestStatus::Optimized,
            RequestStatus::Completed,
        ] {
            assert!(req.transition(next).is_ok());
        }
        assert!(req.completed_at.is_some());
        assert!(req.is_terminal());
    }

    #[test]
    fn test_cannot_skip_stage() {
        let mut req = request();
        req.transition(RequestStatus::InProgress).unwrap();
        assert_eq!(req.transition(RequestStatus::Validated), Err(RequestStatus::InProgress));
    }

    #[test]
    fn test_no_resurrection() {
        let mut req = request();
        req.fail("boom");
        assert_eq!(req.status, RequestStatus::Failed);
        assert_eq!(req.error.as_deref(), Some("boom"));

        assert!(req.transition(RequestStatus::InProgress).is_err());
        req.fail("second");
        assert_eq!(req.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_validation() {
        assert!(RequestSpec::new("article", "  ").validate().is_err());
        assert!(RequestSpec::new("", "topic").validate().is_err());
        assert!(RequestSpec::new("article", "topic").with_provider(" ").validate().is_err());
        assert!(RequestSpec::new("article", "topic").validate().is_ok());
    }
}
