//! Provider abstraction layer for Scribe.
//!
//! This module defines the core traits and types the orchestrator uses to talk
//! to content-generation backends, plus the content-processing collaborators
//! (context preparation, quality validation, optimization) that surround a
//! generation call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Free-form request requirements (tone, length, audience hints, ...).
pub type Requirements = HashMap<String, serde_json::Value>;

/// Represents an error that can occur when calling a generation provider.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderError {
    /// An error occurred while sending the request (network, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The provider answered with an error (invalid input, content filter).
    #[error("Provider Response Error: {0}")]
    ResponseError(String),

    /// The provider throttled the call.
    #[error("Provider '{provider}' rate limited{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    RateLimited {
        /// The provider name (e.g., "openai", "anthropic").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The call did not finish in time.
    #[error("Provider '{0}' timed out")]
    Timeout(String),

    /// The provider is marked unhealthy or not configured.
    #[error("Provider '{0}' is unavailable")]
    Unavailable(String),

    /// Other unexpected errors.
    #[error("Other Provider Error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Returns `true` for errors that are likely to clear up on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout(_) | Self::RequestError(_))
    }
}

/// Errors raised by the content-processing collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingError {
    /// Context preparation failed.
    #[error("Context preparation failed: {0}")]
    Context(String),

    /// Template rendering failed.
    #[error("Template '{name}' failed: {reason}")]
    Template {
        /// Template name.
        name: String,
        /// Why rendering failed.
        reason: String,
    },

    /// Content optimization failed.
    #[error("Optimization failed: {0}")]
    Optimization(String),
}

/// Parameters for controlling a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// System prompt sent alongside the user prompt.
    pub system_prompt: Option<String>,

    /// What sampling temperature to use, between 0 and 2.
    pub temperature: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { system_prompt: None, temperature: Some(0.7), max_tokens: Some(2000) }
    }
}

/// The response from a provider generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// The generated content.
    pub content: String,

    /// Tokens consumed by the call (prompt + completion).
    pub tokens_used: u32,

    /// Provider-side cost estimate in USD.
    pub cost_estimate: f64,

    /// Opaque provider metadata (model id, finish reason, ...).
    #[serde(default)]
    pub provider_metadata: HashMap<String, String>,
}

/// Per-token pricing of a provider, in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Price per 1K input tokens.
    pub input_price: f64,
    /// Price per 1K output tokens.
    pub output_price: f64,
}

impl CostModel {
    /// Creates a new cost model.
    #[must_use]
    pub const fn new(input_price: f64, output_price: f64) -> Self {
        Self { input_price, output_price }
    }

    /// Weighted price for the given token mix.
    #[must_use]
    pub fn weighted(&self, input_weight: f64, output_weight: f64) -> f64 {
        input_weight * self.input_price + output_weight * self.output_price
    }
}

/// A trait for interacting with a content-generation backend.
///
/// All providers must be `Send + Sync` to allow concurrent use across workers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the unique name of the provider.
    fn name(&self) -> &str;

    /// Generates content for the given prompt.
    ///
    /// # Arguments
    /// * `prompt` - The fully prepared prompt
    /// * `content_type` - Content-kind tag (newsletter, article, ...)
    /// * `options` - Generation parameters
    ///
    /// # Errors
    /// Returns a `ProviderError` if generation fails.
    async fn generate(
        &self,
        prompt: &str,
        content_type: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationOutput, ProviderError>;

    /// Reports whether the provider is currently usable.
    async fn health_check(&self) -> bool;

    /// Returns the provider's token pricing.
    fn cost_model(&self) -> CostModel;
}

/// A prompt ready to be handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedPrompt {
    /// User prompt text.
    pub prompt: String,
    /// Generation options, including the system prompt.
    pub options: GenerationOptions,
}

/// Builds provider prompts and renders finished content into templates.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Gathers background context for a topic and builds the prompt.
    async fn prepare_context(
        &self,
        topic: &str,
        content_type: &str,
        requirements: &Requirements,
    ) -> Result<PreparedPrompt, ProcessingError>;

    /// Renders content through the named template.
    fn apply_template(&self, name: &str, content: &str) -> Result<String, ProcessingError>;
}

/// Scores generated content.
pub trait QualityValidator: Send + Sync {
    /// Returns a quality score in `0.0..=1.0`.
    fn validate_quality(
        &self,
        content: &str,
        content_type: &str,
        topic: &str,
        requirements: &Requirements,
    ) -> f64;
}

/// Result of an optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    /// Optimized content.
    pub content: String,
    /// Names of the optimizations that were applied.
    pub applied: Vec<String>,
    /// Named scores computed during optimization (seo, readability, ...).
    pub scores: HashMap<String, f64>,
}

/// Rewrites generated content for search and engagement.
pub trait ContentOptimizer: Send + Sync {
    /// Optimizes content for the given keywords and audience.
    fn optimize(
        &self,
        content: &str,
        content_type: &str,
        keywords: &[String],
        audience: Option<&str>,
    ) -> Result<Optimization, ProcessingError>;
}
