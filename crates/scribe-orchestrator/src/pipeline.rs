//! The generation path shared by the scheduler and the batch engine.
//!
//! `prepare context -> route + dispatch -> validate -> optimize -> template`,
//! advancing the request one state per stage.

use crate::request::{GeneratedContent, GenerationRequest, RequestStatus};
use crate::routing::{ProviderRouter, RoutingStrategy};
use async_trait::async_trait;
use futures::FutureExt;
use scribe_abstraction::{
    ContentOptimizer, ContextProvider, GenerationOptions, Optimization, PreparedPrompt,
    ProcessingError, QualityValidator, Requirements,
};
use std::any::Any;
use std::fmt::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collaborators that accept everything and change nothing.
///
/// Builds a plain prompt from the topic and requirements, scores all content
/// `1.0`, and leaves content untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

#[async_trait]
impl ContextProvider for PassThrough {
    async fn prepare_context(
        &self,
        topic: &str,
        content_type: &str,
        requirements: &Requirements,
    ) -> Result<PreparedPrompt, ProcessingError> {
        let mut prompt = format!("Write a {content_type} about {topic}.");
        let mut keys: Vec<_> = requirements.keys().collect();
        keys.sort();
        for key in keys {
            let _ = write!(prompt, "\n- {key}: {}", requirements[key]);
        }
        Ok(PreparedPrompt { prompt, options: GenerationOptions::default() })
    }

    fn apply_template(&self, _name: &str, content: &str) -> Result<String, ProcessingError> {
        Ok(content.to_string())
    }
}

impl QualityValidator for PassThrough {
    fn validate_quality(&self, _: &str, _: &str, _: &str, _: &Requirements) -> f64 {
        1.0
    }
}

impl ContentOptimizer for PassThrough {
    fn optimize(
        &self,
        content: &str,
        _content_type: &str,
        _keywords: &[String],
        _audience: Option<&str>,
    ) -> Result<Optimization, ProcessingError> {
        Ok(Optimization {
            content: content.to_string(),
            applied: Vec::new(),
            scores: std::collections::HashMap::new(),
        })
    }
}

/// Drives one request through generation.
pub struct GenerationPipeline {
    router: Arc<ProviderRouter>,
    context: Arc<dyn ContextProvider>,
    validator: Arc<dyn QualityValidator>,
    optimizer: Arc<dyn ContentOptimizer>,
    strategy: Option<RoutingStrategy>,
    min_score: f64,
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("router", &self.router)
            .field("min_score", &self.min_score)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Creates a pipeline with pass-through collaborators.
    #[must_use]
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self {
            router,
            context: Arc::new(PassThrough),
            validator: Arc::new(PassThrough),
            optimizer: Arc::new(PassThrough),
            strategy: None,
            min_score: 0.0,
        }
    }

    /// Sets the context provider.
    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    /// Sets the quality validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn QualityValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Sets the content optimizer.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn ContentOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Overrides the router's default strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Rejects content scoring below `min_score`.
    #[must_use]
    pub const fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// The router used for dispatch.
    #[must_use]
    pub const fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Runs [`run`](Self::run), failing the request if a provider or
    /// collaborator panics instead of unwinding into the worker.
    ///
    /// Returns the panic message when one was caught.
    pub async fn run_isolated(
        &self,
        request: &mut GenerationRequest,
        cancel: &CancellationToken,
        worker: &str,
    ) -> Option<String> {
        let payload = AssertUnwindSafe(self.run(request, cancel, worker)).catch_unwind().await.err()?;
        let message = panic_message(payload.as_ref());
        error!(request_id = %request.id, worker = %worker, panic = %message, "Generation panicked");
        request.fail(format!("generation panicked: {message}"));
        Some(message)
    }

    /// Runs a pending request to a terminal state and returns that state.
    ///
    /// Cancellation is observed before dispatch and after the provider call;
    /// content produced after cancellation is discarded.
    pub async fn run(
        &self,
        request: &mut GenerationRequest,
        cancel: &CancellationToken,
        worker: &str,
    ) -> RequestStatus {
        if cancel.is_cancelled() {
            request.cancel();
            return request.status;
        }
        if request.transition(RequestStatus::InProgress).is_err() {
            return request.status;
        }
        request.worker = Some(worker.to_string());

        let prompt = match self
            .context
            .prepare_context(&request.topic, &request.content_type, &request.requirements)
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(request_id = %request.id, worker = %worker, error = %e, "Context preparation failed");
                request.fail(e.to_string());
                return request.status;
            }
        };

        if cancel.is_cancelled() {
            request.cancel();
            return request.status;
        }

        let outcome = match self.router.dispatch(request, &prompt, self.strategy).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(request_id = %request.id, worker = %worker, error = %e, "Generation failed");
                request.fail(e.to_string());
                return request.status;
            }
        };

        if cancel.is_cancelled() {
            debug!(request_id = %request.id, "Discarding output of cancelled request");
            request.cancel();
            return request.status;
        }

        let _ = request.transition(RequestStatus::Generated);
        let mut content = GeneratedContent {
            content: outcome.output.content,
            provider: outcome.provider,
            tokens_used: outcome.output.tokens_used,
            cost_estimate: outcome.output.cost_estimate,
            quality_score: None,
            optimizations: Vec::new(),
            latency_ms: u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX),
            fallback_errors: outcome.failures.iter().map(ToString::to_string).collect(),
        };

        let score = self.validator.validate_quality(
            &content.content,
            &request.content_type,
            &request.topic,
            &request.requirements,
        );
        content.quality_score = Some(score);
        if score < self.min_score {
            let reason = format!("quality score {score:.2} below minimum {:.2}", self.min_score);
            warn!(request_id = %request.id, worker = %worker, score, "Content rejected");
            request.output = Some(content);
            request.fail(reason);
            return request.status;
        }
        let _ = request.transition(RequestStatus::Validated);

        match self.optimizer.optimize(
            &content.content,
            &request.content_type,
            &request.keywords,
            request.audience.as_deref(),
        ) {
            Ok(optimization) => {
                content.content = optimization.content;
                content.optimizations = optimization.applied;
            }
            Err(e) => {
                request.output = Some(content);
                request.fail(e.to_string());
                return request.status;
            }
        }
        let _ = request.transition(RequestStatus::Optimized);

        if let Some(template) = request.template.as_deref() {
            match self.context.apply_template(template, &content.content) {
                Ok(rendered) => content.content = rendered,
                Err(e) => {
                    request.output = Some(content);
                    request.fail(e.to_string());
                    return request.status;
                }
            }
        }

        info!(
            request_id = %request.id,
            worker = %worker,
            provider = %content.provider,
            tokens = content.tokens_used,
            latency_ms = content.latency_ms,
            "Request completed"
        );
        request.output = Some(content);
        let _ = request.transition(RequestStatus::Completed);
        request.status
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::request::RequestSpec;
    use scribe_abstraction::Provider;

    struct Harsh;

    impl QualityValidator for Harsh {
        fn validate_quality(&self, _: &str, _: &str, _: &str, _: &Requirements) -> f64 {
            0.2
        }
    }

    struct Framed;

    #[async_trait]
    impl ContextProvider for Framed {
        async fn prepare_context(
            &self,
            topic: &str,
            _content_type: &str,
            _requirements: &Requirements,
        ) -> Result<PreparedPrompt, ProcessingError> {
            Ok(PreparedPrompt { prompt: topic.to_string(), options: GenerationOptions::default() })
        }

        fn apply_template(&self, name: &str, content: &str) -> Result<String, ProcessingError> {
            match name {
                "framed" => Ok(format!("<<{content}>>")),
                other => Err(ProcessingError::Template {
                    name: other.to_string(),
                    reason: "unknown template".to_string(),
                }),
            }
        }
    }

    fn pipeline(provider: MockProvider) -> GenerationPipeline {
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(provider)];
        GenerationPipeline::new(Arc::new(ProviderRouter::new(providers)))
    }

    fn request(spec: RequestSpec) -> GenerationRequest {
        GenerationRequest::from_spec(spec).unwrap()
    }

    #[tokio::test]
    async fn test_completes_with_output() {
        let pipeline = pipeline(MockProvider::new("alpha").with_response("hello"));
        let mut req = request(RequestSpec::new("article", "rust"));
        let status = pipeline.run(&mut req, &CancellationToken::new(), "worker-0").await;

        assert_eq!(status, RequestStatus::Completed);
        let output = req.output.unwrap();
        assert_eq!(output.content, "hello");
        assert_eq!(output.provider, "alpha");
        assert_eq!(output.quality_score, Some(1.0));
        assert_eq!(req.worker.as_deref(), Some("worker-0"));
        assert!(req.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_quality_gate_fails_request() {
        let pipeline = pipeline(MockProvider::new("alpha"))
            .with_validator(Arc::new(Harsh))
            .with_min_score(0.5);
        let mut req = request(RequestSpec::new("article", "rust"));
        let status = pipeline.run(&mut req, &CancellationToken::new(), "worker-0").await;

        assert_eq!(status, RequestStatus::Failed);
        assert!(req.error.unwrap().contains("below minimum"));
    }

    #[tokio::test]
    async fn test_template_applied() {
        let pipeline = pipeline(MockProvider::new("alpha").with_response("body"))
            .with_context(Arc::new(Framed));
        let mut req = request(RequestSpec::new("article", "rust").with_template("framed"));
        pipeline.run(&mut req, &CancellationToken::new(), "worker-0").await;
        assert_eq!(req.output.unwrap().content, "<<body>>");

        let mut req = request(RequestSpec::new("article", "rust").with_template("missing"));
        let status = pipeline.run(&mut req, &CancellationToken::new(), "worker-0").await;
        assert_eq!(status, RequestStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let provider = Arc::new(MockProvider::new("alpha"));
        let providers: Vec<Arc<dyn Provider>> = vec![provider.clone()];
        let pipeline = GenerationPipeline::new(Arc::new(ProviderRouter::new(providers)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut req = request(RequestSpec::new("article", "rust"));
        let status = pipeline.run(&mut req, &cancel, "worker-0").await;
        assert_eq!(status, RequestStatus::Cancelled);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_recorded() {
        let pipeline = pipeline(MockProvider::new("alpha").failing());
        let mut req = request(RequestSpec::new("article", "rust"));
        let status = pipeline.run(&mut req, &CancellationToken::new(), "worker-0").await;
        assert_eq!(status, RequestStatus::Failed);
        assert!(req.error.unwrap().contains("All 1 providers failed"));
    }

    #[tokio::test]
    async fn test_provider_panic_fails_request() {
        let pipeline = pipeline(MockProvider::new("alpha").panicking_on("boom"));
        let mut req = request(RequestSpec::new("article", "boom"));
        let panic = pipeline.run_isolated(&mut req, &CancellationToken::new(), "worker-0").await;

        assert!(panic.unwrap().contains("alpha crashed"));
        assert_eq!(req.status, RequestStatus::Failed);
        assert!(req.error.unwrap().starts_with("generation panicked"));

        let mut fine = request(RequestSpec::new("article", "calm"));
        assert!(pipeline.run_isolated(&mut fine, &CancellationToken::new(), "worker-0").await.is_none());
        assert_eq!(fine.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_pass_through_prompt_lists_requirements() {
        let mut requirements = Requirements::new();
        requirements.insert("tone".to_string(), serde_json::json!("casual"));
        let prompt =
            PassThrough.prepare_context("async rust", "newsletter", &requirements).await.unwrap();
        assert!(prompt.prompt.starts_with("Write a newsletter about async rust."));
        assert!(prompt.prompt.contains("tone: \"casual\""));
    }
}
