//! Single-request generation through the priority queue.

use anyhow::{bail, Context};
use clap::Args;
use colored::Colorize;
use scribe_orchestrator::{EngineConfig, GenerationRequest, Priority, RequestSpec, RequestStatus};
use std::time::Duration;

use super::{print_provider_table, start_engine};
use crate::simulation::SimulationOptions;

/// Give up waiting on a request after this long.
const RESULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Arguments for `scribe generate`.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// What the content is about
    pub topic: String,

    /// Content type (article, newsletter, social_post, ...)
    #[arg(short = 't', long, default_value = "article")]
    pub content_type: String,

    /// Priority tier (low, normal, high, urgent)
    #[arg(short, long, default_value = "normal")]
    pub priority: Priority,

    /// Preferred provider (fast-cheap, steady, slow-premium)
    #[arg(long)]
    pub provider: Option<String>,

    /// Fraction of prompts each simulated provider rejects (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    pub fail_rate: f64,

    /// Base latency of the simulated providers in milliseconds
    #[arg(long, default_value = "20")]
    pub latency_ms: u64,

    /// Output the finished request as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the generate command.
pub async fn execute(config: EngineConfig, args: GenerateArgs) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&args.fail_rate) {
        bail!("--fail-rate must be between 0.0 and 1.0");
    }

    let options = SimulationOptions {
        latency: Duration::from_millis(args.latency_ms),
        failure_rate: args.fail_rate,
    };
    let engine = start_engine(config, options).await?;

    let mut spec = RequestSpec::new(args.content_type, args.topic).with_priority(args.priority);
    if let Some(provider) = args.provider {
        spec = spec.with_provider(provider);
    }

    let id = engine.submit_request(spec).await.context("Failed to submit request")?;
    let request = tokio::time::timeout(RESULT_TIMEOUT, async {
        loop {
            if let Some(request) = engine.request_result(&id).await? {
                return anyhow::Ok(request);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .with_context(|| format!("Timed out waiting for request {id}"))??;

    let stats = engine.statistics().await;
    engine.stop().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&request)?);
    } else {
        print_request(&request);
        println!();
        print_provider_table(&stats);
    }

    if request.status != RequestStatus::Completed {
        bail!(
            "Request {} {}: {}",
            request.id,
            request.status,
            request.error.as_deref().unwrap_or("no output")
        );
    }
    Ok(())
}

fn print_request(request: &GenerationRequest) {
    println!("{}", "scribe generate".bold().cyan());
    println!();
    println!("  Request:  {}", request.id);
    println!("  Priority: {}", request.priority);

    let Some(output) = &request.output else {
        println!("  Status:   {}", request.status.to_string().red());
        if let Some(error) = &request.error {
            println!("  {} {}", "✗".red(), error);
        }
        return;
    };

    println!("  Status:   {}", request.status.to_string().green());
    println!("  Provider: {}", output.provider.cyan());
    println!("  Tokens:   {}", output.tokens_used);
    println!("  Cost:     ${:.4}", output.cost_estimate);
    println!("  Latency:  {}ms", output.latency_ms);
    for error in &output.fallback_errors {
        println!("  {} fallback: {}", "⚠".yellow(), error);
    }
    println!();
    println!("{}", output.content);
}
