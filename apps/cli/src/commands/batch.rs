//! Batch command implementation.
//!
//! Submits a generated batch to the engine, follows its progress events and
//! prints the final job snapshot.

use anyhow::{bail, Context};
use clap::Args;
use colored::Colorize;
use scribe_orchestrator::{
    BatchSpec, JobSnapshot, JobStatus, Priority, ProcessingMode, ProgressEvent, RequestSpec,
};
use scribe_orchestrator::{ContentEngine, EngineConfig};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use super::{print_provider_table, start_engine};
use crate::simulation::SimulationOptions;

/// Arguments for `scribe run-batch`.
#[derive(Args, Debug)]
pub struct RunBatchArgs {
    /// Number of requests in the batch
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Content type for every request
    #[arg(short = 't', long, default_value = "article")]
    pub content_type: String,

    /// Processing mode (sequential, concurrent, adaptive)
    #[arg(short, long, default_value = "concurrent")]
    pub mode: ProcessingMode,

    /// Concurrency ceiling for concurrent and adaptive modes
    #[arg(long, default_value = "5")]
    pub max_concurrent: usize,

    /// Job priority (low, normal, high, urgent)
    #[arg(long, default_value = "normal")]
    pub priority: Priority,

    /// Fraction of prompts each simulated provider rejects (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    pub fail_rate: f64,

    /// Base latency of the simulated providers in milliseconds
    #[arg(long, default_value = "20")]
    pub latency_ms: u64,

    /// Abort the job on the first failed request
    #[arg(long)]
    pub stop_on_error: bool,

    /// Retry failed requests before counting them failed
    #[arg(long)]
    pub retry: bool,

    /// Output the job snapshot and engine statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the run-batch command.
pub async fn execute(config: EngineConfig, args: RunBatchArgs) -> anyhow::Result<()> {
    if args.count == 0 {
        bail!("Batch must contain at least one request");
    }
    if !(0.0..=1.0).contains(&args.fail_rate) {
        bail!("--fail-rate must be between 0.0 and 1.0");
    }

    let options = SimulationOptions {
        latency: Duration::from_millis(args.latency_ms),
        failure_rate: args.fail_rate,
    };
    let engine = start_engine(config, options).await?;
    let mut events = engine.subscribe();

    let requests = (1..=args.count)
        .map(|i| RequestSpec::new(args.content_type.clone(), format!("{} #{i}", args.content_type)))
        .collect();
    let spec = BatchSpec::new(format!("{} x{}", args.content_type, args.count), requests)
        .with_mode(args.mode)
        .with_max_concurrent(args.max_concurrent)
        .with_priority(args.priority)
        .with_retry_failed(args.retry)
        .with_stop_on_error(args.stop_on_error);

    if !args.json {
        println!("{}", "scribe run-batch".bold().cyan());
        println!();
    }

    let job_id = engine.submit_batch(spec).await.context("Failed to submit batch")?;
    if !args.json {
        println!("  {} Submitted job {}", "✓".green(), job_id.cyan());
        println!("  {} Mode: {}, requests: {}", "•".dimmed(), args.mode, args.count);
        println!();
    }

    let snapshot = follow_job(&engine, &job_id, &mut events, args.json).await?;
    let stats = engine.statistics().await;
    engine.stop().await;

    if args.json {
        let report = serde_json::json!({ "job": snapshot, "statistics": stats });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&snapshot);
        println!();
        print_provider_table(&stats);
    }

    if snapshot.status == JobStatus::Failed {
        bail!("Batch job {} failed", snapshot.id);
    }
    Ok(())
}

/// Waits for the job to finish, echoing progress events. Ctrl+C cancels the job.
async fn follow_job(
    engine: &ContentEngine,
    job_id: &str,
    events: &mut Receiver<ProgressEvent>,
    quiet: bool,
) -> anyhow::Result<JobSnapshot> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut cancel_sent = false;

    loop {
        let snapshot = engine.batch_status(job_id).await?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }

        tokio::select! {
            _ = &mut interrupt, if !cancel_sent => {
                cancel_sent = true;
                if !quiet {
                    println!("\n{} Cancellation requested, waiting for active requests...", "⚠".yellow());
                }
                engine.cancel_batch(job_id).await;
            }
            event = events.recv() => match event {
                Ok(ProgressEvent::Progress { job_id: id, completed, failed, total, percent })
                    if id == job_id && !quiet =>
                {
                    println!(
                        "  [{percent:>5.1}%] {completed}/{total} completed, {} failed",
                        if failed > 0 { failed.to_string().red() } else { failed.to_string().normal() }
                    );
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => tokio::time::sleep(Duration::from_millis(50)).await,
            },
            () = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }
}

fn print_summary(snapshot: &JobSnapshot) {
    println!();
    let status = match snapshot.status {
        JobStatus::Completed => snapshot.status.to_string().green(),
        JobStatus::Failed => snapshot.status.to_string().red(),
        _ => snapshot.status.to_string().yellow(),
    };
    println!("{}", "Summary".bold());
    println!("  Job:         {}", snapshot.id);
    println!("  Status:      {status}");
    println!("  Completed:   {}/{}", snapshot.completed, snapshot.total);
    println!("  Failed:      {}", snapshot.failed);
    println!("  Progress:    {:.1}%", snapshot.progress_percent);
    if let Some(effective) = snapshot.effective_concurrency {
        println!("  Concurrency: {effective} (requested {})", snapshot.max_concurrent);
    }

    if !snapshot.errors.is_empty() {
        println!();
        println!("{}", "Errors".bold().red());
        for error in &snapshot.errors {
            let position = error.index.map_or_else(|| "job".to_string(), |i| format!("#{i}"));
            println!("  {} {:<5} {} ({})", "✗".red(), position, error.message, error.worker.dimmed());
        }
    }
}
