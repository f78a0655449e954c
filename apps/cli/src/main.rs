//! Scribe CLI - drive the content engine from the command line.
//!
//! The `scribe` binary loads engine configuration, installs logging, and runs
//! the engine against simulated providers so batch behavior, routing, and
//! configuration can be exercised without a real backend.

mod commands;
mod config;
mod simulation;

use clap::{Parser, Subcommand};
use scribe_orchestrator::EngineConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{batch, config as config_cmd, generate, route};

/// Scribe - content generation orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "scribe",
    author,
    version,
    about = "Scribe - content generation orchestration",
    long_about = "Scribe schedules single requests and batch jobs across interchangeable content providers,\nwith priority queuing, shared rate limiting, routing with fallback and adaptive concurrency."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). Defaults to the config's log_level, then info.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Engine configuration file (defaults to ./scribe.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulated batch job and report its outcome
    ///
    /// Generates `count` requests for one content type and submits them as a
    /// single batch against the simulated provider pool.
    RunBatch(batch::RunBatchArgs),

    /// Generate a single piece of content through the priority queue
    Generate(generate::GenerateArgs),

    /// Preview how a request would be routed
    Route(route::RouteArgs),

    /// Inspect or validate engine configuration
    #[command(subcommand)]
    Config(config_cmd::ConfigCommand),
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // `config validate` reports bad files itself instead of failing startup.
    let engine_config = match &args.command {
        Command::Config(config_cmd::ConfigCommand::Validate { .. }) => EngineConfig::default(),
        _ => config::load(args.config.as_deref())?,
    };

    let level = args
        .log_level
        .as_deref()
        .or(engine_config.log_level.as_deref())
        .map_or(Level::INFO, parse_level);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::RunBatch(run) => batch::execute(engine_config, run).await,
        Command::Generate(run) => generate::execute(engine_config, run).await,
        Command::Route(run) => route::execute(engine_config, run).await,
        Command::Config(cmd) => config_cmd::execute(&engine_config, cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_level_falls_back_to_info() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }
}
