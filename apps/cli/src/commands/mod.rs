//! Command implementations for the Scribe CLI.

pub mod batch;
pub mod config;
pub mod generate;
pub mod route;

use anyhow::{Context, Result};
use colored::Colorize;
use scribe_orchestrator::{ContentEngine, EngineConfig, EngineStatistics};

use crate::simulation::{self, SimulationOptions};

/// Builds and starts an engine over the simulated provider pool.
pub(crate) async fn start_engine(
    config: EngineConfig,
    options: SimulationOptions,
) -> Result<ContentEngine> {
    let engine = ContentEngine::builder(config)
        .providers(simulation::providers(options))
        .build()
        .context("Failed to build content engine")?;
    engine.start().await;
    Ok(engine)
}

/// Prints per-provider performance in the human-readable reports.
pub(crate) fn print_provider_table(stats: &EngineStatistics) {
    let mut names: Vec<&String> = stats.providers.keys().collect();
    names.sort();

    println!("{}", "Providers".bold());
    println!("  {:<16} {:>9} {:>9} {:>10} {:>12}", "Name", "Success", "Failed", "Rate", "Mean (ms)");
    for name in names {
        let perf = &stats.providers[name];
        let mean = perf
            .mean_response_secs()
            .map_or_else(|| "-".to_string(), |secs| format!("{:.0}", secs * 1000.0));
        println!(
            "  {:<16} {:>9} {:>9} {:>9.0}% {:>12}",
            name.cyan(),
            perf.successes,
            perf.failures,
            perf.success_rate * 100.0,
            mean
        );
    }
}
