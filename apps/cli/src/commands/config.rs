//! Configuration commands.

use anyhow::Context;
use clap::Subcommand;
use colored::Colorize;
use scribe_orchestrator::EngineConfig;
use std::path::PathBuf;

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Check that a configuration file parses and validates
    Validate {
        /// Path to the TOML file
        path: PathBuf,
    },
}

/// Execute a config command.
pub fn execute(config: &EngineConfig, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
        ConfigCommand::Validate { path } => {
            let loaded = EngineConfig::load(&path)
                .with_context(|| format!("{} is not a valid configuration", path.display()))?;
            println!("{} {} is valid", "✓".green(), path.display());
            println!(
                "  scheduler workers: {}, batch workers: {}, rate limit: {}/{}s, strategy: {}",
                loaded.scheduler.workers,
                loaded.batch.workers,
                loaded.rate_limit.requests_per_minute,
                loaded.rate_limit.window_secs,
                loaded.routing.default_strategy
            );
            Ok(())
        }
    }
}
