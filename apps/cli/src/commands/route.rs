//! Routing preview.

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use scribe_orchestrator::{ContentEngine, EngineConfig, RequestSpec, RoutingStrategy};

use crate::simulation::{self, SimulationOptions};

/// Arguments for `scribe route`.
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Content type to route
    #[arg(short = 't', long, default_value = "article")]
    pub content_type: String,

    /// Strategy to preview; omit to compare every strategy
    #[arg(short, long)]
    pub strategy: Option<RoutingStrategy>,

    /// Preferred provider
    #[arg(long)]
    pub provider: Option<String>,

    /// Output decisions as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the route command.
pub async fn execute(config: EngineConfig, args: RouteArgs) -> anyhow::Result<()> {
    let default_strategy = config.routing.default_strategy;
    let engine = ContentEngine::builder(config)
        .providers(simulation::providers(SimulationOptions::default()))
        .build()
        .context("Failed to build content engine")?;

    let strategies = args.strategy.map_or_else(|| RoutingStrategy::ALL.to_vec(), |s| vec![s]);
    let mut decisions = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let mut spec = RequestSpec::new(args.content_type.clone(), "routing preview");
        if let Some(provider) = &args.provider {
            spec = spec.with_provider(provider.clone());
        }
        decisions.push(engine.route_preview(spec, Some(strategy)).await?);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decisions)?);
        return Ok(());
    }

    println!("{}", "scribe route".bold().cyan());
    println!();
    println!("  Content type: {}", args.content_type);
    println!();
    for decision in &decisions {
        let marker = if decision.strategy == default_strategy { "*" } else { " " };
        let chain: Vec<&str> = decision.chain().collect();
        println!(
            "  {marker} {:<15} {} {}",
            decision.strategy.to_string().bold(),
            decision.primary.green(),
            chain[1..].join(" → ").dimmed()
        );
    }
    println!();
    println!("  {} default strategy", "*".dimmed());
    Ok(())
}
