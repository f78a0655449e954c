//! Simulated provider pool used by the CLI.

use scribe_abstraction::{CostModel, Provider};
use scribe_orchestrator::MockProvider;
use std::sync::Arc;
use std::time::Duration;

/// Knobs for the simulated providers.
#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    /// Base latency; providers scale it by their profile.
    pub latency: Duration,
    /// Fraction of prompts each provider rejects.
    pub failure_rate: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self { latency: Duration::from_millis(20), failure_rate: 0.0 }
    }
}

/// Names of the simulated providers, in registration order.
pub const PROVIDER_NAMES: [&str; 3] = ["fast-cheap", "steady", "slow-premium"];

/// Builds the simulated pool: a fast cheap model, a middle-of-the-road one and
/// a slow expensive one.
pub fn providers(options: SimulationOptions) -> Vec<Arc<dyn Provider>> {
    let profiles = [
        (PROVIDER_NAMES[0], 1, CostModel::new(0.0005, 0.0015)),
        (PROVIDER_NAMES[1], 2, CostModel::new(0.003, 0.006)),
        (PROVIDER_NAMES[2], 4, CostModel::new(0.015, 0.075)),
    ];

    profiles
        .into_iter()
        .map(|(name, scale, cost)| {
            let provider = MockProvider::new(name)
                .with_latency(options.latency * scale)
                .with_cost(cost)
                .with_failure_rate(options.failure_rate);
            Arc::new(provider) as Arc<dyn Provider>
        })
        .collect()
}
