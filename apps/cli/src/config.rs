//! CLI configuration loading.

use anyhow::{Context, Result};
use scribe_orchestrator::EngineConfig;
use std::path::Path;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "scribe.toml";

/// Load engine configuration.
///
/// Precedence:
/// 1. `--config <path>` (must exist)
/// 2. `./scribe.toml` when present
/// 3. Defaults
pub fn load(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        return EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    let local = Path::new(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return EngineConfig::load(local)
            .with_context(|| format!("Failed to load configuration from {DEFAULT_CONFIG_FILE}"));
    }

    Ok(EngineConfig::default())
}
