//! Configuration and clock resolution for a CLI run.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use pipl_core::{Clock, ManualClock, PiplConfig, PolicyContext, SystemClock};

/// Load the YAML config (defaults when absent), then apply `PIPL_*`
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<PiplConfig> {
    let config = match path {
        Some(path) => PiplConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PiplConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// The policy a run operates under.
pub fn policy(config: &PiplConfig) -> Result<PolicyContext> {
    Ok(PolicyContext::from_config(config)?)
}

/// A pinned clock when `now` is given, the system clock otherwise.
pub fn clock(now: Option<DateTime<Utc>>) -> Arc<dyn Clock> {
    match now {
        Some(at) => Arc::new(ManualClock::new(at)),
        None => Arc::new(SystemClock),
    }
}
