//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sim_lib::strategy::StrategyKind;
use sim_lib::{OvercommitPolicy, StrategyConfig};
use std::path::Path;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Accounting strategy used for the replay
    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub accounting: StrategyConfig,

    #[serde(default)]
    pub log_format: LogFormat,
}

/// Command-line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub strategy: Option<StrategyKind>,
    pub policy: Option<OvercommitPolicy>,
    pub max_retries: Option<u32>,
    pub count_pod_slots: bool,
}

impl SimulatorConfig {
    /// Load configuration from an optional file, then `CAPSIM_*` variables
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CAPSIM_ACCOUNTING__MAX_CONFLICT_RETRIES=3`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("CAPSIM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid simulator configuration")
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(policy) = overrides.policy {
            self.accounting.overcommit = policy;
        }
        if let Some(max_retries) = overrides.max_retries {
            self.accounting.max_conflict_retries = max_retries;
        }
        if overrides.count_pod_slots {
            self.accounting.count_pod_slots = true;
        }
    }
}
