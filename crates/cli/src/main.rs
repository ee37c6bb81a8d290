//! Capacity simulator CLI
//!
//! Replays cluster fixtures through the resource accounting strategies and
//! reports per-node capacity and allocatable drift.

mod commands;
mod config;
mod fixture;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use crate::commands::{check, simulate};
use crate::config::{LogFormat, Overrides, SimulatorConfig};
use sim_lib::strategy::StrategyKind;
use sim_lib::OvercommitPolicy;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Capacity simulator CLI
#[derive(Parser)]
#[command(name = "capsim")]
#[command(author, version, about = "Capacity simulator for predictive resource accounting", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Admit every scheduled pod of a fixture and show node capacity
    Simulate {
        #[command(flatten)]
        args: SimulationArgs,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Replay a fixture and verify allocatable against bound pods
    Check {
        #[command(flatten)]
        args: SimulationArgs,
    },
}

#[derive(Args)]
pub struct SimulationArgs {
    /// Fixture file with nodes and pods (JSON)
    #[arg(long)]
    pub fixture: PathBuf,

    /// Accounting strategy (predictive, counting)
    #[arg(long)]
    pub strategy: Option<StrategyKind>,

    /// Overcommit policy (clamp, reject)
    #[arg(long)]
    pub policy: Option<OvercommitPolicy>,

    /// Extra attempts after a node write conflict
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Charge one pod slot per admitted pod
    #[arg(long)]
    pub count_pod_slots: bool,
}

impl SimulationArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            strategy: self.strategy,
            policy: self.policy,
            max_retries: self.max_retries,
            count_pod_slots: self.count_pod_slots,
        }
    }
}

/// Logs go to stderr so JSON output on stdout stays parseable
fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Plain => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SimulatorConfig::load(cli.config.as_deref())?;
    init_tracing(config.log_format, cli.verbose);

    match cli.command {
        Commands::Simulate { args, metrics } => {
            config.apply(&args.overrides());
            simulate::run(&args.fixture, &config, cli.format, metrics).await?;
        }
        Commands::Check { args } => {
            config.apply(&args.overrides());
            check::run(&args.fixture, &config, cli.format).await?;
        }
    }

    Ok(())
}
