//! Verify stored allocatable against the pods bound to each node

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use sim_lib::strategy::StrategyKind;
use sim_lib::{CapacitySnapshot, Reconciliation};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;

use crate::commands::simulate;
use crate::config::SimulatorConfig;
use crate::output::{
    format_resources, print_json, print_success, print_table, print_warning, OutputFormat,
};

#[derive(Serialize)]
struct CheckReport<'a> {
    strategy: StrategyKind,
    nodes: &'a [Reconciliation],
    orphaned: &'a BTreeMap<String, usize>,
}

/// Row for the drift table
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Stored")]
    stored: String,
    #[tabled(rename = "Derived")]
    derived: String,
    #[tabled(rename = "Drift")]
    drift: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&Reconciliation> for DriftRow {
    fn from(report: &Reconciliation) -> Self {
        Self {
            node: report.node.clone(),
            stored: format_resources(&report.stored),
            derived: format_resources(&report.derived),
            drift: format_resources(&report.drift),
            status: if report.is_consistent() {
                "consistent".to_string()
            } else {
                "drift".to_string()
            },
        }
    }
}

/// Replay the fixture, then reconcile every node
///
/// Fails when any node drifted or a pod is bound to a missing node.
pub async fn run(fixture: &Path, config: &SimulatorConfig, format: OutputFormat) -> Result<()> {
    let simulation = simulate::prepare(fixture, config).await?;
    let snapshot = CapacitySnapshot::new(Arc::clone(&simulation.store), &config.accounting);

    let mut reports = Vec::new();
    for node in snapshot.cluster().await? {
        reports.push(snapshot.reconcile(&node.name).await?);
    }
    let orphaned: BTreeMap<String, usize> = snapshot.orphaned_pods().await?.into_iter().collect();

    match format {
        OutputFormat::Json => print_json(&CheckReport {
            strategy: config.strategy,
            nodes: &reports,
            orphaned: &orphaned,
        })?,
        OutputFormat::Table => {
            println!(
                "{}",
                format!("Allocatable check ({} strategy)", simulation.strategy.name()).bold()
            );
            println!("{}", "=".repeat(50));
            let rows: Vec<DriftRow> = reports.iter().map(DriftRow::from).collect();
            print_table(&rows);
            for (node, count) in &orphaned {
                print_warning(&format!("{count} pod(s) bound to missing node {node}"));
            }
        }
    }

    let drifted = reports.iter().filter(|r| !r.is_consistent()).count();
    if drifted > 0 || !orphaned.is_empty() {
        anyhow::bail!(
            "Allocatable drift on {} node(s), {} missing node(s) with bound pods",
            drifted,
            orphaned.len()
        );
    }

    if matches!(format, OutputFormat::Table) {
        print_success("Every node's allocatable matches its bound pods");
    }
    Ok(())
}
