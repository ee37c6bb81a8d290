//! Replay a fixture through an accounting strategy

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use sim_lib::strategy::{self, StrategyKind};
use sim_lib::{
    render_metrics, CapacitySnapshot, InMemoryStore, NodeCapacity, OvercommitPolicy, Pod,
    ResourceList, Strategy,
};
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;
use tracing::{info, warn};

use crate::config::SimulatorConfig;
use crate::fixture::Fixture;
use crate::output::{
    color_status, format_resources, print_error, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// What happened to one pod during the replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Admitted,
    Overcommitted,
    Rejected,
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Admitted => "admitted",
            OutcomeStatus::Overcommitted => "overcommitted",
            OutcomeStatus::Rejected => "rejected",
            OutcomeStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub pod: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "ResourceList::is_empty")]
    pub requested: ResourceList,
    #[serde(skip_serializing_if = "ResourceList::is_empty")]
    pub shortfall: ResourceList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Store and strategy state after a replay
pub struct Simulation {
    pub store: Arc<InMemoryStore>,
    pub strategy: Arc<dyn Strategy>,
    pub outcomes: Vec<Outcome>,
}

#[derive(Serialize)]
struct SimulationReport<'a> {
    strategy: StrategyKind,
    policy: OvercommitPolicy,
    outcomes: &'a [Outcome],
    nodes: &'a [NodeCapacity],
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<String>,
}

/// Row for the per-node capacity table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
    #[tabled(rename = "Allocatable")]
    allocatable: String,
    #[tabled(rename = "Requested")]
    requested: String,
    #[tabled(rename = "Pods")]
    pods: usize,
}

impl From<&NodeCapacity> for NodeRow {
    fn from(node: &NodeCapacity) -> Self {
        Self {
            name: node.name.clone(),
            capacity: format_resources(&node.capacity),
            allocatable: format_resources(&node.allocatable),
            requested: format_resources(&node.requested),
            pods: node.pods,
        }
    }
}

/// Admit every scheduled pod in order, recording each result
pub async fn replay(strategy: &dyn Strategy, pods: &[Pod]) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(pods.len());

    for pod in pods {
        let key = pod.key();
        let Some(node) = pod.node_name() else {
            outcomes.push(Outcome {
                pod: key.to_string(),
                node: None,
                status: OutcomeStatus::Skipped,
                requested: ResourceList::new(),
                shortfall: ResourceList::new(),
                error: None,
            });
            continue;
        };

        let outcome = match strategy.add(pod).await {
            Ok(admission) => Outcome {
                pod: key.to_string(),
                node: Some(admission.node.clone()),
                status: if admission.is_overcommitted() {
                    OutcomeStatus::Overcommitted
                } else {
                    OutcomeStatus::Admitted
                },
                requested: admission.requested,
                shortfall: admission.shortfall,
                error: None,
            },
            Err(e) => {
                warn!(pod = %key, node = %node, error = %e, "Admission failed");
                Outcome {
                    pod: key.to_string(),
                    node: Some(node.to_string()),
                    status: OutcomeStatus::Rejected,
                    requested: ResourceList::new(),
                    shortfall: ResourceList::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

/// Load a fixture into a fresh store and replay it
pub async fn prepare(fixture_path: &Path, config: &SimulatorConfig) -> Result<Simulation> {
    let fixture = Fixture::load(fixture_path)?;
    let store = Arc::new(InMemoryStore::new());
    fixture.seed(&store);

    info!(
        nodes = fixture.nodes.len(),
        pods = fixture.pods.len(),
        strategy = %config.strategy,
        policy = %config.accounting.overcommit,
        "Fixture loaded"
    );

    let strategy = strategy::build(
        config.strategy,
        Arc::clone(&store),
        config.accounting.clone(),
    );
    let outcomes = replay(strategy.as_ref(), &fixture.pods).await;

    Ok(Simulation {
        store,
        strategy,
        outcomes,
    })
}

fn print_outcome(outcome: &Outcome) {
    let node = outcome.node.as_deref().unwrap_or("-");
    let status = color_status(outcome.status.as_str());
    match outcome.status {
        OutcomeStatus::Admitted => print_success(&format!(
            "{} {} on {} ({})",
            outcome.pod,
            status,
            node,
            format_resources(&outcome.requested)
        )),
        OutcomeStatus::Overcommitted => print_warning(&format!(
            "{} {} on {}, short by {}",
            outcome.pod,
            status,
            node,
            format_resources(&outcome.shortfall)
        )),
        OutcomeStatus::Rejected => print_error(&format!(
            "{} {} on {}: {}",
            outcome.pod,
            status,
            node,
            outcome.error.as_deref().unwrap_or("unknown error")
        )),
        OutcomeStatus::Skipped => {
            print_info(&format!("{} {}: no target node", outcome.pod, status))
        }
    }
}

/// Run the simulation and print outcomes and node capacity
pub async fn run(
    fixture: &Path,
    config: &SimulatorConfig,
    format: OutputFormat,
    with_metrics: bool,
) -> Result<()> {
    let simulation = prepare(fixture, config).await?;
    let snapshot = CapacitySnapshot::new(Arc::clone(&simulation.store), &config.accounting);
    let nodes = snapshot.cluster().await?;
    let metrics = if with_metrics {
        Some(render_metrics()?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            print_json(&SimulationReport {
                strategy: config.strategy,
                policy: config.accounting.overcommit,
                outcomes: &simulation.outcomes,
                nodes: &nodes,
                metrics,
            })?;
        }
        OutputFormat::Table => {
            println!(
                "{}",
                format!(
                    "Simulation ({} strategy, {} policy)",
                    simulation.strategy.name(),
                    config.accounting.overcommit
                )
                .bold()
            );
            println!("{}", "=".repeat(50));
            for outcome in &simulation.outcomes {
                print_outcome(outcome);
            }
            println!();

            let rows: Vec<NodeRow> = nodes.iter().map(NodeRow::from).collect();
            print_table(&rows);

            if let Some(metrics) = metrics {
                println!();
                print!("{}", metrics);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_lib::{Node, StrategyConfig};

    fn cpu(value: &str) -> ResourceList {
        ResourceList::new().with("cpu", value.parse().unwrap())
    }

    #[tokio::test]
    async fn test_replay_records_every_pod() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_node(Node::new("node-a", cpu("1"), cpu("1")));
        let strategy = strategy::build(
            StrategyKind::Predictive,
            Arc::clone(&store),
            StrategyConfig::default(),
        );

        let pods = vec![
            Pod::new("default", "fits").with_container(cpu("600m")).on_node("node-a"),
            Pod::new("default", "squeezed").with_container(cpu("600m")).on_node("node-a"),
            Pod::new("default", "lost").with_container(cpu("1")).on_node("node-z"),
            Pod::new("default", "pending").with_container(cpu("1")),
        ];
        let outcomes = replay(strategy.as_ref(), &pods).await;

        let statuses: Vec<OutcomeStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                OutcomeStatus::Admitted,
                OutcomeStatus::Overcommitted,
                OutcomeStatus::Rejected,
                OutcomeStatus::Skipped,
            ]
        );
        assert_eq!(outcomes[1].shortfall, cpu("200m"));
        assert!(outcomes[2].error.as_deref().unwrap().contains("node-z"));
    }
}
