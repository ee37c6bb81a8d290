//! Cluster fixtures replayed by the simulator

use anyhow::{Context, Result};
use serde::Deserialize;
use sim_lib::{InMemoryStore, Node, Pod};
use std::path::Path;

const DEFAULT_NAMESPACE: &str = "default";

/// Nodes and pods loaded from a JSON document
///
/// ```json
/// { "nodes": [ ... ], "pods": [ ... ] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pods: Vec<Pod>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let mut fixture: Fixture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture {}", path.display()))?;
        fixture.normalize();
        Ok(fixture)
    }

    /// Fill in defaults a hand-written fixture usually leaves out
    fn normalize(&mut self) {
        for node in &mut self.nodes {
            if node.status.allocatable.is_empty() {
                node.status.allocatable = node.status.capacity.clone();
            }
        }
        for pod in &mut self.pods {
            if pod.metadata.namespace.is_empty() {
                pod.metadata.namespace = DEFAULT_NAMESPACE.to_string();
            }
        }
    }

    /// Write every node and pod into the store as-is
    pub fn seed(&self, store: &InMemoryStore) {
        for node in &self.nodes {
            store.insert_node(node.clone());
        }
        for pod in &self.pods {
            store.insert_pod(pod.clone());
        }
    }
}
