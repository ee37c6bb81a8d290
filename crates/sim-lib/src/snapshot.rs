//! Read-side capacity queries over the simulated store
//!
//! Requested totals are recomputed from the bound pods on every call, so a
//! query never disagrees with what the store holds at that moment.

use crate::config::StrategyConfig;
use crate::models::{Node, Pod};
use crate::resources::{aggregate_requests, ResourceList};
use crate::store::{ObjectKind, ObjectStore};
use crate::strategy::StrategyError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Capacity view of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeCapacity {
    pub name: String,
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    /// Sum of the aggregate requests of bound pods
    pub requested: ResourceList,
    /// Number of bound pods
    pub pods: usize,
}

/// Stored allocatable compared with the value derived from bound pods
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub node: String,
    pub stored: ResourceList,
    /// `capacity - requested`, clamped at zero
    pub derived: ResourceList,
    /// Signed `stored - derived`, non-zero keys only
    pub drift: ResourceList,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }
}

pub struct CapacitySnapshot<S: ?Sized> {
    store: Arc<S>,
    count_pod_slots: bool,
}

impl<S: ObjectStore + ?Sized> CapacitySnapshot<S> {
    /// Build a query using the same request rules as the strategies
    pub fn new(store: Arc<S>, config: &StrategyConfig) -> Self {
        Self {
            store,
            count_pod_slots: config.count_pod_slots,
        }
    }

    async fn fetch_node(&self, name: &str) -> Result<Node, StrategyError> {
        self.store
            .get_node(name)
            .await
            .map_err(StrategyError::StoreRead)?
            .ok_or_else(|| StrategyError::NotFound {
                kind: ObjectKind::Node,
                name: name.to_string(),
            })
    }

    async fn bound_pods(&self) -> Result<Vec<Pod>, StrategyError> {
        let pods = self
            .store
            .list_pods()
            .await
            .map_err(StrategyError::StoreRead)?;
        Ok(pods
            .into_iter()
            .filter(|pod| pod.bound_node().is_some())
            .collect())
    }

    fn requested_on(&self, node: &str, pods: &[Pod]) -> (ResourceList, usize) {
        let requests: Vec<ResourceList> = pods
            .iter()
            .filter(|pod| pod.bound_node() == Some(node))
            .map(|pod| aggregate_requests(&pod.spec, self.count_pod_slots))
            .collect();
        (ResourceList::sum(&requests), requests.len())
    }

    fn summarize(&self, node: Node, pods: &[Pod]) -> NodeCapacity {
        let (requested, count) = self.requested_on(node.name(), pods);
        NodeCapacity {
            name: node.metadata.name,
            capacity: node.status.capacity,
            allocatable: node.status.allocatable,
            requested,
            pods: count,
        }
    }

    /// Stored allocatable of a node
    pub async fn allocatable(&self, node: &str) -> Result<ResourceList, StrategyError> {
        Ok(self.fetch_node(node).await?.status.allocatable)
    }

    /// Sum of requests of the pods bound to a node; empty without bound pods
    pub async fn requested(&self, node: &str) -> Result<ResourceList, StrategyError> {
        self.fetch_node(node).await?;
        let pods = self.bound_pods().await?;
        Ok(self.requested_on(node, &pods).0)
    }

    /// `capacity - requested`; capacity unchanged for a node without bound pods
    pub async fn remaining(&self, node: &str) -> Result<ResourceList, StrategyError> {
        let summary = self.node(node).await?;
        Ok(summary.capacity.subtract(&summary.requested).result)
    }

    pub async fn node(&self, node: &str) -> Result<NodeCapacity, StrategyError> {
        let stored = self.fetch_node(node).await?;
        let pods = self.bound_pods().await?;
        Ok(self.summarize(stored, &pods))
    }

    /// Capacity view of every node, sorted by name
    pub async fn cluster(&self) -> Result<Vec<NodeCapacity>, StrategyError> {
        let nodes = self
            .store
            .list_nodes()
            .await
            .map_err(StrategyError::StoreRead)?;
        let pods = self.bound_pods().await?;

        let mut summaries: Vec<NodeCapacity> = nodes
            .into_iter()
            .map(|node| self.summarize(node, &pods))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Pods bound to nodes that are missing from the store
    pub async fn orphaned_pods(&self) -> Result<HashMap<String, usize>, StrategyError> {
        let nodes = self
            .store
            .list_nodes()
            .await
            .map_err(StrategyError::StoreRead)?;
        let mut orphans = HashMap::new();
        for pod in self.bound_pods().await? {
            if let Some(node) = pod.bound_node() {
                if !nodes.iter().any(|n| n.name() == node) {
                    *orphans.entry(node.to_string()).or_insert(0) += 1;
                }
            }
        }
        Ok(orphans)
    }

    /// Recompute a node's allocatable from capacity and bound pods
    pub async fn reconcile(&self, node: &str) -> Result<Reconciliation, StrategyError> {
        let summary = self.node(node).await?;
        let derived = summary.capacity.subtract(&summary.requested).result;
        let drift = summary.allocatable.difference(&derived);
        Ok(Reconciliation {
            node: summary.name,
            stored: summary.allocatable,
            derived,
            drift,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodKey;
    use crate::resources::{Quantity, CPU, MEMORY};
    use crate::store::InMemoryStore;
    use crate::strategy::{PredictiveStrategy, Strategy};

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.parse().unwrap()))
            .collect()
    }

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let resources = list(&[(CPU, "4"), (MEMORY, "8Gi")]);
        store.insert_node(Node::new("node-a", resources.clone(), resources.clone()));
        store.insert_node(Node::new("node-b", resources.clone(), resources));
        store
    }

    fn web_pod(name: &str, node: &str) -> Pod {
        Pod::new("default", name)
            .with_container(list(&[(CPU, "500m"), (MEMORY, "1Gi")]))
            .on_node(node)
    }

    #[tokio::test]
    async fn test_empty_node_reports_capacity() {
        let store = seeded_store();
        let snapshot = CapacitySnapshot::new(store, &StrategyConfig::default());

        assert!(snapshot.requested("node-a").await.unwrap().is_empty());
        assert_eq!(
            snapshot.remaining("node-a").await.unwrap(),
            list(&[(CPU, "4"), (MEMORY, "8Gi")])
        );
    }

    #[tokio::test]
    async fn test_missing_node_is_not_found() {
        let snapshot = CapacitySnapshot::new(seeded_store(), &StrategyConfig::default());

        assert!(matches!(
            snapshot.allocatable("ghost").await,
            Err(StrategyError::NotFound { .. })
        ));
        assert!(matches!(
            snapshot.requested("ghost").await,
            Err(StrategyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_requested_follows_admissions() {
        let store = seeded_store();
        let strategy = PredictiveStrategy::new(Arc::clone(&store), StrategyConfig::default());
        let snapshot = CapacitySnapshot::new(Arc::clone(&store), strategy.config());

        strategy.add(&web_pod("a", "node-a")).await.unwrap();
        strategy.add(&web_pod("b", "node-a")).await.unwrap();
        strategy.add(&web_pod("c", "node-b")).await.unwrap();

        let summary = snapshot.node("node-a").await.unwrap();
        assert_eq!(summary.pods, 2);
        assert_eq!(summary.requested, list(&[(CPU, "1"), (MEMORY, "2Gi")]));
        assert_eq!(summary.allocatable, list(&[(CPU, "3"), (MEMORY, "6Gi")]));

        let cluster = snapshot.cluster().await.unwrap();
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster[1].name, "node-b");
        assert_eq!(cluster[1].pods, 1);
    }

    #[tokio::test]
    async fn test_queries_are_idempotent() {
        let store = seeded_store();
        let strategy = PredictiveStrategy::new(Arc::clone(&store), StrategyConfig::default());
        strategy.add(&web_pod("a", "node-a")).await.unwrap();
        let snapshot = CapacitySnapshot::new(store, strategy.config());

        let first = (
            snapshot.allocatable("node-a").await.unwrap(),
            snapshot.requested("node-a").await.unwrap(),
        );
        let second = (
            snapshot.allocatable("node-a").await.unwrap(),
            snapshot.requested("node-a").await.unwrap(),
        );

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reconcile_matches_after_admissions() {
        let store = seeded_store();
        let strategy = PredictiveStrategy::new(Arc::clone(&store), StrategyConfig::default());
        let snapshot = CapacitySnapshot::new(Arc::clone(&store), strategy.config());

        strategy.add(&web_pod("a", "node-a")).await.unwrap();
        strategy.add(&web_pod("b", "node-a")).await.unwrap();
        strategy.delete(&web_pod("a", "node-a")).await.unwrap();

        let reconciliation = snapshot.reconcile("node-a").await.unwrap();
        assert!(reconciliation.is_consistent(), "{reconciliation:?}");
    }

    #[tokio::test]
    async fn test_reconcile_reports_external_drift() {
        let store = seeded_store();
        let snapshot = CapacitySnapshot::new(Arc::clone(&store), &StrategyConfig::default());

        // something outside the strategy shrinks the node
        let mut node = store.get_node("node-a").await.unwrap().unwrap();
        node.status.allocatable.insert(CPU, Quantity::from_milli(3500));
        store.update_node(&node).await.unwrap();

        let reconciliation = snapshot.reconcile("node-a").await.unwrap();
        assert!(!reconciliation.is_consistent());
        assert_eq!(reconciliation.drift.get(CPU), Quantity::from_milli(-500));
        assert_eq!(reconciliation.drift.len(), 1);
    }

    #[tokio::test]
    async fn test_release_after_overcommit_reports_drift() {
        let store = Arc::new(InMemoryStore::new());
        let resources = list(&[(CPU, "1")]);
        store.insert_node(Node::new("node-a", resources.clone(), resources));
        let strategy = PredictiveStrategy::new(Arc::clone(&store), StrategyConfig::default());
        let pod = |name: &str| {
            Pod::new("default", name)
                .with_container(list(&[(CPU, "600m")]))
                .on_node("node-a")
        };

        strategy.add(&pod("a")).await.unwrap();
        let clamped = strategy.add(&pod("b")).await.unwrap();
        assert_eq!(clamped.shortfall, list(&[(CPU, "200m")]));
        strategy.delete(&pod("a")).await.unwrap();

        // the clamped 200m is never charged, so the release overshoots it
        let snapshot = CapacitySnapshot::new(Arc::clone(&store), &StrategyConfig::default());
        let reconciliation = snapshot.reconcile("node-a").await.unwrap();
        assert!(!reconciliation.is_consistent());
        assert_eq!(reconciliation.stored, list(&[(CPU, "600m")]));
        assert_eq!(reconciliation.derived, list(&[(CPU, "400m")]));
        assert_eq!(reconciliation.drift, list(&[(CPU, "200m")]));
    }

    #[tokio::test]
    async fn test_orphaned_pods_are_reported() {
        let store = seeded_store();
        let mut pod = web_pod("lost", "node-z");
        pod.status.bound_node = Some("node-z".to_string());
        store.insert_pod(pod);
        let snapshot = CapacitySnapshot::new(Arc::clone(&store), &StrategyConfig::default());

        let orphans = snapshot.orphaned_pods().await.unwrap();

        assert_eq!(orphans.get("node-z"), Some(&1));
        assert!(store
            .get_pod("default", "lost")
            .await
            .unwrap()
            .map(|p| p.key() == PodKey::new("default", "lost"))
            .unwrap_or(false));
    }
}
