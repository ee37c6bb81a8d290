//! In-memory object store
//!
//! Backs tests and the simulator binary. Every write stamps a fresh value of
//! a store-wide version counter, mirroring how an API server hands out
//! resource versions.

use super::{ObjectKind, ObjectStore, StoreError};
use crate::models::{Node, Pod, PodKey, PodPhase};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Thread-safe store holding nodes and pods
#[derive(Debug, Default)]
pub struct InMemoryStore {
    nodes: DashMap<String, Node>,
    pods: DashMap<PodKey, Pod>,
    version: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Seed or overwrite a node, bypassing version checks
    pub fn insert_node(&self, mut node: Node) -> Node {
        node.metadata.resource_version = Some(self.next_version());
        node.metadata
            .creation_timestamp
            .get_or_insert_with(Utc::now);
        self.nodes.insert(node.metadata.name.clone(), node.clone());
        node
    }

    /// Seed or overwrite a pod
    pub fn insert_pod(&self, mut pod: Pod) -> Pod {
        pod.metadata.resource_version = Some(self.next_version());
        pod.metadata.creation_timestamp.get_or_insert_with(Utc::now);
        self.pods.insert(pod.key(), pod.clone());
        pod
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.get(name).map(|entry| entry.clone()))
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        let name = node.name();
        let mut entry = self.nodes.get_mut(name).ok_or_else(|| StoreError::NotFound {
            kind: ObjectKind::Node,
            name: name.to_string(),
        })?;

        if let Some(expected) = &node.metadata.resource_version {
            let actual = entry.metadata.resource_version.clone().unwrap_or_default();
            if *expected != actual {
                return Err(StoreError::Conflict {
                    kind: ObjectKind::Node,
                    name: name.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let mut stored = node.clone();
        stored.metadata.resource_version = Some(self.next_version());
        stored.metadata.creation_timestamp = entry.metadata.creation_timestamp;
        *entry = stored.clone();

        debug!(node = %name, version = ?stored.metadata.resource_version, "Node updated");
        Ok(stored)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(nodes)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        Ok(self
            .pods
            .get(&PodKey::new(namespace, name))
            .map(|entry| entry.clone()))
    }

    async fn create_or_update_pod(&self, pod: &Pod) -> Result<Pod, StoreError> {
        let mut stored = pod.clone();
        stored.metadata.resource_version = Some(self.next_version());

        let mut entry = self.pods.entry(pod.key()).or_insert_with(|| {
            let mut created = pod.clone();
            created.metadata.creation_timestamp.get_or_insert_with(Utc::now);
            created
        });
        stored.metadata.creation_timestamp = entry.metadata.creation_timestamp;
        *entry = stored.clone();

        debug!(pod = %pod.key(), version = ?stored.metadata.resource_version, "Pod written");
        Ok(stored)
    }

    async fn delete_pod_binding(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = PodKey::new(namespace, name);
        let mut entry = self.pods.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: ObjectKind::Pod,
            name: key.to_string(),
        })?;

        entry.spec.node_name = None;
        entry.status.bound_node = None;
        entry.status.phase = PodPhase::Pending;
        entry.metadata.resource_version = Some(self.next_version());

        debug!(pod = %key, "Pod binding cleared");
        Ok(())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError> {
        let mut pods: Vec<Pod> = self.pods.iter().map(|r| r.value().clone()).collect();
        pods.sort_by_key(Pod::key);
        Ok(pods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Quantity, ResourceList};

    fn test_node(name: &str) -> Node {
        let resources = ResourceList::new().with("cpu", Quantity::from_units(2));
        Node::new(name, resources.clone(), resources)
    }

    #[tokio::test]
    async fn test_insert_stamps_version_and_timestamp() {
        let store = InMemoryStore::new();

        let node = store.insert_node(test_node("node-a"));

        assert_eq!(node.metadata.resource_version.as_deref(), Some("1"));
        assert!(node.metadata.creation_timestamp.is_some());
        assert_eq!(store.get_node("node-a").await.unwrap(), Some(node));
        assert_eq!(store.get_node("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_node_bumps_version() {
        let store = InMemoryStore::new();
        let mut node = store.insert_node(test_node("node-a"));

        node.status.allocatable = ResourceList::new().with("cpu", Quantity::from_milli(1500));
        let updated = store.update_node(&node).await.unwrap();

        assert_ne!(updated.metadata.resource_version, node.metadata.resource_version);
        assert_eq!(updated.metadata.creation_timestamp, node.metadata.creation_timestamp);
        let stored = store.get_node("node-a").await.unwrap().unwrap();
        assert_eq!(stored.status.allocatable.get("cpu"), Quantity::from_milli(1500));
    }

    #[tokio::test]
    async fn test_stale_node_update_conflicts() {
        let store = InMemoryStore::new();
        let stale = store.insert_node(test_node("node-a"));

        store.update_node(&stale).await.unwrap();
        let err = store.update_node(&stale).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(matches!(
            err,
            StoreError::Conflict { ref expected, ref actual, .. } if expected == "1" && actual == "2"
        ));
    }

    #[tokio::test]
    async fn test_unversioned_update_is_unconditional() {
        let store = InMemoryStore::new();
        store.insert_node(test_node("node-a"));

        let mut blind = test_node("node-a");
        blind.metadata.resource_version = None;

        assert!(store.update_node(&blind).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_node_is_not_found() {
        let store = InMemoryStore::new();

        let err = store.update_node(&test_node("ghost")).await.unwrap_err();

        assert_eq!(
            err,
            StoreError::NotFound {
                kind: ObjectKind::Node,
                name: "ghost".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_pod_create_then_update_keeps_creation_time() {
        let store = InMemoryStore::new();
        let pod = Pod::new("default", "web").on_node("node-a");

        let created = store.create_or_update_pod(&pod).await.unwrap();
        let updated = store.create_or_update_pod(&created).await.unwrap();

        assert!(created.metadata.creation_timestamp.is_some());
        assert_eq!(updated.metadata.creation_timestamp, created.metadata.creation_timestamp);
        assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);
        assert_eq!(store.pod_count(), 1);
    }

    #[test]
    fn test_delete_binding_keeps_pod_object() {
        let store = InMemoryStore::new();
        let mut pod = Pod::new("default", "web").on_node("node-a");
        pod.status.bound_node = Some("node-a".to_string());
        pod.status.phase = PodPhase::Running;
        store.insert_pod(pod);

        tokio_test::block_on(store.delete_pod_binding("default", "web")).unwrap();

        let stored = tokio_test::block_on(store.get_pod("default", "web"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.node_name(), None);
        assert_eq!(stored.bound_node(), None);
        assert_eq!(stored.status.phase, PodPhase::Pending);
        assert_eq!(store.pod_count(), 1);
    }

    #[test]
    fn test_delete_binding_of_missing_pod() {
        let store = InMemoryStore::new();

        let err = tokio_test::block_on(store.delete_pod_binding("default", "ghost")).unwrap_err();

        assert!(matches!(err, StoreError::NotFound { kind: ObjectKind::Pod, .. }));
    }

    #[tokio::test]
    async fn test_lists_are_sorted() {
        let store = InMemoryStore::new();
        store.insert_node(test_node("node-b"));
        store.insert_node(test_node("node-a"));
        store.insert_pod(Pod::new("ns-b", "x"));
        store.insert_pod(Pod::new("ns-a", "y"));

        let nodes = store.list_nodes().await.unwrap();
        let pods = store.list_pods().await.unwrap();

        assert_eq!(nodes[0].name(), "node-a");
        assert_eq!(pods[0].key(), PodKey::new("ns-a", "y"));
        assert_eq!(store.node_count(), 2);
    }
}
