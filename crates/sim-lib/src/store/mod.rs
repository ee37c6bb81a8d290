//! Object store consumed by the accounting strategies
//!
//! Strategies only see nodes and pods through [`ObjectStore`]. The store is
//! the single source of truth; node writes are version-conditioned so that
//! concurrent read-modify-write cycles are detected rather than lost.

mod memory;

pub use memory::InMemoryStore;

use crate::models::{Node, Pod};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Kind of stored object, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Node,
    Pod,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Node => f.write_str("node"),
            ObjectKind::Pod => f.write_str("pod"),
        }
    }
}

/// Errors reported by a store implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: ObjectKind,
        name: String,
        expected: String,
        actual: String,
    },

    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Whether the write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Narrow store contract used by strategies and snapshot queries
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError>;

    /// Replace a node, returning the stored copy with its new version
    ///
    /// When `node.metadata.resource_version` is set the write only succeeds
    /// if it still matches the stored version; otherwise it fails with
    /// [`StoreError::Conflict`].
    async fn update_node(&self, node: &Node) -> Result<Node, StoreError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError>;

    /// Create or replace a pod unconditionally
    async fn create_or_update_pod(&self, pod: &Pod) -> Result<Pod, StoreError>;

    /// Clear a pod's node binding while keeping the object
    async fn delete_pod_binding(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        (**self).get_node(name).await
    }

    async fn update_node(&self, node: &Node) -> Result<Node, StoreError> {
        (**self).update_node(node).await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        (**self).list_nodes().await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        (**self).get_pod(namespace, name).await
    }

    async fn create_or_update_pod(&self, pod: &Pod) -> Result<Pod, StoreError> {
        (**self).create_or_update_pod(pod).await
    }

    async fn delete_pod_binding(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        (**self).delete_pod_binding(namespace, name).await
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, StoreError> {
        (**self).list_pods().await
    }
}
