//! Pluggable resource-accounting strategies
//!
//! This module provides:
//! - The [`Strategy`] contract consumed by scheduling logic
//! - A predictive strategy that charges requests against node allocatable
//! - A counting strategy that records bindings without touching capacity
//! - The consistency guard both strategies use against double counting

mod counting;
mod guard;
mod predictive;


pub use counting::CountingStrategy;
pub use guard::ConsistencyGuard;
pub use predictive::PredictiveStrategy;

use crate::config::StrategyConfig;
use crate::models::{Pod, PodKey};
use crate::resources::ResourceList;
use crate::store::{ObjectKind, ObjectStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Errors returned by strategy operations
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("pod {pod} has no target node")]
    Unscheduled { pod: PodKey },

    #[error("pod {pod} is already accounted on node {node}")]
    AlreadyBound { pod: PodKey, node: String },

    #[error("pod {pod} is not accounted on any node")]
    NotBound { pod: PodKey },

    #[error("node {node} lacks capacity: short by {shortfall}")]
    InsufficientCapacity { node: String, shortfall: ResourceList },

    #[error("node {node} kept changing concurrently, gave up after {attempts} attempts")]
    ConcurrentModification { node: String, attempts: u32 },

    #[error("cannot update pod {old} into a different pod {new}")]
    IdentityMismatch { old: PodKey, new: PodKey },

    #[error("update failed while releasing the old pod: {0}")]
    UpdateRelease(#[source] Box<StrategyError>),

    #[error("update failed while admitting the new pod; old pod already released: {0}")]
    UpdateAdmit(#[source] Box<StrategyError>),

    #[error("store read failed: {0}")]
    StoreRead(#[source] StoreError),

    #[error("store write failed: {0}")]
    StoreWrite(#[source] StoreError),
}

impl StrategyError {
    /// Guard violations are caller errors and are never retried
    pub fn is_guard_violation(&self) -> bool {
        matches!(
            self,
            StrategyError::AlreadyBound { .. } | StrategyError::NotBound { .. }
        )
    }
}

/// Result of a successful admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub pod: PodKey,
    pub node: String,
    /// Aggregate request of the pod
    pub requested: ResourceList,
    /// Node allocatable after the admission
    pub allocatable: ResourceList,
    pub node_version: Option<String>,
    /// Per-resource amount the request exceeded the remaining allocatable by
    pub shortfall: ResourceList,
}

impl Admission {
    pub fn is_overcommitted(&self) -> bool {
        !self.shortfall.is_empty()
    }
}

/// Result of a successful release
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
    pub pod: PodKey,
    pub node: String,
    /// Amount given back to the node after capping at capacity
    pub released: ResourceList,
    /// Node allocatable after the release
    pub allocatable: ResourceList,
}

/// Accounting policy applied when pods are bound to or unbound from nodes
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Account a pod whose `node_name` is already set
    async fn add(&self, pod: &Pod) -> Result<Admission, StrategyError>;

    /// Reverse a previous [`Strategy::add`] and clear the binding
    ///
    /// The stored request is given back capped at node capacity. After an
    /// overcommitted admission this can leave allocatable above
    /// `capacity - requested` of the pods still bound, which
    /// [`CapacitySnapshot::reconcile`](crate::snapshot::CapacitySnapshot::reconcile)
    /// reports as drift.
    async fn delete(&self, pod: &Pod) -> Result<Release, StrategyError>;

    /// Release `old`, then admit `new`
    ///
    /// Both halves are reported distinctly so callers can reconcile a
    /// partial failure.
    async fn update(&self, old: &Pod, new: &Pod) -> Result<Admission, StrategyError> {
        if old.key() != new.key() {
            return Err(StrategyError::IdentityMismatch {
                old: old.key(),
                new: new.key(),
            });
        }

        self.delete(old)
            .await
            .map_err(|e| StrategyError::UpdateRelease(Box::new(e)))?;
        self.add(new)
            .await
            .map_err(|e| StrategyError::UpdateAdmit(Box::new(e)))
    }

    fn name(&self) -> &'static str;
}

/// Available strategy implementations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Predictive,
    Counting,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Predictive => f.write_str("predictive"),
            StrategyKind::Counting => f.write_str("counting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy {0:?} (expected \"predictive\" or \"counting\")")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "predictive" => Ok(StrategyKind::Predictive),
            "counting" => Ok(StrategyKind::Counting),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Build a strategy over a shared store
pub fn build<S>(kind: StrategyKind, store: Arc<S>, config: StrategyConfig) -> Arc<dyn Strategy>
where
    S: ObjectStore + ?Sized + 'static,
{
    match kind {
        StrategyKind::Predictive => Arc::new(PredictiveStrategy::new(store, config)),
        StrategyKind::Counting => Arc::new(CountingStrategy::new(store, config)),
    }
}
