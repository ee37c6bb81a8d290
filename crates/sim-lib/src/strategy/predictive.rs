//! Predictive accounting: charge pod requests against node allocatable

use super::{Admission, ConsistencyGuard, Release, Strategy, StrategyError};
use crate::config::{OvercommitPolicy, StrategyConfig};
use crate::models::{Node, Pod, PodPhase};
use crate::observability::{StrategyMetrics, StructuredLogger};
use crate::resources::{aggregate_requests, Subtraction};
use crate::store::{ObjectKind, ObjectStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

const STRATEGY_NAME: &str = "predictive";

/// Strategy that keeps each node's allocatable equal to what remains after
/// its bound pods' requests
pub struct PredictiveStrategy<S: ?Sized> {
    store: Arc<S>,
    guard: ConsistencyGuard<S>,
    config: StrategyConfig,
    metrics: StrategyMetrics,
    logger: StructuredLogger,
}

impl<S: ObjectStore + ?Sized> PredictiveStrategy<S> {
    pub fn new(store: Arc<S>, config: StrategyConfig) -> Self {
        Self {
            guard: ConsistencyGuard::new(Arc::clone(&store)),
            store,
            config,
            metrics: StrategyMetrics::new(),
            logger: StructuredLogger::new(STRATEGY_NAME),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Read-modify-write a node, re-reading after every version conflict
    ///
    /// `apply` mutates the freshly read node and may abort the cycle with an
    /// error. Returns the stored node and the value `apply` produced on the
    /// attempt that won.
    async fn modify_node<T, F>(&self, node_name: &str, mut apply: F) -> Result<(Node, T), StrategyError>
    where
        T: Send,
        F: FnMut(&mut Node) -> Result<T, StrategyError> + Send,
    {
        let max_attempts = self.config.max_conflict_retries.saturating_add(1);

        for attempt in 1..=max_attempts {
            let mut node = self
                .store
                .get_node(node_name)
                .await
                .map_err(StrategyError::StoreRead)?
                .ok_or_else(|| StrategyError::NotFound {
                    kind: ObjectKind::Node,
                    name: node_name.to_string(),
                })?;

            let outcome = apply(&mut node)?;

            match self.store.update_node(&node).await {
                Ok(stored) => return Ok((stored, outcome)),
                Err(e) if e.is_conflict() => {
                    self.metrics.inc_conflict_retries();
                    if attempt < max_attempts {
                        self.logger.log_conflict(node_name, attempt, max_attempts);
                    }
                }
                Err(e) => return Err(StrategyError::StoreWrite(e)),
            }
        }

        Err(StrategyError::ConcurrentModification {
            node: node_name.to_string(),
            attempts: max_attempts,
        })
    }

    /// Undo a node write whose paired pod write failed
    async fn compensate<F>(&self, node_name: &str, apply: F)
    where
        F: FnMut(&mut Node) -> Result<(), StrategyError> + Send,
    {
        match self.modify_node(node_name, apply).await {
            Ok(_) => warn!(node = %node_name, "Pod write failed, node change reverted"),
            Err(e) => error!(
                node = %node_name,
                error = %e,
                "Pod write failed and the node change could not be reverted"
            ),
        }
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> Strategy for PredictiveStrategy<S> {
    async fn add(&self, pod: &Pod) -> Result<Admission, StrategyError> {
        let started = Instant::now();
        let key = pod.key();
        let node_name = pod
            .node_name()
            .ok_or_else(|| StrategyError::Unscheduled { pod: key.clone() })?;

        if let Err(e) = self.guard.ensure_unbound(pod).await {
            if e.is_guard_violation() {
                self.metrics.inc_guard_rejections(STRATEGY_NAME, "already_bound");
            }
            return Err(e);
        }

        let requested = aggregate_requests(&pod.spec, self.config.count_pod_slots);
        let policy = self.config.overcommit;
        debug!(pod = %key, node = %node_name, requested = %requested, "Charging pod request");

        let (node, (charged, shortfall)) = self
            .modify_node(node_name, |node| {
                let Subtraction { result, shortfall } = node.status.allocatable.subtract(&requested);
                if !shortfall.is_empty() && policy == OvercommitPolicy::Reject {
                    return Err(StrategyError::InsufficientCapacity {
                        node: node.metadata.name.clone(),
                        shortfall,
                    });
                }
                // only components that actually moved
                let charged = node.status.allocatable.difference(&result);
                node.status.allocatable = result;
                Ok((charged, shortfall))
            })
            .await?;

        let mut bound = pod.clone();
        bound.status.bound_node = Some(node_name.to_string());
        bound.status.phase = PodPhase::Running;

        if let Err(e) = self.store.create_or_update_pod(&bound).await {
            self.compensate(node_name, |node| {
                node.status.allocatable = node.status.allocatable.add(&charged);
                Ok(())
            })
            .await;
            return Err(StrategyError::StoreWrite(e));
        }

        if !shortfall.is_empty() {
            self.metrics.record_shortfall(&shortfall);
            self.logger.log_shortfall(&key, node_name, &shortfall);
        }
        self.metrics.inc_admissions(STRATEGY_NAME);
        self.metrics
            .observe_latency(STRATEGY_NAME, "add", started.elapsed().as_secs_f64());
        self.logger.log_admission(&key, node_name, &requested);

        Ok(Admission {
            pod: key,
            node: node_name.to_string(),
            requested,
            allocatable: node.status.allocatable,
            node_version: node.metadata.resource_version,
            shortfall,
        })
    }

    async fn delete(&self, pod: &Pod) -> Result<Release, StrategyError> {
        let started = Instant::now();

        let (stored, node_name) = match self.guard.ensure_bound(pod).await {
            Ok(bound) => bound,
            Err(e) => {
                if e.is_guard_violation() {
                    self.metrics.inc_guard_rejections(STRATEGY_NAME, "not_bound");
                }
                return Err(e);
            }
        };

        // The stored copy is what was charged, whatever the caller passed in
        let key = stored.key();
        let requested = aggregate_requests(&stored.spec, self.config.count_pod_slots);

        let (node, released) = self
            .modify_node(&node_name, |node| {
                let before = node.status.allocatable.clone();
                node.status.allocatable = before.add_capped(&requested, &node.status.capacity);
                Ok(node.status.allocatable.exceeds(&before))
            })
            .await?;

        if let Err(e) = self
            .store
            .delete_pod_binding(&key.namespace, &key.name)
            .await
        {
            self.compensate(&node_name, |node| {
                node.status.allocatable = node.status.allocatable.subtract(&released).result;
                Ok(())
            })
            .await;
            return Err(StrategyError::StoreWrite(e));
        }

        self.metrics.inc_releases(STRATEGY_NAME);
        self.metrics
            .observe_latency(STRATEGY_NAME, "delete", started.elapsed().as_secs_f64());
        self.logger.log_release(&key, &node_name, &released);

        Ok(Release {
            pod: key,
            node: node_name,
            released,
            allocatable: node.status.allocatable,
        })
    }

    fn name(&self) -> &'static str {
        STRATEGY_NAME
    }
}

impl<S: ?Sized> std::fmt::Debug for PredictiveStrategy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictiveStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
