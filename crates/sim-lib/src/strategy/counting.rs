//! Dry-run accounting: record bindings, leave node capacity alone

use super::{Admission, ConsistencyGuard, Release, Strategy, StrategyError};
use crate::config::StrategyConfig;
use crate::models::{Node, Pod, PodPhase};
use crate::observability::{StrategyMetrics, StructuredLogger};
use crate::resources::{aggregate_requests, ResourceList};
use crate::store::{ObjectKind, ObjectStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

const STRATEGY_NAME: &str = "counting";

/// Strategy that only counts placements
///
/// Pods are bound and unbound exactly like the predictive strategy would,
/// so the snapshot query can still report requested totals, but node
/// allocatable is never written.
pub struct CountingStrategy<S: ?Sized> {
    store: Arc<S>,
    guard: ConsistencyGuard<S>,
    config: StrategyConfig,
    metrics: StrategyMetrics,
    logger: StructuredLogger,
}

impl<S: ObjectStore + ?Sized> CountingStrategy<S> {
    pub fn new(store: Arc<S>, config: StrategyConfig) -> Self {
        Self {
            guard: ConsistencyGuard::new(Arc::clone(&store)),
            store,
            config,
            metrics: StrategyMetrics::new(),
            logger: StructuredLogger::new(STRATEGY_NAME),
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
}

#[async_trait]
impl<S: ObjectStore + ?Sized> Strategy for CountingStrategy<S> {
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

        let node = self.fetch_node(node_name).await?;
        let requested = aggregate_requests(&pod.spec, self.config.count_pod_slots);

        let mut bound = pod.clone();
        bound.status.bound_node = Some(node_name.to_string());
        bound.status.phase = PodPhase::Running;
        self.store
            .create_or_update_pod(&bound)
            .await
            .map_err(StrategyError::StoreWrite)?;

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
            shortfall: ResourceList::new(),
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

        let key = stored.key();
        let node = self.fetch_node(&node_name).await?;
        self.store
            .delete_pod_binding(&key.namespace, &key.name)
            .await
            .map_err(StrategyError::StoreWrite)?;

        let released = ResourceList::new();
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
