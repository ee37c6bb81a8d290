//! Double-counting protection
//!
//! Binding state is read from the store on every check rather than cached,
//! so external writes to the store are always observed. The check and the
//! following write are not atomic.

use super::StrategyError;
use crate::models::Pod;
use crate::store::ObjectStore;
use std::sync::Arc;

pub struct ConsistencyGuard<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for ConsistencyGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ObjectStore + ?Sized> ConsistencyGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn stored(&self, pod: &Pod) -> Result<Option<Pod>, StrategyError> {
        self.store
            .get_pod(&pod.metadata.namespace, &pod.metadata.name)
            .await
            .map_err(StrategyError::StoreRead)
    }

    /// Node the stored copy of `pod` is accounted on, if any
    pub async fn bound_node(&self, pod: &Pod) -> Result<Option<String>, StrategyError> {
        Ok(self
            .stored(pod)
            .await?
            .and_then(|stored| stored.status.bound_node))
    }

    /// Fail with `AlreadyBound` if the pod is already accounted somewhere
    pub async fn ensure_unbound(&self, pod: &Pod) -> Result<(), StrategyError> {
        match self.bound_node(pod).await? {
            Some(node) => Err(StrategyError::AlreadyBound {
                pod: pod.key(),
                node,
            }),
            None => Ok(()),
        }
    }

    /// Return the stored pod and its node, or fail with `NotBound`
    pub async fn ensure_bound(&self, pod: &Pod) -> Result<(Pod, String), StrategyError> {
        let stored = self.stored(pod).await?;
        match stored {
            Some(stored) => match stored.status.bound_node.clone() {
                Some(node) => Ok((stored, node)),
                None => Err(StrategyError::NotBound { pod: pod.key() }),
            },
            None => Err(StrategyError::NotBound { pod: pod.key() }),
        }
    }
}
