//! Core object models for the simulated cluster

use crate::resources::ResourceList;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity and bookkeeping shared by every stored object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped objects such as nodes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Opaque version token managed by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// A simulated compute host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Total physical resources
    #[serde(default)]
    pub capacity: ResourceList,
    /// Remaining schedulable resources
    #[serde(default)]
    pub allocatable: ResourceList,
}

impl Node {
    pub fn new(name: impl Into<String>, capacity: ResourceList, allocatable: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            status: NodeStatus {
                capacity,
                allocatable,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Namespaced identity of a pod
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Requests and limits of a single container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl Container {
    pub fn new(name: impl Into<String>, requests: ResourceList, limits: ResourceList) -> Self {
        Self {
            name: name.into(),
            resources: ResourceRequirements { requests, limits },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    /// Target node; `None` or empty means unscheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    /// Node whose allocatable currently includes this pod's request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_node: Option<String>,
}

/// A workload unit made of one or more containers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Append a container whose limits equal its requests
    pub fn with_container(mut self, requests: ResourceList) -> Self {
        let name = format!("container-{}", self.spec.containers.len());
        self.spec
            .containers
            .push(Container::new(name, requests.clone(), requests));
        self
    }

    pub fn with_init_container(mut self, requests: ResourceList) -> Self {
        let name = format!("init-{}", self.spec.init_containers.len());
        self.spec
            .init_containers
            .push(Container::new(name, requests.clone(), requests));
        self
    }

    pub fn on_node(mut self, node_name: impl Into<String>) -> Self {
        self.spec.node_name = Some(node_name.into());
        self
    }

    pub fn key(&self) -> PodKey {
        PodKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Target node, ignoring an empty name
    pub fn node_name(&self) -> Option<&str> {
        self.spec.node_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn bound_node(&self) -> Option<&str> {
        self.status.bound_node.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Quantity;

    #[test]
    fn test_pod_deserializes_from_camel_case() {
        let json = r#"{
            "metadata": {"name": "web", "namespace": "prod", "resourceVersion": "7"},
            "spec": {
                "nodeName": "node-a",
                "initContainers": [{"name": "setup", "resources": {"requests": {"cpu": "1"}}}],
                "containers": [
                    {"name": "app", "resources": {"requests": {"cpu": "250m", "memory": "64Mi"}}}
                ]
            }
        }"#;

        let pod: Pod = serde_json::from_str(json).unwrap();

        assert_eq!(pod.key(), PodKey::new("prod", "web"));
        assert_eq!(pod.node_name(), Some("node-a"));
        assert_eq!(pod.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(pod.spec.init_containers.len(), 1);
        assert_eq!(
            pod.spec.containers[0].resources.requests.get("cpu"),
            Quantity::from_milli(250)
        );
        assert_eq!(pod.status.phase, PodPhase::Pending);
        assert!(pod.bound_node().is_none());
    }

    #[test]
    fn test_empty_node_name_is_unscheduled() {
        let pod = Pod::new("default", "idle").on_node("");
        assert_eq!(pod.node_name(), None);
    }

    #[test]
    fn test_node_round_trips_through_json() {
        let node = Node::new(
            "node-a",
            ResourceList::new().with("cpu", Quantity::from_units(4)),
            ResourceList::new().with("cpu", Quantity::from_milli(3500)),
        );

        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains(r#""allocatable":{"cpu":"3500m"}"#));

        let parsed: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_pod_key_display() {
        assert_eq!(PodKey::new("test", "schedulerPod").to_string(), "test/schedulerPod");
    }
}
