//! Resource quantities and vectors
//!
//! This module provides:
//! - Exact milli-unit quantities with Kubernetes-style parsing
//! - Open-keyed resource vectors with clamping arithmetic
//! - Aggregate request computation for pods

mod list;
mod quantity;

pub use list::{ResourceList, Subtraction};
pub use quantity::{Quantity, QuantityError};

use crate::models::PodSpec;

/// CPU, in milli-cores
pub const CPU: &str = "cpu";

/// Memory, in bytes
pub const MEMORY: &str = "memory";

/// Pod slots, as a count
pub const PODS: &str = "pods";

/// Local ephemeral storage, in bytes
pub const EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// Whether `name` is a vendor-defined extended resource (e.g. `nvidia.com/gpu`)
pub fn is_extended_resource(name: &str) -> bool {
    name.contains('/') && !name.starts_with("kubernetes.io/")
}

/// Aggregate request of a pod
///
/// App containers run together, so their requests add up. Init containers run
/// one at a time before them, so each only raises the per-key maximum. With
/// `count_pod_slots` the pod also consumes one `pods` slot.
pub fn aggregate_requests(spec: &PodSpec, count_pod_slots: bool) -> ResourceList {
    let app = ResourceList::sum(spec.containers.iter().map(|c| &c.resources.requests));
    let mut total = spec
        .init_containers
        .iter()
        .fold(app, |acc, init| acc.max(&init.resources.requests));

    if count_pod_slots {
        total = total.add(&ResourceList::new().with(PODS, Quantity::from_units(1)));
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pod;

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.parse().unwrap()))
            .collect()
    }

    #[test]
    fn test_aggregate_sums_app_containers() {
        let pod = Pod::new("default", "web")
            .with_container(list(&[(CPU, "100m"), (MEMORY, "64Mi")]))
            .with_container(list(&[(CPU, "200m"), ("nvidia.com/gpu", "1")]));

        let total = aggregate_requests(&pod.spec, false);

        assert_eq!(
            total,
            list(&[(CPU, "300m"), (MEMORY, "64Mi"), ("nvidia.com/gpu", "1")])
        );
    }

    #[test]
    fn test_init_containers_raise_the_maximum() {
        let pod = Pod::new("default", "migrate")
            .with_init_container(list(&[(CPU, "1"), (MEMORY, "32Mi")]))
            .with_container(list(&[(CPU, "250m"), (MEMORY, "128Mi")]))
            .with_container(list(&[(CPU, "250m")]));

        let total = aggregate_requests(&pod.spec, false);

        assert_eq!(total, list(&[(CPU, "1"), (MEMORY, "128Mi")]));
    }

    #[test]
    fn test_count_pod_slots_adds_one_pod() {
        let pod = Pod::new("default", "web").with_container(list(&[(CPU, "100m")]));

        let total = aggregate_requests(&pod.spec, true);

        assert_eq!(total.get(PODS), Quantity::from_units(1));
        assert_eq!(total.get(CPU), Quantity::from_milli(100));
    }

    #[test]
    fn test_pod_without_containers_requests_nothing() {
        let pod = Pod::new("default", "empty");
        assert!(aggregate_requests(&pod.spec, false).is_empty());
    }

    #[test]
    fn test_extended_resource_names() {
        assert!(is_extended_resource("nvidia.com/gpu"));
        assert!(!is_extended_resource(CPU));
        assert!(!is_extended_resource("kubernetes.io/batch"));
    }
}
