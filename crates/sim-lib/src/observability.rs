//! Observability infrastructure for the accounting strategies
//!
//! Provides:
//! - Prometheus metrics (admissions, releases, guard rejections, conflicts, shortfalls)
//! - Structured event logging with tracing

use crate::models::PodKey;
use crate::resources::ResourceList;
use anyhow::{Context, Result};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for strategy operation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<StrategyMetricsInner> = OnceLock::new();

struct StrategyMetricsInner {
    admissions: IntCounterVec,
    releases: IntCounterVec,
    guard_rejections: IntCounterVec,
    conflict_retries: IntCounter,
    shortfalls: IntCounterVec,
    operation_latency_seconds: HistogramVec,
}

impl StrategyMetricsInner {
    fn new() -> Self {
        Self {
            admissions: register_int_counter_vec!(
                "capsim_admissions_total",
                "Pods admitted onto a node",
                &["strategy"]
            )
            .expect("Failed to register admissions"),

            releases: register_int_counter_vec!(
                "capsim_releases_total",
                "Pods released from a node",
                &["strategy"]
            )
            .expect("Failed to register releases"),

            guard_rejections: register_int_counter_vec!(
                "capsim_guard_rejections_total",
                "Operations refused because of the pod's binding state",
                &["strategy", "reason"]
            )
            .expect("Failed to register guard_rejections"),

            conflict_retries: register_int_counter!(
                "capsim_node_conflict_retries_total",
                "Node writes retried after a version conflict"
            )
            .expect("Failed to register conflict_retries"),

            shortfalls: register_int_counter_vec!(
                "capsim_capacity_shortfalls_total",
                "Admissions that clamped a resource at zero",
                &["resource"]
            )
            .expect("Failed to register shortfalls"),

            operation_latency_seconds: register_histogram_vec!(
                "capsim_operation_latency_seconds",
                "Time spent in a strategy operation",
                &["strategy", "operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register operation_latency_seconds"),
        }
    }
}

/// Strategy metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same collectors.
#[derive(Clone)]
pub struct StrategyMetrics {
    _private: (),
}

impl Default for StrategyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(StrategyMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &StrategyMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_admissions(&self, strategy: &str) {
        self.inner().admissions.with_label_values(&[strategy]).inc();
    }

    pub fn inc_releases(&self, strategy: &str) {
        self.inner().releases.with_label_values(&[strategy]).inc();
    }

    pub fn inc_guard_rejections(&self, strategy: &str, reason: &str) {
        self.inner()
            .guard_rejections
            .with_label_values(&[strategy, reason])
            .inc();
    }

    pub fn inc_conflict_retries(&self) {
        self.inner().conflict_retries.inc();
    }

    /// Count one clamped admission per short resource
    pub fn record_shortfall(&self, shortfall: &ResourceList) {
        for resource in shortfall.keys() {
            self.inner().shortfalls.with_label_values(&[resource]).inc();
        }
    }

    pub fn observe_latency(&self, strategy: &str, operation: &str, duration_secs: f64) {
        self.inner()
            .operation_latency_seconds
            .with_label_values(&[strategy, operation])
            .observe(duration_secs);
    }

    pub fn conflict_retries(&self) -> u64 {
        self.inner().conflict_retries.get()
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

/// Structured logger for accounting events
#[derive(Clone)]
pub struct StructuredLogger {
    strategy: &'static str,
}

impl StructuredLogger {
    pub fn new(strategy: &'static str) -> Self {
        Self { strategy }
    }

    pub fn log_admission(&self, pod: &PodKey, node: &str, requested: &ResourceList) {
        info!(
            event = "pod_admitted",
            strategy = self.strategy,
            pod = %pod,
            node = %node,
            requested = %requested,
            "Pod admitted"
        );
    }

    pub fn log_release(&self, pod: &PodKey, node: &str, released: &ResourceList) {
        info!(
            event = "pod_released",
            strategy = self.strategy,
            pod = %pod,
            node = %node,
            released = %released,
            "Pod released"
        );
    }

    pub fn log_shortfall(&self, pod: &PodKey, node: &str, shortfall: &ResourceList) {
        warn!(
            event = "capacity_shortfall",
            strategy = self.strategy,
            pod = %pod,
            node = %node,
            shortfall = %shortfall,
            "Request exceeds remaining allocatable, clamped at zero"
        );
    }

    pub fn log_conflict(&self, node: &str, attempt: u32, max_attempts: u32) {
        warn!(
            event = "node_conflict",
            strategy = self.strategy,
            node = %node,
            attempt = attempt,
            max_attempts = max_attempts,
            "Node modified concurrently, retrying"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Quantity;

    #[test]
    fn test_metrics_handles_share_state() {
        let first = StrategyMetrics::new();
        let second = first.clone();

        let before = first.conflict_retries();
        second.inc_conflict_retries();

        assert!(first.conflict_retries() > before);
    }

    #[test]
    fn test_render_metrics_includes_registered_families() {
        let metrics = StrategyMetrics::new();
        metrics.inc_admissions("predictive");
        metrics.record_shortfall(&ResourceList::new().with("cpu", Quantity::from_milli(100)));

        let text = render_metrics().unwrap();

        assert!(text.contains("capsim_admissions_total"));
        assert!(text.contains("capsim_capacity_shortfalls_total{resource=\"cpu\"}"));
    }
}
