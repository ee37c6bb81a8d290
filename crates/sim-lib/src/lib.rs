//! Resource accounting library for the scheduling simulator
//!
//! This crate provides the core functionality for:
//! - Resource quantities and open-keyed resource vectors
//! - Predictive and counting accounting strategies
//! - Double-counting protection for pod bindings
//! - Capacity snapshot queries and drift reconciliation
//! - The object store contract and an in-memory store
//! - Metrics and structured logging

pub mod config;
pub mod models;
pub mod observability;
pub mod resources;
pub mod snapshot;
pub mod store;
pub mod strategy;

pub use config::{OvercommitPolicy, StrategyConfig};
pub use models::*;
pub use observability::{render_metrics, StrategyMetrics, StructuredLogger};
pub use resources::{Quantity, ResourceList};
pub use snapshot::{CapacitySnapshot, NodeCapacity, Reconciliation};
pub use store::{InMemoryStore, ObjectStore, StoreError};
pub use strategy::{Admission, Release, Strategy, StrategyError, StrategyKind};
