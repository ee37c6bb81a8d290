//! Accounting configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of extra attempts after a node write conflict
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// What to do when a request exceeds a node's remaining allocatable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OvercommitPolicy {
    /// Clamp the node at zero and report the shortfall
    #[default]
    Clamp,
    /// Refuse the admission and leave the store untouched
    Reject,
}

impl fmt::Display for OvercommitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OvercommitPolicy::Clamp => f.write_str("clamp"),
            OvercommitPolicy::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown overcommit policy {0:?} (expected \"clamp\" or \"reject\")")]
pub struct UnknownPolicy(pub String);

impl FromStr for OvercommitPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clamp" => Ok(OvercommitPolicy::Clamp),
            "reject" => Ok(OvercommitPolicy::Reject),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// Configuration shared by strategies and snapshot queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Extra read-modify-write attempts after a version conflict
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default)]
    pub overcommit: OvercommitPolicy,

    /// Charge one `pods` slot per admitted pod
    #[serde(default)]
    pub count_pod_slots: bool,
}

fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            overcommit: OvercommitPolicy::default(),
            count_pod_slots: false,
        }
    }
}
