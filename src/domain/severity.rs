use serde::{Deserialize, Serialize};

/// Pool/cluster pressure level, totally ordered `ok < warning < critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Pressure {
    Ok,
    Warning,
    Critical,
}

/// The six-state node-upgrade classifier. The set is exhaustive
/// and closed: every node gets exactly one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Upgraded,
    Upgrading,
    Cordoned,
    PdbBlocked,
    Pending,
    Stalled,
}

/// Pod-failure-reason taxonomy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Scheduling,
    Runtime,
    Registry,
    Config,
    Unknown,
}

impl FailureCategory {
    /// Classify a waiting/terminated container reason into a failure
    /// category.
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "Unschedulable" | "PodFitsResources" => FailureCategory::Scheduling,
            "OOMKilled" | "CrashLoopBackOff" | "Error" => FailureCategory::Runtime,
            "ImagePullBackOff" | "ErrImagePull" => FailureCategory::Registry,
            "CreateContainerConfigError" => FailureCategory::Config,
            _ => FailureCategory::Unknown,
        }
    }
}
