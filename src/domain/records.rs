use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node as read from the cluster for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    /// Pool label, resolved from `agentpool` with fallback to
    /// `kubernetes.azure.com/agentpool`; `None` when neither is present.
    pub pool: Option<String>,
    pub schedulable: bool,
    pub allocatable_cpu_millicores: i64,
    pub allocatable_memory_bytes: i64,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

/// Last-terminated state of a container, when present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LastTerminatedState {
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatusRecord {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub last_terminated: Option<LastTerminatedState>,
    /// Waiting-state reason (e.g. `CrashLoopBackOff`, `ImagePullBackOff`), if any.
    pub waiting_reason: Option<String>,
    pub memory_limit_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRecord {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub node: Option<String>,
    pub containers: Vec<ContainerStatusRecord>,
    pub owner_references: Vec<String>,
    pub cpu_request_millicores: i64,
    pub memory_request_bytes: i64,
    /// Pod labels, used for PDB selector matching.
    pub labels: Vec<(String, String)>,
}

/// Either a literal integer count or a percentage expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntOrPercent {
    Int(i64),
    Percent(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdbRecord {
    pub namespace: String,
    pub name: String,
    /// Label selector, as a simple key=value list; matched against pod labels.
    pub selector: Vec<(String, String)>,
    pub min_available: Option<IntOrPercent>,
    pub max_unavailable: Option<IntOrPercent>,
    pub current_ready_replicas: i64,
    pub desired_replicas: i64,
    pub disruptions_allowed: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UpgradeEventKind {
    NodeUpgrade,
    NodeReady,
    NodeNotReady,
}

/// A node-upgrade-lifecycle event. Ordering: monotonically sorted
/// per node by `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeEvent {
    pub kind: UpgradeEventKind,
    pub node: String,
    pub timestamp: DateTime<Utc>,
}

/// One completed upgrade run from the control-plane audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalUpgrade {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source_version: String,
    pub target_version: String,
    pub node_count: u32,
    pub aggregate_duration_seconds: i64,
}
