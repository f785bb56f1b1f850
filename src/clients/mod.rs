//! API client interfaces: five capability traits, each
//! parameterized by a resolved `ClusterConfig`, plus the concrete
//! kube-backed and REST-backed implementations and the lazy per-cluster
//! factory that constructs them.

mod cache;
mod control_plane;
mod factory;
mod kube_client;

pub use cache::CachingControlPlaneSource;
pub use control_plane::AksControlPlaneClient;
pub use factory::ClientFactory;
pub use kube_client::KubeApiClient;

use async_trait::async_trait;

use crate::domain::{HistoricalUpgrade, NodeRecord, PdbRecord, PodRecord, UpgradeEvent};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("core API unreachable: {0}")]
    CoreApi(String),
    #[error("metrics endpoint not reachable")]
    MetricsUnavailable,
    #[error("events API error: {0}")]
    EventsApi(String),
    #[error("policy API error: {0}")]
    PolicyApi(String),
    #[error("managed-cloud control plane API error: {0}")]
    CloudApi(String),
    #[error("cloud audit log error: {0}")]
    CloudAuditLog(String),
    #[error("cancelled by client")]
    Cancelled,
}

impl ClientError {
    /// Stable `source` tag for the `ToolError` taxonomy.
    pub fn source_tag(&self) -> &'static str {
        match self {
            ClientError::CoreApi(_) => "core-api",
            ClientError::MetricsUnavailable => "metrics-api",
            ClientError::EventsApi(_) => "events-api",
            ClientError::PolicyApi(_) => "policy-api",
            ClientError::CloudApi(_) => "cloud-api",
            ClientError::CloudAuditLog(_) => "cloud-audit-log",
            ClientError::Cancelled => "cancelled",
        }
    }
}

/// Node and pod listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodePodSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, ClientError>;
    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodRecord>, ClientError>;
}

/// Per-node CPU/memory usage. Fails with a
/// distinguishable `ClientError::MetricsUnavailable` so the pressure
/// classifier can degrade gracefully.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn list_node_metrics(&self) -> Result<Vec<NodeMetric>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct NodeMetric {
    pub name: String,
    pub cpu_millicores: i64,
    pub memory_bytes: i64,
}

/// Node and pod lifecycle events.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn list_node_events(&self) -> Result<Vec<UpgradeEvent>, ClientError>;
    async fn list_pod_events(&self, namespace: Option<&str>) -> Result<Vec<PodEvent>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct PodEvent {
    pub namespace: String,
    pub pod_name: String,
    pub reason: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Pod disruption budgets.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn list_pdbs(&self) -> Result<Vec<PdbRecord>, ClientError>;
}

/// Managed-cloud control plane: versions, upgrade profile, audit-log history.
#[async_trait]
pub trait ControlPlaneSource: Send + Sync {
    async fn describe_cluster(&self) -> Result<ClusterDescription, ClientError>;
    async fn upgrade_profile(&self) -> Result<UpgradeProfile, ClientError>;
    async fn historical_upgrades(&self, limit: u32) -> Result<Vec<HistoricalUpgrade>, ClientError>;
}

#[derive(Debug, Clone)]
pub struct PoolVersion {
    pub pool_name: String,
    pub version: String,
    pub is_upgrading: bool,
}

#[derive(Debug, Clone)]
pub struct ClusterDescription {
    /// `None` when the control plane is mid-upgrade and has not reported a
    /// current version yet.
    pub control_plane_version: Option<String>,
    pub pool_versions: Vec<PoolVersion>,
    pub target_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpgradeVersionSupport {
    pub version: String,
    pub end_of_support: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct UpgradeProfile {
    pub available_versions: Vec<String>,
    pub support_status: Vec<UpgradeVersionSupport>,
}

/// Everything a classifier needs for one cluster, bundled so the fan-out
/// engine hands each cluster task a single object.
pub struct ClusterClients {
    pub node_pods: std::sync::Arc<dyn NodePodSource>,
    pub metrics: std::sync::Arc<dyn MetricsSource>,
    pub events: std::sync::Arc<dyn EventSource>,
    pub policy: std::sync::Arc<dyn PolicySource>,
    pub control_plane: std::sync::Arc<dyn ControlPlaneSource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises `NodePodSource` through its `mockall`-generated double
    /// rather than a hand-written fake, so a future consumer of this trait
    /// (anything gated behind `Arc<dyn NodePodSource>`) can be driven by
    /// expectation-based tests instead of a bespoke stub type.
    #[tokio::test]
    async fn mock_node_pod_source_honors_configured_expectations() {
        let mut mock = MockNodePodSource::new();
        mock.expect_list_nodes().returning(|| {
            Ok(vec![NodeRecord {
                name: "n1".to_string(),
                pool: Some("pool-a".to_string()),
                schedulable: true,
                allocatable_cpu_millicores: 1000,
                allocatable_memory_bytes: 1_000_000,
                version: "1.29.2".to_string(),
                created_at: chrono::Utc::now(),
            }])
        });
        mock.expect_list_pods().returning(|_| Ok(vec![]));

        let source: std::sync::Arc<dyn NodePodSource> = std::sync::Arc::new(mock);
        let nodes = source.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "n1");
        assert!(source.list_pods(None).await.unwrap().is_empty());
    }
}
