use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::ClusterConfig;
use crate::domain::HistoricalUpgrade;

use super::{ClientError, ClusterDescription, ControlPlaneSource, PoolVersion, UpgradeProfile, UpgradeVersionSupport};

/// REST-backed `ControlPlaneSource` for the managed-cloud control plane.
///
/// The managed-cloud SDK itself is out of scope; this talks to the
/// control-plane's resource-manager API over `reqwest` as a thin REST
/// wrapper. `base_url` and the bearer token are both overridable so tests
/// and a future real deployment can point this at a stub or the live API
/// without touching the trait or its callers.
pub struct AksControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    cluster: ClusterConfig,
}

impl AksControlPlaneClient {
    pub fn new(cluster: &ClusterConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: std::env::var("AKSFLEET_ARM_BASE_URL")
                .unwrap_or_else(|_| "https://management.azure.com".to_string()),
            bearer_token: std::env::var("AKSFLEET_ARM_TOKEN").ok(),
            cluster: cluster.clone(),
        }
    }

    fn managed_cluster_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}",
            self.base_url, self.cluster.subscription_id, self.cluster.resource_group, self.cluster.cluster_name
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url).query(&[("api-version", "2024-01-01")]);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[derive(Debug, Deserialize)]
struct ManagedClusterResponse {
    properties: ManagedClusterProperties,
}

#[derive(Debug, Deserialize)]
struct ManagedClusterProperties {
    #[serde(rename = "currentKubernetesVersion")]
    current_kubernetes_version: Option<String>,
    #[serde(rename = "agentPoolProfiles", default)]
    agent_pool_profiles: Vec<AgentPoolProfile>,
}

#[derive(Debug, Deserialize)]
struct AgentPoolProfile {
    name: String,
    #[serde(rename = "currentOrchestratorVersion")]
    current_orchestrator_version: Option<String>,
    #[serde(rename = "orchestratorVersion")]
    orchestrator_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpgradeProfileResponse {
    properties: UpgradeProfileProperties,
}

#[derive(Debug, Deserialize)]
struct UpgradeProfileProperties {
    #[serde(rename = "controlPlaneProfile")]
    control_plane_profile: UpgradeProfileNode,
}

#[derive(Debug, Deserialize)]
struct UpgradeProfileNode {
    upgrades: Option<Vec<UpgradeVersionEntry>>,
}

#[derive(Debug, Deserialize)]
struct UpgradeVersionEntry {
    #[serde(rename = "kubernetesVersion")]
    kubernetes_version: String,
    #[serde(rename = "isPreview", default)]
    is_preview: bool,
    #[serde(rename = "endOfLifeDate")]
    end_of_life_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct HistoricalUpgradeEntry {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(rename = "sourceVersion")]
    source_version: String,
    #[serde(rename = "targetVersion")]
    target_version: String,
    #[serde(rename = "nodeCount")]
    node_count: u32,
}

#[async_trait]
impl ControlPlaneSource for AksControlPlaneClient {
    async fn describe_cluster(&self) -> Result<ClusterDescription, ClientError> {
        let resp: ManagedClusterResponse = self
            .request(&self.managed_cluster_url())
            .send()
            .await
            .map_err(|e| ClientError::CloudApi(format!("describe cluster: {}", e)))?
            .error_for_status()
            .map_err(|e| ClientError::CloudApi(format!("describe cluster: {}", e)))?
            .json()
            .await
            .map_err(|e| ClientError::CloudApi(format!("decode cluster description: {}", e)))?;

        let control_plane_version = resp.properties.current_kubernetes_version;
        let pool_versions = resp
            .properties
            .agent_pool_profiles
            .iter()
            .map(|p| PoolVersion {
                pool_name: p.name.clone(),
                version: p
                    .current_orchestrator_version
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                // A null current version mid-upgrade is itself evidence of an
                // in-flight upgrade, not something to compare against
                // `target_version`.
                is_upgrading: p.current_orchestrator_version.is_none()
                    || p.current_orchestrator_version != p.orchestrator_version,
            })
            .collect::<Vec<_>>();
        let target_version = resp
            .properties
            .agent_pool_profiles
            .iter()
            .find(|p| p.current_orchestrator_version != p.orchestrator_version)
            .and_then(|p| p.orchestrator_version.clone());

        Ok(ClusterDescription {
            control_plane_version,
            pool_versions,
            target_version,
        })
    }

    async fn upgrade_profile(&self) -> Result<UpgradeProfile, ClientError> {
        let url = format!("{}/upgradeProfiles/default", self.managed_cluster_url());
        let resp: UpgradeProfileResponse = self
            .request(&url)
            .send()
            .await
            .map_err(|e| ClientError::CloudApi(format!("upgrade profile: {}", e)))?
            .error_for_status()
            .map_err(|e| ClientError::CloudApi(format!("upgrade profile: {}", e)))?
            .json()
            .await
            .map_err(|e| ClientError::CloudApi(format!("decode upgrade profile: {}", e)))?;

        let entries = resp.properties.control_plane_profile.upgrades.unwrap_or_default();
        let available_versions = entries
            .iter()
            .filter(|e| !e.is_preview)
            .map(|e| e.kubernetes_version.clone())
            .collect();
        let support_status = entries
            .into_iter()
            .map(|e| UpgradeVersionSupport {
                version: e.kubernetes_version,
                end_of_support: e.end_of_life_date,
            })
            .collect();

        Ok(UpgradeProfile {
            available_versions,
            support_status,
        })
    }

    async fn historical_upgrades(&self, limit: u32) -> Result<Vec<HistoricalUpgrade>, ClientError> {
        let url = format!("{}/providers/Microsoft.Insights/eventtypes/management/values", self.base_url);
        let resp = self
            .request(&url)
            .query(&[("$top", limit.to_string())])
            .send()
            .await
            .map_err(|e| ClientError::CloudAuditLog(format!("historical upgrades: {}", e)))?
            .error_for_status()
            .map_err(|e| ClientError::CloudAuditLog(format!("historical upgrades: {}", e)))?
            .json::<Vec<HistoricalUpgradeEntry>>()
            .await
            .map_err(|e| ClientError::CloudAuditLog(format!("decode historical upgrades: {}", e)))?;

        Ok(resp
            .into_iter()
            .take(limit as usize)
            .map(|e| HistoricalUpgrade {
                start: e.start,
                end: e.end,
                source_version: e.source_version,
                target_version: e.target_version,
                node_count: e.node_count,
                aggregate_duration_seconds: (e.end - e.start).num_seconds().max(0),
            })
            .collect())
    }
}
