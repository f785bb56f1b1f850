use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading cluster map {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing cluster map {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("cluster '{cluster_id}' has an invalid subscription_id: {value}")]
    InvalidSubscriptionId { cluster_id: String, value: String },
    #[error("cluster '{cluster_id}' is missing required field '{field}'")]
    MissingField { cluster_id: String, field: &'static str },
    #[error("cluster map key '{key}' does not match its cluster_id '{cluster_id}'")]
    KeyMismatch { key: String, cluster_id: String },
    #[error("unknown cluster id '{requested}'; valid ids are: {valid}")]
    UnknownCluster { requested: String, valid: String },
}

/// Immutable, validated cluster identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub environment: String,
    pub region: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub cluster_name: String,
    pub kube_context: String,
}

/// Raw shape of one YAML entry, before validation stamps in `cluster_id`.
#[derive(Debug, Deserialize)]
struct RawClusterEntry {
    environment: String,
    region: String,
    subscription_id: String,
    resource_group: String,
    cluster_name: String,
    kube_context: String,
}

/// The sentinel accepted at the tool boundary for "every configured cluster".
pub const ALL_CLUSTERS: &str = "all";

/// Validated mapping from composite cluster ID to `ClusterConfig`.
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    clusters: BTreeMap<String, ClusterConfig>,
}

impl ClusterRegistry {
    pub fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        Self::from_yaml_str(&contents, &path_str)
    }

    pub fn from_yaml_str(contents: &str, path_label: &str) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, RawClusterEntry> =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
                path: path_label.to_string(),
                source,
            })?;

        let mut clusters = BTreeMap::new();
        for (key, entry) in raw {
            let cluster_id = format!("{}-{}", entry.environment, entry.region);
            if cluster_id != key {
                return Err(ConfigError::KeyMismatch {
                    key,
                    cluster_id,
                });
            }
            if Uuid::parse_str(&entry.subscription_id).is_err() {
                return Err(ConfigError::InvalidSubscriptionId {
                    cluster_id,
                    value: entry.subscription_id,
                });
            }
            for (field, value) in [
                ("resource_group", &entry.resource_group),
                ("cluster_name", &entry.cluster_name),
                ("kube_context", &entry.kube_context),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingField {
                        cluster_id,
                        field,
                    });
                }
            }

            clusters.insert(
                cluster_id.clone(),
                ClusterConfig {
                    cluster_id,
                    environment: entry.environment,
                    region: entry.region,
                    subscription_id: entry.subscription_id,
                    resource_group: entry.resource_group,
                    cluster_name: entry.cluster_name,
                    kube_context: entry.kube_context,
                },
            );
        }

        Ok(Self { clusters })
    }

    /// Resolve a single cluster ID, or a structured error listing valid IDs.
    pub fn resolve(&self, cluster_id: &str) -> Result<&ClusterConfig, ConfigError> {
        self.clusters
            .get(cluster_id)
            .ok_or_else(|| ConfigError::UnknownCluster {
                requested: cluster_id.to_string(),
                valid: self.valid_ids_joined(),
            })
    }

    /// Resolve the `cluster` tool argument: either one concrete cluster, or
    /// every configured cluster when it is the `all` sentinel.
    pub fn resolve_target<'a>(
        &'a self,
        cluster_arg: &str,
    ) -> Result<Vec<&'a ClusterConfig>, ConfigError> {
        if cluster_arg == ALL_CLUSTERS {
            Ok(self.clusters.values().collect())
        } else {
            self.resolve(cluster_arg).map(|c| vec![c])
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &ClusterConfig> {
        self.clusters.values()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    fn valid_ids_joined(&self) -> String {
        self.clusters
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
dev-eastus:
  environment: dev
  region: eastus
  subscription_id: "11111111-1111-1111-1111-111111111111"
  resource_group: rg-dev-eastus
  cluster_name: aks-dev-eastus
  kube_context: dev-eastus
staging-westus2:
  environment: staging
  region: westus2
  subscription_id: "22222222-2222-2222-2222-222222222222"
  resource_group: rg-staging-westus2
  cluster_name: aks-staging-westus2
  kube_context: staging-westus2
"#;

    #[test]
    fn loads_and_resolves_by_composite_id() {
        let registry = ClusterRegistry::from_yaml_str(SAMPLE, "test").unwrap();
        assert_eq!(registry.len(), 2);
        let cfg = registry.resolve("dev-eastus").unwrap();
        assert_eq!(cfg.cluster_name, "aks-dev-eastus");
    }

    #[test]
    fn all_sentinel_returns_every_cluster() {
        let registry = ClusterRegistry::from_yaml_str(SAMPLE, "test").unwrap();
        let target = registry.resolve_target("all").unwrap();
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn unknown_cluster_lists_valid_ids() {
        let registry = ClusterRegistry::from_yaml_str(SAMPLE, "test").unwrap();
        let err = registry.resolve("prod-eastus").unwrap_err();
        match err {
            ConfigError::UnknownCluster { valid, .. } => {
                assert!(valid.contains("dev-eastus"));
                assert!(valid.contains("staging-westus2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_subscription_id() {
        let bad = SAMPLE.replace(
            "11111111-1111-1111-1111-111111111111",
            "not-a-uuid",
        );
        let err = ClusterRegistry::from_yaml_str(&bad, "test").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubscriptionId { .. }));
    }

    #[test]
    fn rejects_key_environment_mismatch() {
        let bad = SAMPLE.replace("dev-eastus:", "prod-eastus:");
        let err = ClusterRegistry::from_yaml_str(&bad, "test").unwrap_err();
        assert!(matches!(err, ConfigError::KeyMismatch { .. }));
    }

    #[test]
    fn load_from_yaml_reads_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let registry = ClusterRegistry::load_from_yaml(&path).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn load_from_yaml_reports_io_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.yaml");
        let err = ClusterRegistry::load_from_yaml(&missing).unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert!(path.contains("does-not-exist.yaml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
