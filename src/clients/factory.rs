use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ClusterConfig;

use super::{AksControlPlaneClient, CachingControlPlaneSource, ClientError, ClusterClients, KubeApiClient};

/// Lazy, per-cluster, exactly-once client construction.
///
/// Construction talks to the real cluster (kubeconfig context load, TLS
/// handshake) and is worth doing at most once per cluster per process
/// lifetime. Two concurrent first calls for the same cluster must not race
/// into duplicate or half-initialized clients, so each cluster slot is
/// guarded by its own `tokio::sync::Mutex` holding an `Option` — the first
/// caller to acquire the lock builds and fills it in, everyone else (whether
/// they arrive before or after) finds it already populated.
pub struct ClientFactory {
    slots: Mutex<HashMap<String, Arc<Mutex<Option<Arc<ClusterClients>>>>>>,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return this cluster's `ClusterClients`, constructing it on first use.
    pub async fn get(&self, cluster: &ClusterConfig) -> Result<Arc<ClusterClients>, ClientError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(
                slots
                    .entry(cluster.cluster_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        let mut guard = slot.lock().await;
        if let Some(clients) = guard.as_ref() {
            return Ok(Arc::clone(clients));
        }

        let kube_client = Arc::new(KubeApiClient::connect(cluster).await?);
        let control_plane = Arc::new(CachingControlPlaneSource::new(AksControlPlaneClient::new(cluster)));
        let clients = Arc::new(ClusterClients {
            node_pods: kube_client.clone(),
            metrics: kube_client.clone(),
            events: kube_client.clone(),
            policy: kube_client,
            control_plane,
        });
        *guard = Some(Arc::clone(&clients));
        Ok(clients)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
