use async_trait::async_trait;
use chrono::Utc;
use http::Request;
use k8s_openapi::api::core::v1::{Event, Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use kube::{Api, Client, Config};
use serde::Deserialize;

use crate::config::ClusterConfig;
use crate::domain::{
    ContainerStatusRecord, IntOrPercent, LastTerminatedState, NodeRecord, PdbRecord, PodRecord,
    UpgradeEvent, UpgradeEventKind,
};

use super::{ClientError, EventSource, MetricsSource, NodeMetric, NodePodSource, PodEvent, PolicySource};

const AGENTPOOL_LABEL: &str = "agentpool";
const AGENTPOOL_LABEL_FALLBACK: &str = "kubernetes.azure.com/agentpool";

/// Kube-backed implementation of `NodePodSource`, `MetricsSource`,
/// `EventSource`, and `PolicySource` for one cluster. Generalizes a single
/// struct wrapping one `kube::Client` to the four capability traits this
/// system needs.
///
/// Construction (credential acquisition, context load) is the one blocking
/// step; callers go through `ClientFactory` for the guarded, lazy,
/// exactly-once construction. Every method here is itself a
/// blocking kube-rs call offloaded onto the tokio reactor's own async I/O —
/// no additional `spawn_blocking` is needed because `kube::Client` is
/// natively async.
pub struct KubeApiClient {
    client: Client,
    cluster_id: String,
}

impl KubeApiClient {
    pub async fn connect(cluster: &ClusterConfig) -> Result<Self, ClientError> {
        let kube_config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
            context: Some(cluster.kube_context.clone()),
            ..Default::default()
        })
        .await
        .map_err(|e| ClientError::CoreApi(format!("load kube-context {}: {}", cluster.kube_context, redact_kube_error(&e))))?;
        let client = Client::try_from(kube_config)
            .map_err(|e| ClientError::CoreApi(format!("build client: {}", redact_kube_error(&e))))?;
        Ok(Self {
            client,
            cluster_id: cluster.cluster_id.clone(),
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn events(&self, namespace: Option<&str>) -> Api<Event> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn pdbs(&self) -> Api<PodDisruptionBudget> {
        Api::all(self.client.clone())
    }
}

/// Strip anything that looks like an SDK error-type name or internal detail;
/// the caller still gets a readable, scrubbable message.
fn redact_kube_error(e: &kube::Error) -> String {
    format!("{}", e).replace("kube::Error::", "")
}

fn parse_cpu_quantity(q: Option<&Quantity>) -> i64 {
    q.and_then(|q| parse_cpu_str(&q.0)).unwrap_or(0)
}

fn parse_memory_quantity(q: Option<&Quantity>) -> i64 {
    q.and_then(|q| parse_memory_str(&q.0)).unwrap_or(0)
}

/// Parse CPU quantity string (e.g. "500m", "1") to millicores.
pub fn parse_cpu_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(m) = s.strip_suffix('m') {
        return m.parse::<i64>().ok();
    }
    s.parse::<f64>().ok().map(|n| (n * 1000.0) as i64)
}

/// Parse memory quantity string (e.g. "256Mi", "1Gi") to bytes.
pub fn parse_memory_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace('i', "");
    let (num_str, unit): (&str, i64) = if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('T') {
        (n, 1024_i64 * 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('P') {
        (n, 1024_i64 * 1024 * 1024 * 1024 * 1024)
    } else {
        return s.parse::<i64>().ok();
    };
    num_str.parse::<i64>().ok().map(|n| n * unit)
}

fn int_or_string_to_int_or_percent(v: &IntOrString) -> IntOrPercent {
    match v {
        IntOrString::Int(n) => IntOrPercent::Int(*n as i64),
        IntOrString::String(s) => {
            let pct = s.trim_end_matches('%').parse::<f64>().unwrap_or(0.0);
            IntOrPercent::Percent(pct)
        }
    }
}

#[async_trait]
impl NodePodSource for KubeApiClient {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, ClientError> {
        let list = self
            .nodes()
            .list(&ListParams::default())
            .await
            .map_err(|e| ClientError::CoreApi(redact_kube_error(&e)))?;

        let mut out = Vec::with_capacity(list.items.len());
        for node in list.items {
            let name = node.metadata.name.clone().unwrap_or_default();
            let labels = node.metadata.labels.clone().unwrap_or_default();
            let pool = labels
                .get(AGENTPOOL_LABEL)
                .or_else(|| labels.get(AGENTPOOL_LABEL_FALLBACK))
                .cloned();
            let schedulable = !node
                .spec
                .as_ref()
                .and_then(|s| s.unschedulable)
                .unwrap_or(false);
            let (alloc_cpu, alloc_mem) = node
                .status
                .as_ref()
                .and_then(|s| s.allocatable.as_ref())
                .map(|a| (parse_cpu_quantity(a.get("cpu")), parse_memory_quantity(a.get("memory"))))
                .unwrap_or((0, 0));
            let version = node
                .status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kubelet_version.clone())
                .unwrap_or_default();
            let created_at = node
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .unwrap_or_else(Utc::now);

            out.push(NodeRecord {
                name,
                pool,
                schedulable,
                allocatable_cpu_millicores: alloc_cpu,
                allocatable_memory_bytes: alloc_mem,
                version,
                created_at,
            });
        }
        Ok(out)
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<PodRecord>, ClientError> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClientError::CoreApi(redact_kube_error(&e)))?;

        let mut out = Vec::with_capacity(list.items.len());
        for pod in list.items {
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let name = pod.metadata.name.clone().unwrap_or_default();
            let labels = pod
                .metadata
                .labels
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect::<Vec<_>>();
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let node = pod.spec.as_ref().and_then(|s| s.node_name.clone());

            let mut cpu_request = 0i64;
            let mut mem_request = 0i64;
            if let Some(spec) = &pod.spec {
                for c in &spec.containers {
                    if let Some(requests) = c.resources.as_ref().and_then(|r| r.requests.as_ref()) {
                        cpu_request += parse_cpu_quantity(requests.get("cpu"));
                        mem_request += parse_memory_quantity(requests.get("memory"));
                    }
                }
            }

            let mut containers = Vec::new();
            if let Some(status) = &pod.status {
                let statuses = status
                    .init_container_statuses
                    .iter()
                    .flatten()
                    .chain(status.container_statuses.iter().flatten());
                for cs in statuses {
                    let waiting_reason = cs.state.as_ref().and_then(|s| s.waiting.as_ref()).and_then(|w| w.reason.clone());
                    let last_terminated = cs.last_state.as_ref().and_then(|s| s.terminated.as_ref()).map(|t| LastTerminatedState {
                        reason: t.reason.clone(),
                        message: t.message.clone(),
                    });
                    let memory_limit_bytes = pod
                        .spec
                        .as_ref()
                        .and_then(|s| s.containers.iter().find(|c| c.name == cs.name))
                        .and_then(|c| c.resources.as_ref())
                        .and_then(|r| r.limits.as_ref())
                        .and_then(|l| l.get("memory"))
                        .map(parse_memory_quantity);

                    containers.push(ContainerStatusRecord {
                        name: cs.name.clone(),
                        ready: cs.ready,
                        restart_count: cs.restart_count,
                        last_terminated,
                        waiting_reason,
                        memory_limit_bytes,
                    });
                }
            }

            let owner_references = pod
                .metadata
                .owner_references
                .iter()
                .flatten()
                .map(|o| format!("{}/{}", o.kind, o.name))
                .collect();

            out.push(PodRecord {
                namespace,
                name,
                phase,
                node,
                containers,
                owner_references,
                cpu_request_millicores: cpu_request,
                memory_request_bytes: mem_request,
                labels,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl MetricsSource for KubeApiClient {
    async fn list_node_metrics(&self) -> Result<Vec<NodeMetric>, ClientError> {
        let req = Request::builder()
            .method("GET")
            .uri("/apis/metrics.k8s.io/v1beta1/nodes")
            .body(vec![])
            .map_err(|e| {
                log::warn!("building metrics-server request failed: {e}");
                ClientError::MetricsUnavailable
            })?;
        let list: NodeMetricsList = self
            .client
            .request(req)
            .await
            .map_err(|_| ClientError::MetricsUnavailable)?;

        Ok(list
            .items
            .into_iter()
            .map(|m| {
                let cpu = parse_cpu_str(m.usage.get("cpu").map(String::as_str).unwrap_or("0")).unwrap_or(0);
                let memory = parse_memory_str(m.usage.get("memory").map(String::as_str).unwrap_or("0")).unwrap_or(0);
                NodeMetric {
                    name: m.metadata.name,
                    cpu_millicores: cpu,
                    memory_bytes: memory,
                }
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct NodeMetricsList {
    items: Vec<NodeMetricsItem>,
}

#[derive(Deserialize)]
struct NodeMetricsItem {
    metadata: NodeMetricsMeta,
    usage: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
struct NodeMetricsMeta {
    name: String,
}

#[async_trait]
impl EventSource for KubeApiClient {
    async fn list_node_events(&self) -> Result<Vec<UpgradeEvent>, ClientError> {
        let list = self
            .events(None)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClientError::EventsApi(redact_kube_error(&e)))?;

        let mut out = Vec::new();
        for ev in list.items {
            let involved = &ev.involved_object;
            if involved.kind.as_deref() != Some("Node") {
                continue;
            }
            let node = match &involved.name {
                Some(n) => n.clone(),
                None => continue,
            };
            let reason = ev.reason.as_deref().unwrap_or("");
            let kind = match reason {
                "NodeUpgrade" | "Upgrade" | "Surge" => UpgradeEventKind::NodeUpgrade,
                "NodeReady" | "Ready" => UpgradeEventKind::NodeReady,
                "NodeNotReady" | "NotReady" => UpgradeEventKind::NodeNotReady,
                _ => continue,
            };
            let timestamp = ev
                .last_timestamp
                .as_ref()
                .or(ev.first_timestamp.as_ref())
                .map(|t| t.0)
                .unwrap_or_else(Utc::now);
            out.push(UpgradeEvent { kind, node, timestamp });
        }
        out.sort_by(|a, b| a.node.cmp(&b.node).then(a.timestamp.cmp(&b.timestamp)));
        Ok(out)
    }

    async fn list_pod_events(&self, namespace: Option<&str>) -> Result<Vec<PodEvent>, ClientError> {
        let list = self
            .events(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClientError::EventsApi(redact_kube_error(&e)))?;

        let mut out = Vec::new();
        for ev in list.items {
            let involved = &ev.involved_object;
            if involved.kind.as_deref() != Some("Pod") {
                continue;
            }
            let pod_name = match &involved.name {
                Some(n) => n.clone(),
                None => continue,
            };
            let namespace = involved.namespace.clone().unwrap_or_default();
            let timestamp = ev
                .last_timestamp
                .as_ref()
                .or(ev.first_timestamp.as_ref())
                .map(|t| t.0)
                .unwrap_or_else(Utc::now);
            out.push(PodEvent {
                namespace,
                pod_name,
                reason: ev.reason.clone().unwrap_or_default(),
                message: ev.message.clone().unwrap_or_default(),
                timestamp,
            });
        }
        Ok(out)
    }
}


#[async_trait]
impl PolicySource for KubeApiClient {
    async fn list_pdbs(&self) -> Result<Vec<PdbRecord>, ClientError> {
        let list = self
            .pdbs()
            .list(&ListParams::default())
            .await
            .map_err(|e| ClientError::PolicyApi(redact_kube_error(&e)))?;

        let mut out = Vec::with_capacity(list.items.len());
        for pdb in list.items {
            let namespace = pdb.metadata.namespace.clone().unwrap_or_default();
            let name = pdb.metadata.name.clone().unwrap_or_default();
            let selector = pdb
                .spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .and_then(|s| s.match_labels.as_ref())
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            let min_available = pdb
                .spec
                .as_ref()
                .and_then(|s| s.min_available.as_ref())
                .map(int_or_string_to_int_or_percent);
            let max_unavailable = pdb
                .spec
                .as_ref()
                .and_then(|s| s.max_unavailable.as_ref())
                .map(int_or_string_to_int_or_percent);
            let status = pdb.status;
            let current_ready_replicas = status.as_ref().map(|s| s.current_healthy as i64).unwrap_or(0);
            let desired_replicas = status.as_ref().map(|s| s.desired_healthy as i64).unwrap_or(0);
            let disruptions_allowed = status.as_ref().map(|s| s.disruptions_allowed as i64).unwrap_or(0);

            out.push(PdbRecord {
                namespace,
                name,
                selector,
                min_available,
                max_unavailable,
                current_ready_replicas,
                desired_replicas,
                disruptions_allowed,
            });
        }
        Ok(out)
    }
}
