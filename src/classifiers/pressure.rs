//! Node-pool pressure classifier.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::clients::NodeMetric;
use crate::domain::{NodeRecord, PodRecord, Pressure, ThresholdBundle, ToolError};

const UNKNOWN_POOL: &str = "unknown-pool";

#[derive(Debug, Clone, Serialize)]
pub struct PoolPressure {
    pub pool: String,
    pub level: Pressure,
    pub cpu_request_ratio: f64,
    pub memory_request_ratio: f64,
    /// Observed usage ratio from `MetricsSource`, supplementing the
    /// request-ratio above when metrics were reachable.
    pub cpu_usage_ratio: Option<f64>,
    pub memory_usage_ratio: Option<f64>,
    pub pending_pods: u32,
    pub node_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PressureReport {
    pub cluster: String,
    pub pools: Vec<PoolPressure>,
    pub cluster_level_pending_pods: u32,
    pub summary: String,
}

#[derive(Default)]
struct PoolAccumulator {
    allocatable_cpu_millicores: i64,
    allocatable_memory_bytes: i64,
    requested_cpu_millicores: i64,
    requested_memory_bytes: i64,
    pending_pods: u32,
    node_count: usize,
}

fn severity(ratio_pct: f64, warning: f64, critical: f64) -> Pressure {
    if ratio_pct >= critical {
        Pressure::Critical
    } else if ratio_pct >= warning {
        Pressure::Warning
    } else {
        Pressure::Ok
    }
}

/// Classify pool pressure for one cluster.
///
/// `metrics` is `None` when the metrics endpoint failed; in that case the
/// caller is responsible for attaching the `ToolError(source="metrics-api")`
/// to the envelope (step 5) — this function only needs to know whether
/// usage data is available, so it degrades to requests-vs-allocatable.
pub fn classify(
    cluster_id: &str,
    nodes: &[NodeRecord],
    pods: &[PodRecord],
    metrics: Option<&[NodeMetric]>,
    thresholds: &ThresholdBundle,
) -> (PressureReport, Vec<ToolError>) {
    let mut warnings = Vec::new();
    let mut pools: BTreeMap<String, PoolAccumulator> = BTreeMap::new();
    let mut node_to_pool: BTreeMap<&str, String> = BTreeMap::new();
    let mut saw_missing_pool_label = false;

    for node in nodes {
        let pool_name = node.pool.clone().unwrap_or_else(|| {
            saw_missing_pool_label = true;
            UNKNOWN_POOL.to_string()
        });
        node_to_pool.insert(node.name.as_str(), pool_name.clone());
        let acc = pools.entry(pool_name).or_default();
        acc.allocatable_cpu_millicores += node.allocatable_cpu_millicores;
        acc.allocatable_memory_bytes += node.allocatable_memory_bytes;
        acc.node_count += 1;
    }

    if saw_missing_pool_label {
        warnings.push(ToolError::new(
            "config",
            cluster_id,
            "one or more nodes have no pool label; grouped as unknown-pool",
        ));
    }

    let mut cluster_level_pending = 0u32;
    for pod in pods {
        match &pod.node {
            Some(node_name) => {
                if let Some(pool_name) = node_to_pool.get(node_name.as_str()) {
                    let acc = pools.entry(pool_name.clone()).or_default();
                    acc.requested_cpu_millicores += pod.cpu_request_millicores;
                    acc.requested_memory_bytes += pod.memory_request_bytes;
                    if pod.phase == "Pending" {
                        acc.pending_pods += 1;
                    }
                }
            }
            None => {
                // Unscheduled: attribute CPU/memory to nothing, but still
                // count as cluster-level pending.
                if pod.phase == "Pending" {
                    cluster_level_pending += 1;
                }
            }
        }
    }

    let mut pool_nodes: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (node_name, pool_name) in &node_to_pool {
        pool_nodes.entry(pool_name.as_str()).or_default().push(node_name);
    }

    let mut pool_reports = Vec::new();
    for (pool_name, acc) in pools {
        let cpu_ratio = if acc.allocatable_cpu_millicores > 0 {
            acc.requested_cpu_millicores as f64 / acc.allocatable_cpu_millicores as f64 * 100.0
        } else {
            0.0
        };
        let mem_ratio = if acc.allocatable_memory_bytes > 0 {
            acc.requested_memory_bytes as f64 / acc.allocatable_memory_bytes as f64 * 100.0
        } else {
            0.0
        };

        let (cpu_usage_ratio, memory_usage_ratio) = match metrics {
            Some(metric_list) => {
                let members = pool_nodes.get(pool_name.as_str()).cloned().unwrap_or_default();
                let (used_cpu, used_mem) = metric_list
                    .iter()
                    .filter(|m| members.contains(&m.name.as_str()))
                    .fold((0i64, 0i64), |(cpu, mem), m| (cpu + m.cpu_millicores, mem + m.memory_bytes));
                let cpu = if acc.allocatable_cpu_millicores > 0 {
                    Some(used_cpu as f64 / acc.allocatable_cpu_millicores as f64)
                } else {
                    Some(0.0)
                };
                let mem = if acc.allocatable_memory_bytes > 0 {
                    Some(used_mem as f64 / acc.allocatable_memory_bytes as f64)
                } else {
                    Some(0.0)
                };
                (cpu, mem)
            }
            None => (None, None),
        };

        let cpu_level = severity(cpu_ratio, thresholds.cpu_warning_pct, thresholds.cpu_critical_pct);
        let mem_level = severity(mem_ratio, thresholds.memory_warning_pct, thresholds.memory_critical_pct);
        let pending_level = pending_count_severity(
            acc.pending_pods,
            thresholds.pending_pods_warning,
            thresholds.pending_pods_critical,
        );
        let level = cpu_level.max(mem_level).max(pending_level);

        pool_reports.push(PoolPressure {
            pool: pool_name,
            level,
            cpu_request_ratio: cpu_ratio / 100.0,
            memory_request_ratio: mem_ratio / 100.0,
            cpu_usage_ratio,
            memory_usage_ratio,
            pending_pods: acc.pending_pods,
            node_count: acc.node_count,
        });
    }

    let under_pressure = pool_reports.iter().filter(|p| p.level != Pressure::Ok).count();
    let summary = format!(
        "{} of {} node pools in {} are under pressure",
        under_pressure,
        pool_reports.len(),
        cluster_id
    );

    (
        PressureReport {
            cluster: cluster_id.to_string(),
            pools: pool_reports,
            cluster_level_pending_pods: cluster_level_pending,
            summary,
        },
        warnings,
    )
}

/// Pending-pod-count severity: both `warning` and `critical` use a
/// non-strict (`>=`) comparison against the configured bound.
fn pending_count_severity(count: u32, warning: u32, critical: u32) -> Pressure {
    if count >= critical {
        Pressure::Critical
    } else if count >= warning {
        Pressure::Warning
    } else {
        Pressure::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(name: &str, pool: Option<&str>, cpu: i64, mem: i64) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            pool: pool.map(String::from),
            schedulable: true,
            allocatable_cpu_millicores: cpu,
            allocatable_memory_bytes: mem,
            version: "1.29.2".to_string(),
            created_at: Utc::now(),
        }
    }

    fn pod(node: Option<&str>, phase: &str, cpu_req: i64, mem_req: i64) -> PodRecord {
        PodRecord {
            namespace: "default".to_string(),
            name: "pod".to_string(),
            phase: phase.to_string(),
            node: node.map(String::from),
            containers: vec![],
            owner_references: vec![],
            cpu_request_millicores: cpu_req,
            memory_request_bytes: mem_req,
            labels: vec![],
        }
    }

    #[test]
    fn cpu_at_exactly_75_percent_is_warning() {
        let nodes = vec![node("n1", Some("pool-a"), 1000, 1_000_000)];
        let pods = vec![pod(Some("n1"), "Running", 750, 0)];
        let (report, _) = classify("dev-eastus", &nodes, &pods, None, &ThresholdBundle::default());
        assert_eq!(report.pools[0].level, Pressure::Warning);
    }

    #[test]
    fn cpu_at_90_percent_is_critical() {
        let nodes = vec![node("n1", Some("pool-a"), 1000, 1_000_000)];
        let pods = vec![pod(Some("n1"), "Running", 900, 0)];
        let (report, _) = classify("dev-eastus", &nodes, &pods, None, &ThresholdBundle::default());
        assert_eq!(report.pools[0].level, Pressure::Critical);
    }

    #[test]
    fn cpu_just_under_warning_is_ok() {
        let nodes = vec![node("n1", Some("pool-a"), 100_000, 1_000_000)];
        let pods = vec![pod(Some("n1"), "Running", 74_999, 0)];
        let (report, _) = classify("dev-eastus", &nodes, &pods, None, &ThresholdBundle::default());
        assert_eq!(report.pools[0].level, Pressure::Ok);
    }

    #[test]
    fn missing_pool_label_groups_as_unknown_and_warns() {
        let nodes = vec![node("n1", None, 1000, 1_000_000)];
        let pods = vec![];
        let (report, warnings) = classify("dev-eastus", &nodes, &pods, None, &ThresholdBundle::default());
        assert_eq!(report.pools[0].pool, UNKNOWN_POOL);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unscheduled_pending_pod_counts_at_cluster_level_not_pool() {
        let nodes = vec![node("n1", Some("pool-a"), 1000, 1_000_000)];
        let pods = vec![pod(None, "Pending", 0, 0)];
        let (report, _) = classify("dev-eastus", &nodes, &pods, None, &ThresholdBundle::default());
        assert_eq!(report.pools[0].pending_pods, 0);
        assert_eq!(report.cluster_level_pending_pods, 1);
    }
}
