//! Pod-disruption-budget risk engine: preflight and live modes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{IntOrPercent, NodeRecord, PdbRecord, PodRecord, UpgradeEvent};

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedPdb {
    pub namespace: String,
    pub name: String,
    pub ready_replicas: i64,
    pub desired_replicas: i64,
    pub rule: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub cluster: String,
    pub flagged: Vec<FlaggedPdb>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveBlock {
    pub pdb_name: String,
    pub pdb_namespace: String,
    pub pod_name: String,
    pub node_name: String,
    pub block_duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveReport {
    pub cluster: String,
    pub blocks: Vec<LiveBlock>,
    pub no_active_blocks: bool,
}

fn resolve_int_or_percent(value: &IntOrPercent, desired: i64) -> i64 {
    match value {
        IntOrPercent::Int(n) => *n,
        IntOrPercent::Percent(pct) => ((pct / 100.0) * desired as f64).ceil() as i64,
    }
}

fn selector_matches(pdb: &PdbRecord, pod_labels: &[(String, String)]) -> bool {
    pdb.selector
        .iter()
        .all(|(k, v)| pod_labels.iter().any(|(pk, pv)| pk == k && pv == v))
}

/// Preflight mode: flag PDBs with no disruption budget left,
/// optionally restricted to PDBs whose selector matches pods on `pool`.
pub fn preflight(
    cluster_id: &str,
    pdbs: &[PdbRecord],
    pool_pod_labels: Option<&[Vec<(String, String)>]>,
) -> PreflightReport {
    let mut flagged = Vec::new();

    for pdb in pdbs {
        if let Some(pool_labels) = pool_pod_labels {
            if !pool_labels.iter().any(|labels| selector_matches(pdb, labels)) {
                continue;
            }
        }

        let rule = if matches!(pdb.max_unavailable, Some(IntOrPercent::Int(0))) {
            Some("max_unavailable == 0".to_string())
        } else if let Some(min_available) = &pdb.min_available {
            let resolved = resolve_int_or_percent(min_available, pdb.desired_replicas);
            if resolved == pdb.current_ready_replicas {
                Some("min_available == ready_replicas".to_string())
            } else {
                None
            }
        } else {
            None
        };

        if let Some(rule) = rule {
            flagged.push(FlaggedPdb {
                namespace: pdb.namespace.clone(),
                name: pdb.name.clone(),
                ready_replicas: pdb.current_ready_replicas,
                desired_replicas: pdb.desired_replicas,
                rule,
            });
        }
    }

    PreflightReport {
        cluster: cluster_id.to_string(),
        flagged,
    }
}

/// Live mode: for every cordoned node, find pods blocked from
/// eviction by a zero-budget PDB, with per-node cordon-duration attribution.
///
/// The event stream carries no dedicated "cordon" event kind; the earliest
/// node-lifecycle event recorded for a node is used as the cordon timestamp
/// approximation (see DESIGN.md for the rationale).
pub fn live(
    cluster_id: &str,
    nodes: &[NodeRecord],
    pods: &[PodRecord],
    pdbs: &[PdbRecord],
    events: &[UpgradeEvent],
    now: DateTime<Utc>,
) -> LiveReport {
    let mut blocks = Vec::new();

    for node in nodes.iter().filter(|n| !n.schedulable) {
        let cordon_time = events
            .iter()
            .filter(|e| e.node == node.name)
            .map(|e| e.timestamp)
            .min();

        for pod in pods.iter().filter(|p| p.node.as_deref() == Some(node.name.as_str())) {
            if let Some(pdb) = pdbs
                .iter()
                .find(|pdb| pdb.namespace == pod.namespace && pdb.disruptions_allowed == 0 && selector_matches(pdb, &pod.labels))
            {
                let block_duration = cordon_time.map(|t| (now - t).num_seconds()).unwrap_or(0);
                blocks.push(LiveBlock {
                    pdb_name: pdb.name.clone(),
                    pdb_namespace: pdb.namespace.clone(),
                    pod_name: pod.name.clone(),
                    node_name: node.name.clone(),
                    block_duration_seconds: block_duration,
                });
            }
        }
    }

    LiveReport {
        cluster: cluster_id.to_string(),
        no_active_blocks: blocks.is_empty(),
        blocks,
    }
}
