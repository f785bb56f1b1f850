//! Upgrade-progress classifier — the most intricate classifier:
//! a six-state per-node machine, per-node PDB attribution, pool-level
//! counters and duration estimation, anomaly suppression, and a
//! pod-transitions rollup.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classifiers::pdb_risk::LiveBlock;
use crate::domain::{FailureCategory, NodeRecord, NodeState, PodRecord, ThresholdBundle, UpgradeEvent, UpgradeEventKind};

const MAX_AFFECTED_PODS: usize = 20;
const INCLUDED_STATES: [NodeState; 4] =
    [NodeState::Cordoned, NodeState::Upgrading, NodeState::PdbBlocked, NodeState::Stalled];

#[derive(Debug, Clone, Serialize)]
pub struct NodeProgress {
    pub name: String,
    pub state: NodeState,
    pub blocking_pdb: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodTransitions {
    pub pending_count: usize,
    pub failed_count: usize,
    pub by_category: BTreeMap<FailureCategory, usize>,
    pub total_affected: usize,
    pub affected_pods: Vec<AffectedPod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AffectedPod {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub node: String,
    pub category: FailureCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeProgressReport {
    pub cluster: String,
    pub upgrade_in_progress: bool,
    pub nodes: Vec<NodeProgress>,
    pub total_nodes: Option<usize>,
    pub upgraded_nodes: Option<usize>,
    pub remaining_nodes: Option<usize>,
    pub elapsed_seconds: Option<i64>,
    pub estimated_remaining_seconds: Option<f64>,
    pub anomaly: Option<bool>,
    pub pod_transitions: Option<PodTransitions>,
    pub summary: String,
}

fn latest_event<'a>(events: &'a [UpgradeEvent], node: &str) -> Option<&'a UpgradeEvent> {
    events.iter().filter(|e| e.node == node).max_by_key(|e| e.timestamp)
}

fn earliest_upgrade_event(events: &[UpgradeEvent], node: &str) -> Option<DateTime<Utc>> {
    events
        .iter()
        .filter(|e| e.node == node && e.kind == UpgradeEventKind::NodeUpgrade)
        .map(|e| e.timestamp)
        .min()
}

fn has_ready_after_upgrade(events: &[UpgradeEvent], node: &str, upgrade_started: DateTime<Utc>) -> bool {
    events
        .iter()
        .any(|e| e.node == node && e.kind == UpgradeEventKind::NodeReady && e.timestamp > upgrade_started)
}

/// Attribute a PDB block to a node: per-node match first. The fallback only
/// fires for a block that names a node outside `pool_nodes` entirely (data
/// the PDB engine recorded for a node this call wasn't given) — it never
/// steals another in-pool node's exact match just because `blocks` is
/// non-empty.
fn blocking_pdb_for<'a>(blocks: &'a [LiveBlock], node: &str, pool_nodes: &[NodeRecord]) -> Option<&'a LiveBlock> {
    if let Some(b) = blocks.iter().find(|b| b.node_name == node) {
        return Some(b);
    }
    blocks
        .iter()
        .find(|b| !pool_nodes.iter().any(|n| n.name == b.node_name))
}

fn classify_node(
    node: &NodeRecord,
    target_version: Option<&str>,
    events: &[UpgradeEvent],
    blocks: &[LiveBlock],
    pool_nodes: &[NodeRecord],
    anomaly_threshold_minutes: i64,
    now: DateTime<Utc>,
) -> (NodeState, Option<String>) {
    let latest = latest_event(events, &node.name);

    if let Some(ev) = latest {
        if ev.kind == UpgradeEventKind::NodeReady && Some(node.version.as_str()) == target_version {
            return (NodeState::Upgraded, None);
        }
    }

    let upgrade_start = earliest_upgrade_event(events, &node.name);
    if let Some(start) = upgrade_start {
        if !has_ready_after_upgrade(events, &node.name, start) {
            let block = blocking_pdb_for(blocks, &node.name, pool_nodes);
            if !node.schedulable {
                if let Some(b) = block {
                    return (NodeState::PdbBlocked, Some(b.pdb_name.clone()));
                }
            }
            let elapsed_minutes = (now - start).num_minutes();
            if elapsed_minutes > anomaly_threshold_minutes && block.is_none() {
                return (NodeState::Stalled, None);
            }
            return (NodeState::Upgrading, None);
        }
    }

    if !node.schedulable {
        let block = blocking_pdb_for(blocks, &node.name, pool_nodes);
        if let Some(b) = block {
            return (NodeState::PdbBlocked, Some(b.pdb_name.clone()));
        }
        return (NodeState::Cordoned, None);
    }

    (NodeState::Pending, None)
}

/// Classify upgrade progress for one cluster.
///
/// When the control-plane description could not be retrieved, the caller
/// never reaches this function at all — it short-circuits with a synthetic
/// "not in progress" report of its own rather than calling in with a
/// missing `target_version`.
#[allow(clippy::too_many_arguments)]
pub fn classify(
    cluster_id: &str,
    upgrade_in_progress: bool,
    nodes: &[NodeRecord],
    target_version: Option<&str>,
    events: &[UpgradeEvent],
    blocks: &[LiveBlock],
    pods_by_node: &BTreeMap<String, Vec<PodRecord>>,
    thresholds: &ThresholdBundle,
    now: DateTime<Utc>,
) -> UpgradeProgressReport {
    if !upgrade_in_progress {
        return UpgradeProgressReport {
            cluster: cluster_id.to_string(),
            upgrade_in_progress: false,
            nodes: vec![],
            total_nodes: None,
            upgraded_nodes: None,
            remaining_nodes: None,
            elapsed_seconds: None,
            estimated_remaining_seconds: None,
            anomaly: None,
            pod_transitions: None,
            summary: format!("no upgrade in progress for {cluster_id}"),
        };
    }

    let node_progress: Vec<NodeProgress> = nodes
        .iter()
        .map(|n| {
            let (state, blocking_pdb) =
                classify_node(n, target_version, events, blocks, nodes, thresholds.upgrade_anomaly_minutes, now);
            NodeProgress {
                name: n.name.clone(),
                state,
                blocking_pdb,
            }
        })
        .collect();

    let total_nodes = node_progress.len();
    let upgraded_nodes = node_progress.iter().filter(|n| n.state == NodeState::Upgraded).count();
    let remaining_nodes = total_nodes - upgraded_nodes;

    let earliest_run_start = nodes
        .iter()
        .filter_map(|n| earliest_upgrade_event(events, &n.name))
        .min();
    let elapsed_seconds = earliest_run_start.map(|start| (now - start).num_seconds());

    let completed_durations: Vec<i64> = nodes
        .iter()
        .filter_map(|n| {
            let start = earliest_upgrade_event(events, &n.name)?;
            let ready = events
                .iter()
                .filter(|e| e.node == n.name && e.kind == UpgradeEventKind::NodeReady && e.timestamp > start)
                .map(|e| e.timestamp)
                .min()?;
            Some((ready - start).num_seconds())
        })
        .collect();
    let mean_seconds_per_node = if completed_durations.is_empty() {
        0.0
    } else {
        completed_durations.iter().sum::<i64>() as f64 / completed_durations.len() as f64
    };
    let estimated_remaining_seconds = Some(mean_seconds_per_node * remaining_nodes as f64);

    let any_pdb_blocked = node_progress.iter().any(|n| n.state == NodeState::PdbBlocked);
    let anomaly = elapsed_seconds.map(|secs| {
        let exceeded = secs > thresholds.upgrade_anomaly_minutes * 60;
        exceeded && !any_pdb_blocked
    });

    let pod_transitions = Some(build_pod_transitions(&node_progress, pods_by_node));

    let summary = format!(
        "{cluster_id}: {upgraded_nodes}/{total_nodes} nodes upgraded, {remaining_nodes} remaining"
    );

    UpgradeProgressReport {
        cluster: cluster_id.to_string(),
        upgrade_in_progress: true,
        nodes: node_progress,
        total_nodes: Some(total_nodes),
        upgraded_nodes: Some(upgraded_nodes),
        remaining_nodes: Some(remaining_nodes),
        elapsed_seconds,
        estimated_remaining_seconds,
        anomaly,
        pod_transitions,
        summary,
    }
}

fn build_pod_transitions(
    node_progress: &[NodeProgress],
    pods_by_node: &BTreeMap<String, Vec<PodRecord>>,
) -> PodTransitions {
    let included_nodes: Vec<&str> = node_progress
        .iter()
        .filter(|n| INCLUDED_STATES.contains(&n.state))
        .map(|n| n.name.as_str())
        .collect();

    let mut affected = Vec::new();
    let mut by_category: BTreeMap<FailureCategory, usize> = BTreeMap::new();
    let mut pending_count = 0;
    let mut failed_count = 0;

    for node_name in &included_nodes {
        let Some(pods) = pods_by_node.get(*node_name) else { continue };
        for pod in pods {
            let category = crate::classifiers::pod_health::category_for(pod);
            *by_category.entry(category).or_insert(0) += 1;
            if pod.phase == "Pending" {
                pending_count += 1;
            } else if pod.phase == "Failed" {
                failed_count += 1;
            }
            affected.push(AffectedPod {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
                phase: pod.phase.clone(),
                node: (*node_name).to_string(),
                category,
            });
        }
    }

    let total_affected = affected.len();

    affected.sort_by_key(|p| if p.phase == "Failed" { 0 } else { 1 });
    affected.truncate(MAX_AFFECTED_PODS);

    PodTransitions {
        pending_count,
        failed_count,
        by_category,
        total_affected,
        affected_pods: affected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn node(name: &str, version: &str, schedulable: bool) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            pool: Some("nodepool1".to_string()),
            schedulable,
            allocatable_cpu_millicores: 1000,
            allocatable_memory_bytes: 1_000_000,
            version: version.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn node_state_set_is_exhaustive_for_every_node() {
        let nodes = vec![
            node("n1", "1.30.0", true),
            node("n2", "1.29.2", false),
        ];
        let report = classify(
            "dev-eastus",
            true,
            &nodes,
            Some("1.30.0"),
            &[],
            &[],
            &BTreeMap::new(),
            &ThresholdBundle::default(),
            Utc::now(),
        );
        assert_eq!(report.nodes.len(), 2);
    }

    #[test]
    fn stalled_when_elapsed_exceeds_threshold_with_no_pdb_block() {
        let now = Utc::now();
        let nodes = vec![node("n1", "1.29.2", true)];
        let events = vec![UpgradeEvent {
            kind: UpgradeEventKind::NodeUpgrade,
            node: "n1".to_string(),
            timestamp: now - Duration::minutes(75),
        }];
        let report = classify(
            "dev-eastus",
            true,
            &nodes,
            Some("1.30.0"),
            &events,
            &[],
            &BTreeMap::new(),
            &ThresholdBundle::default(),
            now,
        );
        assert_eq!(report.nodes[0].state, NodeState::Stalled);
        assert_eq!(report.anomaly, Some(true));
    }

    #[test]
    fn anomaly_suppressed_when_any_node_pdb_blocked() {
        let now = Utc::now();
        let nodes = vec![node("n1", "1.29.2", true), node("n2", "1.29.2", false)];
        let events = vec![
            UpgradeEvent { kind: UpgradeEventKind::NodeUpgrade, node: "n1".to_string(), timestamp: now - Duration::minutes(75) },
        ];
        let blocks = vec![LiveBlock {
            pdb_name: "pdb-a".to_string(),
            pdb_namespace: "default".to_string(),
            pod_name: "p1".to_string(),
            node_name: "n2".to_string(),
            block_duration_seconds: 100,
        }];
        let report = classify(
            "dev-eastus",
            true,
            &nodes,
            Some("1.30.0"),
            &events,
            &blocks,
            &BTreeMap::new(),
            &ThresholdBundle::default(),
            now,
        );
        assert_eq!(report.anomaly, Some(false));
    }

    #[test]
    fn per_node_pdb_attribution_prefers_node_specific_match() {
        let pool_nodes = vec![node("n1", "1.29.2", false), node("n2", "1.29.2", false)];
        let blocks = vec![
            LiveBlock { pdb_name: "pdb-a".to_string(), pdb_namespace: "default".to_string(), pod_name: "p1".to_string(), node_name: "n1".to_string(), block_duration_seconds: 10 },
            LiveBlock { pdb_name: "pdb-b".to_string(), pdb_namespace: "default".to_string(), pod_name: "p2".to_string(), node_name: "n2".to_string(), block_duration_seconds: 10 },
        ];
        assert_eq!(blocking_pdb_for(&blocks, "n2", &pool_nodes).unwrap().pdb_name, "pdb-b");
        assert_eq!(blocking_pdb_for(&blocks, "n1", &pool_nodes).unwrap().pdb_name, "pdb-a");
    }

    #[test]
    fn unblocked_node_is_not_misattributed_to_another_nodes_pdb_block() {
        // n1 is genuinely blocked by pdb-a. n2 is cordoned for an unrelated
        // reason and never appears in `blocks` at all.
        let pool_nodes = vec![node("n1", "1.29.2", false), node("n2", "1.29.2", false)];
        let blocks = vec![LiveBlock {
            pdb_name: "pdb-a".to_string(),
            pdb_namespace: "default".to_string(),
            pod_name: "p1".to_string(),
            node_name: "n1".to_string(),
            block_duration_seconds: 10,
        }];
        assert_eq!(blocking_pdb_for(&blocks, "n1", &pool_nodes).unwrap().pdb_name, "pdb-a");
        assert!(blocking_pdb_for(&blocks, "n2", &pool_nodes).is_none());
    }

    #[test]
    fn cordoned_node_with_no_matching_block_reports_cordoned_not_pdb_blocked() {
        let now = Utc::now();
        let nodes = vec![node("n1", "1.29.2", false), node("n2", "1.29.2", false)];
        let blocks = vec![LiveBlock {
            pdb_name: "pdb-a".to_string(),
            pdb_namespace: "default".to_string(),
            pod_name: "p1".to_string(),
            node_name: "n1".to_string(),
            block_duration_seconds: 10,
        }];
        let report = classify(
            "dev-eastus",
            true,
            &nodes,
            Some("1.30.0"),
            &[],
            &blocks,
            &BTreeMap::new(),
            &ThresholdBundle::default(),
            now,
        );
        let n2 = report.nodes.iter().find(|n| n.name == "n2").unwrap();
        assert_eq!(n2.state, NodeState::Cordoned);
        assert!(n2.blocking_pdb.is_none());
        let n1 = report.nodes.iter().find(|n| n.name == "n1").unwrap();
        assert_eq!(n1.state, NodeState::PdbBlocked);
        assert_eq!(n1.blocking_pdb.as_deref(), Some("pdb-a"));
    }

    #[test]
    fn no_upgrade_in_progress_nulls_pool_fields() {
        let report = classify(
            "dev-eastus",
            false,
            &[],
            None,
            &[],
            &[],
            &BTreeMap::new(),
            &ThresholdBundle::default(),
            Utc::now(),
        );
        assert!(!report.upgrade_in_progress);
        assert!(report.total_nodes.is_none());
        assert!(report.pod_transitions.is_none());
    }

    #[test]
    fn pod_transitions_excludes_upgraded_and_pending_nodes() {
        let mut pods_by_node = BTreeMap::new();
        pods_by_node.insert(
            "n1".to_string(),
            vec![PodRecord {
                namespace: "default".to_string(),
                name: "p1".to_string(),
                phase: "Failed".to_string(),
                node: Some("n1".to_string()),
                containers: vec![],
                owner_references: vec![],
                cpu_request_millicores: 0,
                memory_request_bytes: 0,
                labels: vec![],
            }],
        );
        let node_progress = vec![
            NodeProgress { name: "n1".to_string(), state: NodeState::Cordoned, blocking_pdb: None },
            NodeProgress { name: "n2".to_string(), state: NodeState::Upgraded, blocking_pdb: None },
        ];
        let transitions = build_pod_transitions(&node_progress, &pods_by_node);
        assert_eq!(transitions.total_affected, 1);
    }

    #[test]
    fn affected_pods_capped_at_twenty_failed_before_pending() {
        let mut pods_by_node = BTreeMap::new();
        let mut pods = Vec::new();
        for i in 0..20 {
            pods.push(PodRecord {
                namespace: "default".to_string(),
                name: format!("pending-{i}"),
                phase: "Pending".to_string(),
                node: Some("n1".to_string()),
                containers: vec![],
                owner_references: vec![],
                cpu_request_millicores: 0,
                memory_request_bytes: 0,
                labels: vec![],
            });
        }
        for i in 0..15 {
            pods.push(PodRecord {
                namespace: "default".to_string(),
                name: format!("failed-{i}"),
                phase: "Failed".to_string(),
                node: Some("n1".to_string()),
                containers: vec![],
                owner_references: vec![],
                cpu_request_millicores: 0,
                memory_request_bytes: 0,
                labels: vec![],
            });
        }
        pods_by_node.insert("n1".to_string(), pods);
        let node_progress = vec![NodeProgress { name: "n1".to_string(), state: NodeState::Cordoned, blocking_pdb: None }];
        let transitions = build_pod_transitions(&node_progress, &pods_by_node);
        assert_eq!(transitions.total_affected, 35);
        assert_eq!(transitions.affected_pods.len(), 20);
        assert!(transitions.affected_pods.iter().take(15).all(|p| p.phase == "Failed"));
    }
}
