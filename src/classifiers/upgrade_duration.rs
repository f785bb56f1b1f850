//! Upgrade-duration engine: current-run per-node timing blended
//! with historical statistics, never mixed in the same statistic.

use serde::Serialize;

use crate::domain::{HistoricalUpgrade, ThresholdBundle, UpgradeEvent, UpgradeEventKind};

#[derive(Debug, Clone, Serialize)]
pub struct CurrentRunStats {
    pub node_count: usize,
    pub min_seconds: i64,
    pub max_seconds: i64,
    pub mean_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalStats {
    pub requested: u32,
    pub returned: usize,
    pub mean_seconds: f64,
    pub p90_seconds: i64,
    pub min_seconds: i64,
    pub max_seconds: i64,
    pub gap_note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeDurationReport {
    pub cluster: String,
    pub node_pool: String,
    pub current_run: Option<CurrentRunStats>,
    pub historical: Option<HistoricalStats>,
    pub anomalous: bool,
}

/// Nearest-rank P90 on a sorted-ascending list (index = `ceil(0.9 * n) - 1`).
fn nearest_rank_p90(sorted_ascending: &[i64]) -> i64 {
    if sorted_ascending.is_empty() {
        return 0;
    }
    let n = sorted_ascending.len();
    let idx = ((0.9 * n as f64).ceil() as usize).saturating_sub(1).min(n - 1);
    sorted_ascending[idx]
}

fn per_node_durations(events: &[UpgradeEvent]) -> Vec<i64> {
    let mut nodes: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    for e in events {
        nodes.insert(e.node.as_str());
    }

    nodes
        .into_iter()
        .filter_map(|node| {
            let start = events
                .iter()
                .filter(|e| e.node == node && e.kind == UpgradeEventKind::NodeUpgrade)
                .map(|e| e.timestamp)
                .min()?;
            let end = events
                .iter()
                .filter(|e| e.node == node && e.kind == UpgradeEventKind::NodeReady && e.timestamp > start)
                .map(|e| e.timestamp)
                .min()?;
            Some((end - start).num_seconds())
        })
        .collect()
}

/// Compute duration statistics for one node pool.
///
/// `requested_history_count` must already be validated to `[1, 50]` by the
/// caller.
pub fn classify(
    cluster_id: &str,
    node_pool: &str,
    events: &[UpgradeEvent],
    historical: &[HistoricalUpgrade],
    requested_history_count: u32,
    thresholds: &ThresholdBundle,
) -> UpgradeDurationReport {
    let durations = per_node_durations(events);
    let current_run = if durations.is_empty() {
        None
    } else {
        Some(CurrentRunStats {
            node_count: durations.len(),
            min_seconds: *durations.iter().min().unwrap(),
            max_seconds: *durations.iter().max().unwrap(),
            mean_seconds: durations.iter().sum::<i64>() as f64 / durations.len() as f64,
        })
    };

    let limited: Vec<i64> = historical
        .iter()
        .take(requested_history_count as usize)
        .map(|h| h.aggregate_duration_seconds)
        .collect();

    let historical_stats = if limited.is_empty() {
        None
    } else {
        let mut sorted = limited.clone();
        sorted.sort_unstable();
        let gap_note = if (limited.len() as u32) < requested_history_count {
            Some(format!(
                "requested {} historical records, only {} available",
                requested_history_count,
                limited.len()
            ))
        } else {
            None
        };
        Some(HistoricalStats {
            requested: requested_history_count,
            returned: limited.len(),
            mean_seconds: limited.iter().sum::<i64>() as f64 / limited.len() as f64,
            p90_seconds: nearest_rank_p90(&sorted),
            min_seconds: *sorted.first().unwrap(),
            max_seconds: *sorted.last().unwrap(),
            gap_note,
        })
    };

    let anomalous = current_run
        .as_ref()
        .map(|c| c.max_seconds > thresholds.upgrade_anomaly_minutes * 60)
        .unwrap_or(false);

    UpgradeDurationReport {
        cluster: cluster_id.to_string(),
        node_pool: node_pool.to_string(),
        current_run,
        historical: historical_stats,
        anomalous,
    }
}
