//! Pod health classifier.

use serde::Serialize;

use crate::clients::PodEvent;
use crate::domain::{FailureCategory, PodRecord};
use crate::validation::StatusFilter;

const MAX_SELECTED_PODS: usize = 50;

const CRASH_LOOPING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "Error",
];

#[derive(Debug, Clone, Serialize)]
pub struct UnhealthyPod {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub node: Option<String>,
    pub category: FailureCategory,
    pub oom_killed_container: Option<String>,
    pub oom_killed_memory_limit_bytes: Option<i64>,
    pub root_cause: Option<String>,
    pub last_event_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodHealthReport {
    pub cluster: String,
    pub matched_count: usize,
    pub pods: Vec<UnhealthyPod>,
    pub truncated: bool,
    pub by_category: std::collections::BTreeMap<FailureCategory, usize>,
}

fn container_failure_reason(pod: &PodRecord) -> Option<(&str, FailureCategory)> {
    for container in &pod.containers {
        if let Some(reason) = container.last_terminated.as_ref().and_then(|t| t.reason.as_deref()) {
            if reason == "OOMKilled" || CRASH_LOOPING_REASONS.contains(&reason) {
                return Some((reason, FailureCategory::from_reason(reason)));
            }
        }
        if let Some(reason) = container.waiting_reason.as_deref() {
            if CRASH_LOOPING_REASONS.contains(&reason) {
                return Some((reason, FailureCategory::from_reason(reason)));
            }
        }
    }
    None
}

fn is_unhealthy(pod: &PodRecord) -> bool {
    pod.phase == "Pending" || pod.phase == "Failed" || container_failure_reason(pod).is_some()
}

/// Public so the upgrade-progress classifier's `pod_transitions` rollup can
/// reuse the same failure-category taxonomy.
pub fn category_for(pod: &PodRecord) -> FailureCategory {
    container_failure_reason(pod)
        .map(|(_, cat)| cat)
        .unwrap_or(FailureCategory::Unknown)
}

fn oom_killed_info(pod: &PodRecord) -> Option<(String, Option<i64>)> {
    pod.containers.iter().find_map(|c| {
        let reason = c.last_terminated.as_ref()?.reason.as_deref()?;
        if reason == "OOMKilled" {
            Some((c.name.clone(), c.memory_limit_bytes))
        } else {
            None
        }
    })
}

/// Classify pod health for one cluster.
pub fn classify(
    cluster_id: &str,
    pods: &[PodRecord],
    events: &[PodEvent],
    namespace: Option<&str>,
    status_filter: StatusFilter,
) -> PodHealthReport {
    let mut by_category = std::collections::BTreeMap::new();
    let mut matched: Vec<(&PodRecord, FailureCategory)> = Vec::new();

    for pod in pods {
        if !is_unhealthy(pod) {
            continue;
        }
        if let Some(ns) = namespace {
            if pod.namespace != ns {
                continue;
            }
        }
        let phase_lower = pod.phase.to_lowercase();
        let status_ok = match status_filter {
            StatusFilter::All => true,
            StatusFilter::Pending => phase_lower == "pending",
            StatusFilter::Failed => phase_lower == "failed",
        };
        if !status_ok {
            continue;
        }

        let category = container_failure_reason(pod)
            .map(|(_, cat)| cat)
            .unwrap_or(FailureCategory::Unknown);
        *by_category.entry(category).or_insert(0) += 1;
        matched.push((pod, category));
    }

    let matched_count = matched.len();

    // Most recent event per (namespace, pod name), for root-cause context
    // and for the phase-then-recency sort.
    let latest_event = |namespace: &str, name: &str| -> Option<&PodEvent> {
        events
            .iter()
            .filter(|e| e.namespace == namespace && e.pod_name == name)
            .max_by_key(|e| e.timestamp)
    };

    let mut selected: Vec<UnhealthyPod> = matched
        .into_iter()
        .map(|(pod, category)| {
            let event = latest_event(&pod.namespace, &pod.name);
            let oom = oom_killed_info(pod);
            UnhealthyPod {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
                phase: pod.phase.clone(),
                node: pod.node.clone(),
                category,
                oom_killed_container: oom.as_ref().map(|(name, _)| name.clone()),
                oom_killed_memory_limit_bytes: oom.and_then(|(_, limit)| limit),
                root_cause: event.map(|e| e.message.clone()),
                last_event_timestamp: event.map(|e| e.timestamp),
            }
        })
        .collect();

    // Failed before Pending, then most recent event descending.
    selected.sort_by(|a, b| {
        let phase_rank = |p: &str| if p == "Failed" { 0 } else { 1 };
        phase_rank(&a.phase)
            .cmp(&phase_rank(&b.phase))
            .then_with(|| b.last_event_timestamp.cmp(&a.last_event_timestamp))
    });

    let truncated = selected.len() > MAX_SELECTED_PODS;
    selected.truncate(MAX_SELECTED_PODS);

    PodHealthReport {
        cluster: cluster_id.to_string(),
        matched_count,
        pods: selected,
        truncated,
        by_category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::domain::{ContainerStatusRecord, LastTerminatedState};

    fn healthy_pod(name: &str) -> PodRecord {
        PodRecord {
            namespace: "default".to_string(),
            name: name.to_string(),
            phase: "Running".to_string(),
            node: Some("n1".to_string()),
            containers: vec![ContainerStatusRecord {
                name: "app".to_string(),
                ready: true,
                restart_count: 0,
                last_terminated: None,
                waiting_reason: None,
                memory_limit_bytes: None,
            }],
            owner_references: vec![],
            cpu_request_millicores: 0,
            memory_request_bytes: 0,
            labels: vec![],
        }
    }

    fn oom_pod(name: &str) -> PodRecord {
        PodRecord {
            containers: vec![ContainerStatusRecord {
                name: "app".to_string(),
                ready: false,
                restart_count: 3,
                last_terminated: Some(LastTerminatedState {
                    reason: Some("OOMKilled".to_string()),
                    message: None,
                }),
                waiting_reason: None,
                memory_limit_bytes: Some(536_870_912),
            }],
            ..healthy_pod(name)
        }
    }

    fn generic_error_pod(name: &str) -> PodRecord {
        PodRecord {
            containers: vec![ContainerStatusRecord {
                name: "app".to_string(),
                ready: false,
                restart_count: 1,
                last_terminated: Some(LastTerminatedState {
                    reason: Some("Error".to_string()),
                    message: None,
                }),
                waiting_reason: None,
                memory_limit_bytes: None,
            }],
            phase: "Failed".to_string(),
            ..healthy_pod(name)
        }
    }

    fn failed_pod(name: &str) -> PodRecord {
        PodRecord {
            phase: "Failed".to_string(),
            ..healthy_pod(name)
        }
    }

    fn pending_pod(name: &str) -> PodRecord {
        PodRecord {
            phase: "Pending".to_string(),
            ..healthy_pod(name)
        }
    }

    #[test]
    fn oom_killed_pod_is_flagged_runtime_with_container_details() {
        let pods = vec![oom_pod("p1")];
        let report = classify("dev-eastus", &pods, &[], None, StatusFilter::All);
        assert_eq!(report.matched_count, 1);
        assert_eq!(report.pods[0].category, FailureCategory::Runtime);
        assert_eq!(report.pods[0].oom_killed_container.as_deref(), Some("app"));
        assert_eq!(report.pods[0].oom_killed_memory_limit_bytes, Some(536_870_912));
    }

    #[test]
    fn generic_error_reason_is_classified_as_runtime() {
        let pods = vec![generic_error_pod("p1")];
        let report = classify("dev-eastus", &pods, &[], None, StatusFilter::All);
        assert_eq!(report.matched_count, 1);
        assert_eq!(report.pods[0].category, FailureCategory::Runtime);
    }

    #[test]
    fn healthy_pod_is_excluded() {
        let pods = vec![healthy_pod("p1")];
        let report = classify("dev-eastus", &pods, &[], None, StatusFilter::All);
        assert_eq!(report.matched_count, 0);
    }

    #[test]
    fn failed_sorts_before_pending() {
        let pods = vec![pending_pod("p1"), failed_pod("p2")];
        let report = classify("dev-eastus", &pods, &[], None, StatusFilter::All);
        assert_eq!(report.pods[0].name, "p2");
        assert_eq!(report.pods[1].name, "p1");
    }

    #[test]
    fn caps_at_fifty_and_reports_truncation() {
        let pods: Vec<_> = (0..60).map(|i| failed_pod(&format!("p{i}"))).collect();
        let report = classify("dev-eastus", &pods, &[], None, StatusFilter::All);
        assert_eq!(report.matched_count, 60);
        assert_eq!(report.pods.len(), 50);
        assert!(report.truncated);
    }

    #[test]
    fn by_category_counts_all_matched_not_only_capped_list() {
        let pods: Vec<_> = (0..60).map(|i| failed_pod(&format!("p{i}"))).collect();
        let report = classify("dev-eastus", &pods, &[], None, StatusFilter::All);
        let total: usize = report.by_category.values().sum();
        assert_eq!(total, 60);
    }

    #[test]
    fn namespace_filter_is_exact_match() {
        let mut other_ns = failed_pod("p1");
        other_ns.namespace = "kube-system".to_string();
        let pods = vec![other_ns];
        let report = classify("dev-eastus", &pods, &[], Some("default"), StatusFilter::All);
        assert_eq!(report.matched_count, 0);
    }

    #[test]
    fn most_recent_event_used_as_root_cause() {
        let pods = vec![failed_pod("p1")];
        let events = vec![
            PodEvent {
                namespace: "default".to_string(),
                pod_name: "p1".to_string(),
                reason: "Failed".to_string(),
                message: "old message".to_string(),
                timestamp: Utc::now() - Duration::minutes(10),
            },
            PodEvent {
                namespace: "default".to_string(),
                pod_name: "p1".to_string(),
                reason: "Failed".to_string(),
                message: "latest message".to_string(),
                timestamp: Utc::now(),
            },
        ];
        let report = classify("dev-eastus", &pods, &events, None, StatusFilter::All);
        assert_eq!(report.pods[0].root_cause.as_deref(), Some("latest message"));
    }
}
