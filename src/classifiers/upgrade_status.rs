//! Upgrade-status reporter.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clients::{ClusterDescription, UpgradeProfile};

const NEARING_EOS_DAYS: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupportState {
    Supported,
    NearingEos,
    Deprecated,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionSupportEntry {
    pub version: String,
    pub end_of_support: Option<DateTime<Utc>>,
    pub state: SupportState,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub pool_name: String,
    pub current_version: Option<String>,
    pub is_upgrading: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeStatusReport {
    pub cluster: String,
    pub control_plane_version: Option<String>,
    pub pools: Vec<PoolStatus>,
    pub target_version: Option<String>,
    pub available_upgrades: Vec<String>,
    pub support_status: Vec<VersionSupportEntry>,
}

fn classify_support(end_of_support: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SupportState {
    match end_of_support {
        Some(eos) if eos < now => SupportState::Deprecated,
        Some(eos) if eos < now + chrono::Duration::days(NEARING_EOS_DAYS) => SupportState::NearingEos,
        _ => SupportState::Supported,
    }
}

/// Assemble an upgrade-status report for one cluster.
///
/// `now` is threaded in rather than read internally so the envelope's
/// single-clock-read-per-invocation guarantee is the caller's
/// responsibility, not duplicated in every classifier.
pub fn classify(
    cluster_id: &str,
    description: &ClusterDescription,
    profile: &UpgradeProfile,
    now: DateTime<Utc>,
) -> UpgradeStatusReport {
    let pools = description
        .pool_versions
        .iter()
        .map(|p| PoolStatus {
            pool_name: p.pool_name.clone(),
            current_version: if p.version == "unknown" { None } else { Some(p.version.clone()) },
            is_upgrading: p.is_upgrading,
        })
        .collect();

    let support_status = profile
        .support_status
        .iter()
        .map(|s| VersionSupportEntry {
            version: s.version.clone(),
            end_of_support: s.end_of_support,
            state: classify_support(s.end_of_support, now),
        })
        .collect();

    UpgradeStatusReport {
        cluster: cluster_id.to_string(),
        control_plane_version: description.control_plane_version.clone(),
        pools,
        target_version: description.target_version.clone(),
        available_upgrades: profile.available_versions.clone(),
        support_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{PoolVersion, UpgradeVersionSupport};
    use chrono::Duration;

    #[test]
    fn deprecated_when_end_of_support_in_past() {
        let now = Utc::now();
        let state = classify_support(Some(now - Duration::days(1)), now);
        assert_eq!(state, SupportState::Deprecated);
    }

    #[test]
    fn nearing_eos_within_sixty_days() {
        let now = Utc::now();
        let state = classify_support(Some(now + Duration::days(30)), now);
        assert_eq!(state, SupportState::NearingEos);
    }

    #[test]
    fn supported_when_far_from_eos() {
        let now = Utc::now();
        let state = classify_support(Some(now + Duration::days(200)), now);
        assert_eq!(state, SupportState::Supported);
    }

    #[test]
    fn null_current_version_mid_upgrade_is_treated_as_upgrading() {
        let description = ClusterDescription {
            control_plane_version: Some("1.29.2".to_string()),
            pool_versions: vec![PoolVersion {
                pool_name: "nodepool1".to_string(),
                version: "unknown".to_string(),
                is_upgrading: true,
            }],
            target_version: Some("1.30.0".to_string()),
        };
        let profile = UpgradeProfile {
            available_versions: vec![],
            support_status: vec![UpgradeVersionSupport {
                version: "1.29.2".to_string(),
                end_of_support: None,
            }],
        };
        let report = classify("dev-eastus", &description, &profile, Utc::now());
        assert!(report.pools[0].is_upgrading);
        assert!(report.pools[0].current_version.is_none());
    }
}
