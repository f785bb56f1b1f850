//! Tool-argument validation. Validation failures are
//! reported with `source="validation"` before any client is invoked — never
//! folded into a client-side error.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// RFC-1123 DNS label: lowercase alphanumerics and `-`, not starting or
/// ending with `-`, 1-63 characters.
static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap());

/// AKS node-pool naming rule: lowercase letter first, then up to
/// 11 more lowercase alphanumerics, 12 characters total.
static POOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9]{0,11}$").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("namespace '{0}' is not a valid RFC-1123 label")]
    InvalidNamespace(String),
    #[error("node_pool '{0}' does not match the AKS pool-naming pattern")]
    InvalidPoolName(String),
    #[error("history_count must be in [1, 50], got {0}")]
    HistoryCountOutOfRange(u32),
    #[error("mode must be one of 'preflight' or 'live', got '{0}'")]
    InvalidMode(String),
    #[error("status_filter must be one of 'pending', 'failed', or 'all', got '{0}'")]
    InvalidStatusFilter(String),
}

pub fn validate_namespace(namespace: &str) -> Result<(), ValidationError> {
    if NAMESPACE_RE.is_match(namespace) {
        Ok(())
    } else {
        Err(ValidationError::InvalidNamespace(namespace.to_string()))
    }
}

pub fn validate_pool_name(pool: &str) -> Result<(), ValidationError> {
    if POOL_RE.is_match(pool) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPoolName(pool.to_string()))
    }
}

pub fn validate_history_count(count: u32) -> Result<(), ValidationError> {
    if (1..=50).contains(&count) {
        Ok(())
    } else {
        Err(ValidationError::HistoryCountOutOfRange(count))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdbMode {
    Preflight,
    Live,
}

pub fn validate_mode(mode: &str) -> Result<PdbMode, ValidationError> {
    match mode {
        "preflight" => Ok(PdbMode::Preflight),
        "live" => Ok(PdbMode::Live),
        other => Err(ValidationError::InvalidMode(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Pending,
    Failed,
    All,
}

pub fn validate_status_filter(filter: &str) -> Result<StatusFilter, ValidationError> {
    match filter {
        "pending" => Ok(StatusFilter::Pending),
        "failed" => Ok(StatusFilter::Failed),
        "all" => Ok(StatusFilter::All),
        other => Err(ValidationError::InvalidStatusFilter(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercase_pool_name_is_rejected() {
        assert_eq!(
            validate_pool_name("UPPER"),
            Err(ValidationError::InvalidPoolName("UPPER".to_string()))
        );
    }

    #[test]
    fn uppercase_mode_is_rejected() {
        assert!(validate_mode("LIVE").is_err());
    }

    #[test]
    fn history_count_boundaries() {
        assert!(validate_history_count(0).is_err());
        assert!(validate_history_count(1).is_ok());
        assert!(validate_history_count(50).is_ok());
        assert!(validate_history_count(51).is_err());
    }

    #[test]
    fn valid_pool_name_accepted() {
        assert!(validate_pool_name("nodepool1").is_ok());
    }

    #[test]
    fn valid_namespace_accepted() {
        assert!(validate_namespace("kube-system").is_ok());
        assert!(validate_namespace("Invalid_NS").is_err());
    }
}
