//! Core data model: cluster identity, thresholds, and the raw
//! records classifiers consume. Everything here is constructed fresh per
//! invocation and discarded once the envelope is serialized.

mod records;
mod severity;
mod threshold;

pub use records::{
    HistoricalUpgrade, NodeRecord, PdbRecord, PodRecord, UpgradeEvent, UpgradeEventKind,
};
pub use severity::{FailureCategory, NodeState, Pressure};
pub use threshold::ThresholdBundle;

use serde::{Deserialize, Serialize};

/// One entry in the uniform error list every tool envelope carries.
///
/// `error` is always scrubbed before it reaches a caller; no
/// exception type name or SDK-internal message is ever stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolError {
    pub error: String,
    pub source: String,
    pub cluster: String,
    pub partial_data: bool,
}

impl ToolError {
    pub fn new(source: impl Into<String>, cluster: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            source: source.into(),
            cluster: cluster.into(),
            partial_data: true,
        }
    }

    /// A fatal cluster-resolution error: `partial_data` is always `false`.
    pub fn fatal(source: impl Into<String>, cluster: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            source: source.into(),
            cluster: cluster.into(),
            partial_data: false,
        }
    }
}

/// Uniform tool output container: tool-specific payload plus `errors[]` and
/// `partial_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub payload: T,
    pub errors: Vec<ToolError>,
    pub partial_data: bool,
}

impl<T> Envelope<T> {
    pub fn new(payload: T, errors: Vec<ToolError>, has_payload: bool) -> Self {
        let partial_data = !errors.is_empty() && has_payload;
        Self {
            payload,
            errors,
            partial_data,
        }
    }

    pub fn ok(payload: T) -> Self {
        Self {
            payload,
            errors: Vec::new(),
            partial_data: false,
        }
    }
}
