//! Cluster registry and configuration loading: a validated YAML cluster
//! map plus environment-derived thresholds.

mod registry;

pub use registry::{ClusterConfig, ClusterRegistry, ConfigError};
