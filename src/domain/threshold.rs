/// Threshold bundle. Sourced from environment variables at
/// process start; immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdBundle {
    pub cpu_warning_pct: f64,
    pub cpu_critical_pct: f64,
    pub memory_warning_pct: f64,
    pub memory_critical_pct: f64,
    pub pending_pods_warning: u32,
    pub pending_pods_critical: u32,
    pub upgrade_anomaly_minutes: i64,
}

impl Default for ThresholdBundle {
    fn default() -> Self {
        Self {
            cpu_warning_pct: 75.0,
            cpu_critical_pct: 90.0,
            memory_warning_pct: 80.0,
            memory_critical_pct: 95.0,
            pending_pods_warning: 1,
            pending_pods_critical: 10,
            upgrade_anomaly_minutes: 60,
        }
    }
}

impl ThresholdBundle {
    /// Load defaults, overridden by `AKSFLEET_*` environment variables when
    /// present and parseable. An unparseable override is ignored, not fatal
    /// — the process falls back to the default for that field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cpu_warning_pct: env_f64("AKSFLEET_CPU_WARNING_PCT", defaults.cpu_warning_pct),
            cpu_critical_pct: env_f64("AKSFLEET_CPU_CRITICAL_PCT", defaults.cpu_critical_pct),
            memory_warning_pct: env_f64("AKSFLEET_MEM_WARNING_PCT", defaults.memory_warning_pct),
            memory_critical_pct: env_f64("AKSFLEET_MEM_CRITICAL_PCT", defaults.memory_critical_pct),
            pending_pods_warning: env_u32(
                "AKSFLEET_PENDING_WARNING",
                defaults.pending_pods_warning,
            ),
            pending_pods_critical: env_u32(
                "AKSFLEET_PENDING_CRITICAL",
                defaults.pending_pods_critical,
            ),
            upgrade_anomaly_minutes: env_i64(
                "AKSFLEET_UPGRADE_ANOMALY_MINUTES",
                defaults.upgrade_anomaly_minutes,
            ),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_expected_values() {
        let t = ThresholdBundle::default();
        assert_eq!(t.cpu_warning_pct, 75.0);
        assert_eq!(t.cpu_critical_pct, 90.0);
        assert_eq!(t.memory_warning_pct, 80.0);
        assert_eq!(t.memory_critical_pct, 95.0);
        assert_eq!(t.pending_pods_warning, 1);
        assert_eq!(t.pending_pods_critical, 10);
        assert_eq!(t.upgrade_anomaly_minutes, 60);
    }
}
