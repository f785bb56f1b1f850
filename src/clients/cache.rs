use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::HistoricalUpgrade;

use super::{ClientError, ClusterDescription, ControlPlaneSource, UpgradeProfile};

const CACHE_TTL: Duration = Duration::from_secs(30);

/// One cached method result, keyed separately per method name so a cheap
/// `describe_cluster` refresh doesn't wait on a stale `historical_upgrades`.
struct CachedValue<T> {
    value: T,
    fetched_at: Instant,
}

#[derive(Default)]
struct Cache {
    describe_cluster: Option<CachedValue<ClusterDescription>>,
    upgrade_profile: Option<CachedValue<UpgradeProfile>>,
    historical_upgrades: HashMap<u32, CachedValue<Vec<HistoricalUpgrade>>>,
}

/// Transparent 30-second time-keyed cache in front of a `ControlPlaneSource`.
/// The managed-cloud control plane API is the slowest and most
/// rate-limited of the five client interfaces; wrapping it here means the
/// fan-out engine and classifiers never need to know caching is happening.
pub struct CachingControlPlaneSource<S: ControlPlaneSource> {
    inner: S,
    cache: Mutex<Cache>,
}

impl<S: ControlPlaneSource> CachingControlPlaneSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(Cache::default()),
        }
    }

    fn is_fresh(fetched_at: Instant) -> bool {
        fetched_at.elapsed() < CACHE_TTL
    }
}

#[async_trait]
impl<S: ControlPlaneSource> ControlPlaneSource for CachingControlPlaneSource<S> {
    async fn describe_cluster(&self) -> Result<ClusterDescription, ClientError> {
        if let Some(cached) = self.cache.lock().unwrap().describe_cluster.as_ref() {
            if Self::is_fresh(cached.fetched_at) {
                return Ok(cached.value.clone());
            }
        }
        let value = self.inner.describe_cluster().await?;
        self.cache.lock().unwrap().describe_cluster = Some(CachedValue {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    async fn upgrade_profile(&self) -> Result<UpgradeProfile, ClientError> {
        if let Some(cached) = self.cache.lock().unwrap().upgrade_profile.as_ref() {
            if Self::is_fresh(cached.fetched_at) {
                return Ok(cached.value.clone());
            }
        }
        let value = self.inner.upgrade_profile().await?;
        self.cache.lock().unwrap().upgrade_profile = Some(CachedValue {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    async fn historical_upgrades(&self, limit: u32) -> Result<Vec<HistoricalUpgrade>, ClientError> {
        if let Some(cached) = self.cache.lock().unwrap().historical_upgrades.get(&limit) {
            if Self::is_fresh(cached.fetched_at) {
                return Ok(cached.value.clone());
            }
        }
        let value = self.inner.historical_upgrades(limit).await?;
        self.cache.lock().unwrap().historical_upgrades.insert(
            limit,
            CachedValue {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ControlPlaneSource for CountingSource {
        async fn describe_cluster(&self) -> Result<ClusterDescription, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClusterDescription {
                control_plane_version: Some("1.29.2".to_string()),
                pool_versions: vec![],
                target_version: None,
            })
        }

        async fn upgrade_profile(&self) -> Result<UpgradeProfile, ClientError> {
            Ok(UpgradeProfile {
                available_versions: vec![],
                support_status: vec![],
            })
        }

        async fn historical_upgrades(&self, _limit: u32) -> Result<Vec<HistoricalUpgrade>, ClientError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_served_from_cache() {
        let source = CachingControlPlaneSource::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        source.describe_cluster().await.unwrap();
        source.describe_cluster().await.unwrap();
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 1);
    }
}
