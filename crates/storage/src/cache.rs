//! Per-organization rule cache.
//!
//! One entry per org holds every rule of that org, encoded with
//! MessagePack. Reads filter by rule type in memory. Any write for an org
//! drops its entry. The cache never fails a read: backend errors and
//! undecodable entries are logged and treated as misses.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tracing::{debug, warn};

use alertstore_core::{AlertRule, RuleTypeFilter, StoreMetrics};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Byte-oriented storage behind [`RuleCache`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

struct CachedEntry {
    expires_at: Instant,
    bytes: Vec<u8>,
}

/// In-process LRU with per-entry expiry.
pub struct LruCacheBackend {
    entries: Mutex<LruCache<String, CachedEntry>>,
}

impl LruCacheBackend {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl CacheBackend for LruCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = CachedEntry {
            expires_at: Instant::now() + ttl,
            bytes: value,
        };
        self.entries
            .lock()
            .expect("lock poisoned")
            .put(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().expect("lock poisoned").pop(key);
        Ok(())
    }
}

pub struct RuleCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    metrics: Arc<dyn StoreMetrics>,
}

fn cache_key(org_id: i64) -> String {
    format!("alert-rules:{org_id}")
}

impl RuleCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, metrics: Arc<dyn StoreMetrics>) -> Self {
        Self {
            backend,
            ttl,
            metrics,
        }
    }

    /// Cached rules of `org_id` matching `rule_type`, or `None` on a miss.
    pub async fn get(&self, org_id: i64, rule_type: RuleTypeFilter) -> Option<Vec<AlertRule>> {
        let key = cache_key(org_id);
        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.cache_miss(org_id);
                return None;
            }
            Err(e) => {
                warn!(org_id, error = %e, "rule cache read failed");
                self.metrics.cache_miss(org_id);
                return None;
            }
        };

        match rmp_serde::from_slice::<Vec<AlertRule>>(&bytes) {
            Ok(rules) => {
                debug!(org_id, count = rules.len(), "rule cache hit");
                self.metrics.cache_hit(org_id);
                Some(rules.into_iter().filter(|r| rule_type.matches(r)).collect())
            }
            Err(e) => {
                warn!(org_id, error = %e, "corrupted rule cache entry, evicting");
                if let Err(e) = self.backend.remove(&key).await {
                    warn!(org_id, error = %e, "failed to evict corrupted rule cache entry");
                }
                self.metrics.cache_miss(org_id);
                None
            }
        }
    }

    /// Store every rule of `org_id`. `rule_type` is accepted for symmetry
    /// with [`RuleCache::get`]; entries always hold the full org.
    pub async fn set(
        &self,
        org_id: i64,
        _rule_type: RuleTypeFilter,
        rules: &[AlertRule],
        ttl: Option<Duration>,
    ) {
        let bytes = match rmp_serde::to_vec_named(rules) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(org_id, error = %e, "failed to encode rules for cache");
                return;
            }
        };
        if let Err(e) = self
            .backend
            .put(&cache_key(org_id), bytes, ttl.unwrap_or(self.ttl))
            .await
        {
            warn!(org_id, error = %e, "rule cache write failed");
        }
    }

    pub async fn invalidate(&self, org_id: i64) {
        debug!(org_id, "invalidating rule cache");
        if let Err(e) = self.backend.remove(&cache_key(org_id)).await {
            warn!(org_id, error = %e, "rule cache invalidation failed");
        }
    }

    /// Raw access for diagnostics and tests.
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn key_for(org_id: i64) -> String {
        cache_key(org_id)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use alertstore_core::{AlertQuery, AtomicMetrics, Record};

    use super::*;

    fn rule(uid: &str, recording: bool) -> AlertRule {
        AlertRule {
            org_id: 1,
            uid: uid.into(),
            title: uid.into(),
            data: vec![AlertQuery {
                ref_id: "A".into(),
                model: serde_json::json!({"expr": "up == 0"}),
                ..Default::default()
            }],
            record: recording.then(|| Record {
                metric: "m".into(),
                from: "A".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn cache(metrics: Arc<AtomicMetrics>) -> RuleCache {
        RuleCache::new(Arc::new(LruCacheBackend::new(8)), Duration::from_secs(60), metrics)
    }

    #[tokio::test]
    async fn hit_filters_by_rule_type() {
        let metrics = Arc::new(AtomicMetrics::new());
        let cache = cache(metrics.clone());
        assert!(cache.get(1, RuleTypeFilter::All).await.is_none());

        let rules = vec![rule("a", false), rule("r", true)];
        cache.set(1, RuleTypeFilter::All, &rules, None).await;

        assert_eq!(cache.get(1, RuleTypeFilter::All).await.unwrap(), rules);
        let recording = cache.get(1, RuleTypeFilter::Recording).await.unwrap();
        assert_eq!(recording.len(), 1);
        assert_eq!(recording[0].uid, "r");
        assert_eq!((metrics.hits(), metrics.misses()), (2, 1));
    }

    #[tokio::test]
    async fn invalidate_drops_the_org_entry() {
        let cache = cache(Arc::new(AtomicMetrics::new()));
        cache.set(1, RuleTypeFilter::All, &[rule("a", false)], None).await;
        cache.set(2, RuleTypeFilter::All, &[rule("b", false)], None).await;

        cache.invalidate(1).await;
        assert!(cache.get(1, RuleTypeFilter::All).await.is_none());
        assert!(cache.get(2, RuleTypeFilter::All).await.is_some());
    }

    #[tokio::test]
    async fn corrupted_entry_is_a_miss_and_evicted() {
        let metrics = Arc::new(AtomicMetrics::new());
        let cache = cache(metrics.clone());
        let key = RuleCache::key_for(1);
        cache
            .backend()
            .put(&key, vec![0xc1, 0xff, 0x00], Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get(1, RuleTypeFilter::All).await.is_none());
        assert!(cache.backend().get(&key).await.unwrap().is_none());
        assert_eq!(metrics.misses(), 1);
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = cache(Arc::new(AtomicMetrics::new()));
        cache
            .set(1, RuleTypeFilter::All, &[rule("a", false)], Some(Duration::ZERO))
            .await;
        assert!(cache.get(1, RuleTypeFilter::All).await.is_none());
    }

    #[tokio::test]
    async fn lru_is_bounded() {
        let backend = LruCacheBackend::new(1);
        backend.put("a", vec![1], Duration::from_secs(5)).await.unwrap();
        backend.put("b", vec![2], Duration::from_secs(5)).await.unwrap();
        assert!(backend.get("a").await.unwrap().is_none());
        assert_eq!(backend.get("b").await.unwrap(), Some(vec![2]));
    }
}
