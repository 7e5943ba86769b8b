use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use moka::{future::Cache, Expiry};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::modes::{CognitiveTier, ProcessingMode};

/// Cache key for fast-tier responses
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    /// Hash of the normalized query
    content_hash: u64,
    mode: String,
    tier: CognitiveTier,
}

impl CacheKey {
    /// Keys are pure functions of the mode and the normalized query, so
    /// case and whitespace differences map to the same entry.
    pub fn new(mode: &ProcessingMode, query: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        mode.tier().hash(&mut hasher);
        normalize_query(query).hash(&mut hasher);

        Self {
            content_hash: hasher.finish(),
            mode: mode.name().to_string(),
            tier: mode.tier(),
        }
    }
}

/// Lowercase and collapse runs of whitespace
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cached result text
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content: String,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    /// Time-to-live chosen when the entry was written
    pub ttl: Duration,
}

struct EntryTtl;

impl Expiry<CacheKey, Arc<CachedResponse>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CachedResponse>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    // A superseding write restarts the clock with the new entry's ttl.
    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Arc<CachedResponse>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Creation order of live keys, oldest first
#[derive(Default)]
struct CreationOrder {
    by_age: BTreeMap<u64, CacheKey>,
    sequence_of: HashMap<CacheKey, u64>,
    next_sequence: u64,
}

impl CreationOrder {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(old) = self.sequence_of.remove(key) {
            self.by_age.remove(&old);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_age.insert(sequence, key.clone());
        self.sequence_of.insert(key.clone(), sequence);
    }

    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.by_age.pop_first()?;
        self.sequence_of.remove(&key);
        Some(key)
    }

    fn retain(&mut self, mut keep: impl FnMut(&CacheKey) -> bool) {
        let sequence_of = &mut self.sequence_of;
        self.by_age.retain(|_, key| {
            let alive = keep(key);
            if !alive {
                sequence_of.remove(key);
            }
            alive
        });
    }

    fn clear(&mut self) {
        self.by_age.clear();
        self.sequence_of.clear();
    }

    fn len(&self) -> usize {
        self.by_age.len()
    }
}

/// TTL cache for fast-tier responses.
///
/// Entries expire after their own ttl. When the entry cap is exceeded the
/// oldest entry by creation time is evicted.
pub struct ResponseCache {
    cache: Cache<CacheKey, Arc<CachedResponse>>,
    order: Mutex<CreationOrder>,
    max_entries: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("max_entries", &self.max_entries)
            .field("default_ttl", &self.default_ttl)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl ResponseCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let cache = Cache::builder().expire_after(EntryTtl).build();

        Self {
            cache,
            order: Mutex::new(CreationOrder::default()),
            max_entries: max_entries.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a prior result. Expired entries read as misses.
    pub async fn get(&self, mode: &ProcessingMode, query: &str) -> Option<String> {
        if !mode.tier().is_cacheable() {
            return None;
        }
        let key = CacheKey::new(mode, query);
        match self.cache.get(&key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(mode = %mode.name(), "[CACHE] Hit");
                Some(entry.content.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result with the default ttl. Non-fast modes are refused.
    pub async fn put(&self, mode: &ProcessingMode, query: &str, result: &str) -> bool {
        self.put_with_ttl(mode, query, result, self.default_ttl).await
    }

    /// Store a result, replacing any previous entry for the same key.
    pub async fn put_with_ttl(
        &self,
        mode: &ProcessingMode,
        query: &str,
        result: &str,
        ttl: Duration,
    ) -> bool {
        if !mode.tier().is_cacheable() {
            tracing::debug!(
                mode = %mode.name(),
                tier = %mode.tier(),
                "[CACHE] Refusing to cache non-fast result"
            );
            return false;
        }

        let key = CacheKey::new(mode, query);
        let entry = Arc::new(CachedResponse {
            content: result.to_string(),
            cached_at: chrono::Utc::now(),
            ttl,
        });

        let mut order = self.order.lock().await;
        self.cache.insert(key.clone(), entry).await;
        order.touch(&key);

        if order.len() > self.max_entries {
            let cache = &self.cache;
            order.retain(|k| cache.contains_key(k));
        }
        while order.len() > self.max_entries {
            match order.pop_oldest() {
                Some(oldest) => {
                    tracing::debug!(mode = %oldest.mode, "[CACHE] Evicting oldest entry");
                    self.cache.invalidate(&oldest).await;
                }
                None => break,
            }
        }
        true
    }

    pub async fn invalidate_all(&self) {
        let mut order = self.order.lock().await;
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            entry_count: self.cache.entry_count(),
            hits,
            misses,
            hit_rate,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Approximate number of entries (moka updates this lazily)
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{CognitiveTier, ProcessingMode};

    fn chat() -> ProcessingMode {
        ProcessingMode::new("chat", CognitiveTier::Fast)
    }

    #[test]
    fn test_cache_key_normalizes_query() {
        let mode = chat();
        assert_eq!(
            CacheKey::new(&mode, "What is  2+2?"),
            CacheKey::new(&mode, "  what IS 2+2?")
        );
        assert_ne!(
            CacheKey::new(&mode, "What is 2+2?"),
            CacheKey::new(&mode, "What is 3+3?")
        );

        let other = ProcessingMode::new("knowledge_qa", CognitiveTier::Fast);
        assert_ne!(
            CacheKey::new(&mode, "What is 2+2?"),
            CacheKey::new(&other, "What is 2+2?")
        );
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        assert!(cache.put(&chat(), "What is 2+2?", "4").await);

        assert_eq!(
            cache.get(&chat(), "what is 2+2?").await.as_deref(),
            Some("4")
        );
        assert!(cache.get(&chat(), "What is 3+3?").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_non_fast_modes_are_never_cached() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        let analytical = ProcessingMode::new("code", CognitiveTier::Analytical);
        let agentic = ProcessingMode::new("deep_research", CognitiveTier::Agentic);

        assert!(!cache.put(&analytical, "fix my bug", "done").await);
        assert!(!cache.put(&agentic, "research this", "report").await);
        assert!(cache.get(&analytical, "fix my bug").await.is_none());
        assert!(cache.get(&agentic, "research this").await.is_none());
    }

    #[tokio::test]
    async fn test_entry_expires_after_its_ttl() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache
            .put_with_ttl(&chat(), "short lived", "value", Duration::from_millis(150))
            .await;
        cache.put(&chat(), "long lived", "value").await;

        assert!(cache.get(&chat(), "short lived").await.is_some());
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(cache.get(&chat(), "short lived").await.is_none());
        assert!(cache.get(&chat(), "long lived").await.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_supersedes_and_restarts_ttl() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache
            .put_with_ttl(&chat(), "q", "old", Duration::from_millis(150))
            .await;
        cache
            .put_with_ttl(&chat(), "q", "new", Duration::from_secs(60))
            .await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(cache.get(&chat(), "q").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest_by_creation() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put(&chat(), "first", "1").await;
        cache.put(&chat(), "second", "2").await;
        // Reading does not refresh creation order
        assert!(cache.get(&chat(), "first").await.is_some());
        cache.put(&chat(), "third", "3").await;

        assert!(cache.get(&chat(), "first").await.is_none());
        assert_eq!(cache.get(&chat(), "second").await.as_deref(), Some("2"));
        assert_eq!(cache.get(&chat(), "third").await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.put(&chat(), "q", "a").await;
        cache.invalidate_all().await;
        assert!(cache.get(&chat(), "q").await.is_none());
    }
}
