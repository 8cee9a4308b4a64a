//! TTL+LRU result caching, with an optional remote backend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::SerpResult;
use crate::models::{fingerprint, SearchResult};

/// Cache hit/miss/eviction counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Pluggable cache contract for merged search results.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> SerpResult<Option<SearchResult>>;
    async fn set(&self, key: &str, value: SearchResult, ttl: Option<Duration>) -> SerpResult<()>;
    async fn delete(&self, key: &str) -> SerpResult<bool>;
    async fn clear(&self) -> SerpResult<()>;
    async fn stats(&self) -> CacheStats;
}

/// Compute the standard cache key for a set of search parameters.
pub fn generate_cache_key(query: &str, country: &str, language: &str, max_pages: u32) -> String {
    fingerprint(query, country, language, max_pages)
}

/// No-op cache; every lookup misses and every write is discarded.
#[derive(Debug, Default)]
pub struct NullCache {
    stats: Mutex<CacheStats>,
}

impl NullCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for NullCache {
    async fn get(&self, _key: &str) -> SerpResult<Option<SearchResult>> {
        self.stats.lock().await.misses += 1;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: SearchResult, _ttl: Option<Duration>) -> SerpResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> SerpResult<bool> {
        Ok(false)
    }

    async fn clear(&self) -> SerpResult<()> {
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }
}

struct CacheEntry {
    value: SearchResult,
    created_at: Instant,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) if ttl.is_zero() => false,
            Some(ttl) => self.created_at.elapsed() > ttl,
        }
    }
}

struct InMemoryState {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

/// In-process cache bounded by entry count, with per-entry TTL and
/// LRU eviction once `max_size` is reached.
pub struct InMemoryCache {
    default_ttl: Duration,
    state: Mutex<InMemoryState>,
}

impl InMemoryCache {
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            default_ttl,
            state: Mutex::new(InMemoryState {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Remove all expired entries, returning the count removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
            state.stats.evictions += 1;
        }
        state.stats.size = state.entries.len();
        expired.len()
    }
}

#[async_trait]
impl ResultCache for InMemoryCache {
    async fn get(&self, key: &str) -> SerpResult<Option<SearchResult>> {
        let mut state = self.state.lock().await;

        let expired = match state.entries.peek(key) {
            None => {
                state.stats.misses += 1;
                return Ok(None);
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            state.entries.pop(key);
            state.stats.misses += 1;
            state.stats.evictions += 1;
            state.stats.size = state.entries.len();
            return Ok(None);
        }

        state.stats.hits += 1;
        Ok(state.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: SearchResult, ttl: Option<Duration>) -> SerpResult<()> {
        let mut state = self.state.lock().await;
        let ttl = ttl.or(Some(self.default_ttl));
        let evicted = state.entries.put(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
        if evicted.is_some() {
            state.stats.evictions += 1;
        }
        state.stats.sets += 1;
        state.stats.size = state.entries.len();
        Ok(())
    }

    async fn delete(&self, key: &str) -> SerpResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.entries.pop(key).is_some();
        state.stats.size = state.entries.len();
        Ok(removed)
    }

    async fn clear(&self) -> SerpResult<()> {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.stats.size = 0;
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let mut state = self.state.lock().await;
        state.stats.size = state.entries.len();
        state.stats.clone()
    }
}

/// Remote (Redis-backed) cache for deployments that share results
/// across multiple aggregator processes.
///
/// Every operation degrades silently to a miss/log-only failure on
/// connection trouble — a distributed cache is an optimization, not a
/// correctness dependency, so the fetch path always has a fallback.
#[cfg(feature = "remote-cache")]
pub struct RemoteCache {
    client: redis::Client,
    default_ttl: Duration,
    key_prefix: String,
    stats: Mutex<CacheStats>,
}

#[cfg(feature = "remote-cache")]
impl RemoteCache {
    pub fn new(redis_url: &str, default_ttl: Duration) -> SerpResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| crate::error::SerpError::Cache(e.to_string()))?;
        Ok(Self {
            client,
            default_ttl,
            key_prefix: "serp:".to_string(),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

#[cfg(feature = "remote-cache")]
#[async_trait]
impl ResultCache for RemoteCache {
    async fn get(&self, key: &str) -> SerpResult<Option<SearchResult>> {
        use redis::AsyncCommands;

        let result: Option<(Option<SearchResult>,)> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
            let raw: Option<String> = conn.get(self.make_key(key)).await.ok()?;
            let value = raw.and_then(|s| serde_json::from_str(&s).ok());
            Some((value,))
        }
        .await;

        let mut stats = self.stats.lock().await;
        match result.and_then(|(v,)| v) {
            Some(value) => {
                stats.hits += 1;
                Ok(Some(value))
            }
            None => {
                stats.misses += 1;
                warn!(key, "remote cache miss or unreachable");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: SearchResult, ttl: Option<Duration>) -> SerpResult<()> {
        use redis::AsyncCommands;

        let ttl = ttl.unwrap_or(self.default_ttl);
        let outcome: Option<()> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
            let data = serde_json::to_string(&value).ok()?;
            if ttl.is_zero() {
                conn.set::<_, _, ()>(self.make_key(key), data).await.ok()
            } else {
                conn.set_ex::<_, _, ()>(self.make_key(key), data, ttl.as_secs())
                    .await
                    .ok()
            }
        }
        .await;

        if outcome.is_none() {
            warn!(key, "remote cache write failed, degrading silently");
        } else {
            self.stats.lock().await.sets += 1;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> SerpResult<bool> {
        use redis::AsyncCommands;

        let removed: Option<i64> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
            conn.del(self.make_key(key)).await.ok()
        }
        .await;
        Ok(removed.unwrap_or(0) > 0)
    }

    async fn clear(&self) -> SerpResult<()> {
        use redis::AsyncCommands;

        let _: Option<()> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
            let pattern = format!("{}*", self.key_prefix);
            let keys: Vec<String> = conn.keys(pattern).await.ok()?;
            if keys.is_empty() {
                return Some(());
            }
            conn.del::<_, ()>(keys).await.ok()
        }
        .await;
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeneralMetadata;

    fn sample_result() -> SearchResult {
        SearchResult {
            url: None,
            keyword: None,
            general: GeneralMetadata::default(),
            organic: vec![],
            related: vec![],
            people_also_ask: vec![],
            pagination: vec![],
            navigation: vec![],
            language: None,
            country: None,
            aio_text: None,
            pages_fetched: 1,
            errors: vec![],
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = InMemoryCache::new(Duration::from_secs(60), 10);
        assert!(cache.get("k").await.unwrap().is_none());
        cache.set("k", sample_result(), None).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_misses() {
        let cache = InMemoryCache::new(Duration::from_millis(1), 10);
        cache.set("k", sample_result(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let cache = InMemoryCache::new(Duration::from_secs(0), 10);
        cache.set("k", sample_result(), Some(Duration::from_secs(0))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lru_evicts_oldest_when_full() {
        let cache = InMemoryCache::new(Duration::from_secs(60), 2);
        cache.set("a", sample_result(), None).await.unwrap();
        cache.set("b", sample_result(), None).await.unwrap();
        cache.set("c", sample_result(), None).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_expired_removes_stale_entries() {
        let cache = InMemoryCache::new(Duration::from_millis(1), 10);
        cache.set("k", sample_result(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup_expired().await, 1);
    }

    #[tokio::test]
    async fn null_cache_always_misses() {
        let cache = NullCache::new();
        cache.set("k", sample_result(), None).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
