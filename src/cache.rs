use std::any::Any;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::NewsError;

type CachedValue = Arc<dyn Any + Send + Sync>;

// Stand-in expiry for TTLs too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Percentage of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }
}

/// In-memory TTL cache shared across requests. Values of any type can be
/// stored; readers get an `Arc` to the stored value, never a mutable handle.
#[derive(Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live value under `key`, or run `compute` and keep its result
    /// for `ttl`. Two callers missing the same key at once may both compute;
    /// the later write wins.
    pub async fn get_or_compute<V, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Arc<V>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let computed = self
            .try_get_or_compute(key, ttl, || async move { Ok::<V, Infallible>(compute().await) })
            .await;
        match computed {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_compute`](Self::get_or_compute), for computations that can
    /// fail. Errors are returned to the caller and nothing is stored.
    pub async fn try_get_or_compute<V, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Arc<V>, E>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.lookup::<V>(key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for key: {}", key);
                return Ok(value);
            }
            Ok(None) => debug!("Cache miss for key: {}", key),
            Err(e) => warn!("{}, treating as a miss", e),
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = Arc::new(compute().await?);
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    async fn lookup<V: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<V>>, NewsError> {
        let entries = self.entries.read().await;
        let entry = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => entry,
            _ => return Ok(None),
        };

        entry
            .value
            .clone()
            .downcast::<V>()
            .map(Some)
            .map_err(|_| NewsError::Cache(format!("entry '{}' holds an unexpected type", key)))
    }

    pub async fn set<V: Any + Send + Sync>(&self, key: &str, value: Arc<V>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: expiry(Instant::now(), ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        debug!("Cache set for key: {} (TTL: {}s)", key, ttl.as_secs());
    }

    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            debug!("Cache deleted for key: {}", key);
        }
        removed
    }

    /// Drop every entry. Returns how many were removed.
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!("Cache flushed ({} entries)", count);
        count
    }

    /// Live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entry_count = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count();

        CacheStats {
            entry_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Remove expired entries. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, entry| {
            let live = entry.is_live(now);
            if !live {
                debug!("Cache entry expired: {}", key);
            }
            live
        });
        before - entries.len()
    }
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

pub async fn start_cache_sweeper(cache: Arc<ResponseCache>, interval: Duration) {
    info!("Sweeping expired cache entries every {}s", interval.as_secs());

    loop {
        tokio::time::sleep(interval).await;
        let purged = cache.purge_expired().await;
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
    }
}
