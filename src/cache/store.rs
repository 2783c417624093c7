use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::key::cache_key;
use crate::cache::CacheConfig;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub expires_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub current_size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    current_size: usize,
    stats: CacheStats,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.current_size -= entry.size_bytes;
        Some(entry)
    }
}

/// TTL cache for expensive operation results, bounded by total payload size.
pub struct IntelligentCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
    epoch: Instant,
}

impl IntelligentCache {
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Creating cache with {} bytes capacity, sweep every {}s",
            config.max_size_bytes, config.cleanup_interval_secs
        );
        Self {
            inner: Mutex::new(CacheInner::default()),
            config,
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, operation: &str, params: &Value) -> Option<Value> {
        let key = cache_key(operation, params);
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(&key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(entry) => now > entry.expires_at,
        };

        if expired {
            inner.remove(&key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            debug!("Cache entry {} expired on read", key);
            return None;
        }

        inner.stats.hits += 1;
        let entry = inner.entries.get_mut(&key)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        Some(entry.payload.clone())
    }

    /// Store `data`, replacing any previous entry for the same key. Returns
    /// `false` when the payload alone exceeds the cache capacity.
    pub fn set(&self, operation: &str, params: &Value, data: Value, ttl: Option<Duration>) -> bool {
        let key = cache_key(operation, params);
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(operation));
        let size_bytes = estimate_size(&data);

        let mut inner = self.inner.lock();
        inner.remove(&key);

        if size_bytes > self.config.max_size_bytes {
            inner.stats.rejected += 1;
            warn!(
                "Not caching {}: {} bytes exceeds capacity of {}",
                key, size_bytes, self.config.max_size_bytes
            );
            return false;
        }

        self.ensure_space(&mut inner, size_bytes);

        let now = Instant::now();
        inner.current_size += size_bytes;
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                payload: data,
                expires_at: now + ttl,
                last_accessed: now,
                access_count: 1,
                size_bytes,
            },
        );
        true
    }

    fn score(&self, entry: &CacheEntry) -> f64 {
        // offset by one so entries touched at the epoch still rank by frequency
        let last_accessed_ms = entry.last_accessed.duration_since(self.epoch).as_millis() as f64 + 1.0;
        last_accessed_ms * ((entry.access_count + 1) as f64).ln()
    }

    fn ensure_space(&self, inner: &mut CacheInner, needed: usize) {
        if inner.current_size + needed <= self.config.max_size_bytes {
            return;
        }

        let mut ranked: Vec<(f64, Instant, String)> = inner
            .entries
            .values()
            .map(|entry| (self.score(entry), entry.last_accessed, entry.key.clone()))
            .collect();
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut evicted = 0;
        for (_, _, key) in ranked {
            if inner.current_size + needed <= self.config.max_size_bytes {
                break;
            }
            if inner.remove(&key).is_some() {
                evicted += 1;
            }
        }
        inner.stats.evictions += evicted;
        debug!("Evicted {} entries to free space for {} bytes", evicted, needed);
    }

    /// Remove every entry whose key contains `pattern`.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        inner.stats.invalidations += keys.len() as u64;
        if !keys.is_empty() {
            debug!("Invalidated {} entries matching '{}'", keys.len(), pattern);
        }
        keys.len()
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|entry| now > entry.expires_at)
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size(&self) -> usize {
        self.inner.lock().current_size
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.stats.hits + inner.stats.misses;
        CacheStats {
            entries: inner.entries.len(),
            current_size: inner.current_size,
            max_size: self.config.max_size_bytes,
            hit_rate: if lookups > 0 {
                inner.stats.hits as f64 / lookups as f64
            } else {
                0.0
            },
            ..inner.stats.clone()
        }
    }

    /// Periodic sweep of expired entries. The task ends once the cache is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}

fn estimate_size(data: &Value) -> usize {
    serde_json::to_vec(data).map(|bytes| bytes.len()).unwrap_or(0)
}
