//! TTL cache for loaded entities and their relations.
//!
//! Keyed by `(entity, id, sorted relation names)`. Entries expire after the
//! configured TTL; at capacity the oldest entry is evicted. Hit, miss, and
//! eviction counts are tracked with atomic counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::store::{Record, RecordId};

/// Cache sizing and expiry.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Entry time to live.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Cache key: entity, record id, and the sorted relation-name selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    entity: String,
    id: RecordId,
    relations: String,
}

impl CacheKey {
    pub fn new(entity: &str, id: RecordId, relation_names: &[String]) -> Self {
        let mut names: Vec<&str> = relation_names.iter().map(String::as_str).collect();
        names.sort_unstable();
        Self {
            entity: entity.to_string(),
            id,
            relations: names.join(","),
        }
    }
}

/// A cached load: the record plus its materialized relations.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CachedLoad {
    pub record: Record,
    pub related: BTreeMap<String, Vec<Record>>,
}

struct CacheEntry {
    value: CachedLoad,
    inserted_at: Instant,
}

/// Thread-safe TTL cache for loaded entities.
pub(crate) struct RelationCache {
    inner: Mutex<HashMap<CacheKey, CacheEntry>>,
    config: CacheConfig,
    stats: CacheStats,
}

impl RelationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            config,
            stats: CacheStats::default(),
        }
    }

    /// Get a cached load if present and not expired.
    pub fn get(&self, key: &CacheKey) -> Option<CachedLoad> {
        let mut guard = self.inner.lock();
        match guard.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.config.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                guard.remove(key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a load, evicting the oldest entry at capacity.
    pub fn insert(&self, key: CacheKey, value: CachedLoad) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.config.capacity && !guard.contains_key(&key) {
            let oldest = guard
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                guard.remove(&oldest);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        guard.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
