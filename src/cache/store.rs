//! TTL key-value cache store
//!
//! Thread-safe with O(1) operations using DashMap. Holds three families of
//! entries the engine shares across requests:
//!
//! - JSON values (the cached aggregate statistics), expiring on a TTL
//! - monotonic counters keyed by UTC day (the request ceiling), expiring
//!   at the next day boundary rather than on a sliding TTL
//! - set-once flags (the once-per-day degradation alert)
//!
//! Expiry uses wall-clock time because counter windows are calendar days,
//! not durations from first touch. Expired entries are dropped lazily on
//! read and swept by a periodic cleanup task.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct ValueEntry {
    json: String,
    expires_at: DateTime<Utc>,
}

struct CounterEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Default)]
pub struct CacheStoreStats {
    pub value_count: usize,
    pub counter_count: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Shared TTL cache store
pub struct TtlCache {
    values: DashMap<String, ValueEntry>,
    counters: DashMap<String, CounterEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            counters: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a JSON value by key. O(1). Expired entries read as misses.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.values.get(key) {
            if Utc::now() < entry.expires_at {
                match serde_json::from_str(&entry.json) {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        debug!(key = key, "Cache hit");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(key = key, error = %e, "Cached value failed to decode, dropping");
                        drop(entry);
                        self.values.remove(key);
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                }
            }
            // Expired
            drop(entry);
            self.values.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Cache miss");
        None
    }

    /// Store a JSON value with a TTL. O(1).
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                warn!(key = key, error = %e, "Value failed to encode, not caching");
                return;
            }
        };
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));
        debug!(key = key, ttl_secs = ttl.as_secs(), "Cached value");
        self.values.insert(key.to_string(), ValueEntry { json, expires_at });
    }

    /// Remove a value. O(1). Returns whether anything was present.
    pub fn remove(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Atomically increment a counter and return the new count. O(1).
    ///
    /// A counter found past its expiry restarts from zero with the new
    /// expiry, which is how the daily window rolls over without a reset job.
    pub fn incr(&self, key: &str, expires_at: DateTime<Utc>) -> u64 {
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry { count: 0, expires_at });
        if Utc::now() >= entry.expires_at {
            entry.count = 0;
            entry.expires_at = expires_at;
        }
        entry.count += 1;
        entry.count
    }

    /// Read a counter without incrementing. Missing or expired reads as 0.
    pub fn counter(&self, key: &str) -> u64 {
        match self.counters.get(key) {
            Some(entry) if Utc::now() < entry.expires_at => entry.count,
            _ => 0,
        }
    }

    /// Set a flag if it is not already set. O(1). Returns true when this
    /// call set it, false when a live flag was already present.
    pub fn set_flag(&self, key: &str, expires_at: DateTime<Utc>) -> bool {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if Utc::now() >= occupied.get().expires_at {
                    occupied.insert(ValueEntry {
                        json: "1".to_string(),
                        expires_at,
                    });
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ValueEntry {
                    json: "1".to_string(),
                    expires_at,
                });
                true
            }
        }
    }

    /// Remove all expired entries. Returns (expired_values, expired_counters).
    pub fn purge_expired(&self) -> (usize, usize) {
        let now = Utc::now();

        let expired_values: Vec<String> = self
            .values
            .iter()
            .filter(|e| now >= e.expires_at)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired_values {
            self.values.remove(key);
        }

        let expired_counters: Vec<String> = self
            .counters
            .iter()
            .filter(|e| now >= e.expires_at)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired_counters {
            self.counters.remove(key);
        }

        if !expired_values.is_empty() || !expired_counters.is_empty() {
            debug!(
                values = expired_values.len(),
                counters = expired_counters.len(),
                "Purged expired cache entries"
            );
        }

        (expired_values.len(), expired_counters.len())
    }

    pub fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            value_count: self.values.len(),
            counter_count: self.counters.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task to periodically purge expired entries
pub fn spawn_cache_cleanup_task(cache: Arc<TtlCache>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let (values, counters) = cache.purge_expired();
            if values > 0 || counters > 0 {
                debug!(values, counters, "Cache cleanup completed");
            }
        }
    });

    info!(interval_secs = interval.as_secs(), "Cache cleanup task started");
}
