//! Response cache keyed by normalized request descriptors.
//!
//! Freshness is decided at read time against the configured max age; stale
//! entries stay until an explicit purge or clear, or the opt-in purge loop.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cached payload with the instant it was stored
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Bytes,
    pub stored_at: Instant,
}

impl CachedResponse {
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.stored_at.elapsed() <= max_age
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
    max_age: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Fresh entry for `key`, counting the lookup as a hit or miss
    pub fn get_fresh(&self, key: &str) -> Option<CachedResponse> {
        let found = self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh(self.max_age))
            .cloned();

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store or refresh an entry with the current instant
    pub fn store(&self, key: String, status: u16, body: Bytes) {
        self.entries.write().insert(
            key,
            CachedResponse {
                status,
                body,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop entries older than the max age, returning how many were removed
    pub fn purge_stale(&self) -> usize {
        let max_age = self.max_age;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(max_age));
        before - entries.len()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
