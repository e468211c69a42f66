//! Time-bounded single value cache

use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    cached_at: Instant,
}

/// In-memory cache holding one value for a fixed TTL
pub struct TtlCache<T> {
    entry: RwLock<Option<CacheEntry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    /// Create a new empty cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Get the cached value if it has not expired
    pub fn get(&self) -> Option<T> {
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        entry
            .as_ref()
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Replace the cached value
    pub fn insert(&self, value: T) {
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        *entry = Some(CacheEntry {
            value,
            cached_at: Instant::now(),
        });
    }

    /// Drop the cached value
    pub fn clear(&self) {
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        *entry = None;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
