//! Shared (L2) cache contract and an in-process implementation.
//!
//! The L2 tier is whatever the deployment shares between instances (Redis in
//! production, see the `permaccel-redis` crate). Every call may fail; callers
//! in this crate treat failures as misses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CacheError;

/// Contract for the shared key/value tier.
///
/// Values are opaque bytes; the engine stores JSON.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Get a value. `Ok(None)` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value with a TTL.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Whether a live value exists for the key.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Drop expired entries, returning how many were removed.
    ///
    /// Backends that expire keys on their own (Redis) keep the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

struct StoredValue {
    data: Arc<Vec<u8>>,
    expires_at: Instant,
}

/// Single-instance distributed tier backed by a `DashMap`.
///
/// Suitable when there is no shared cache (one process) and for tests.
pub struct InMemoryDistributedCache {
    entries: DashMap<String, StoredValue>,
    evictions: AtomicU64,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Total entries dropped because their TTL elapsed.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn live(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(Arc::clone(&entry.data));
            }
            drop(entry);
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }
}

impl Default for InMemoryDistributedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.live(key).map(|data| data.as_ref().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: Arc::new(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(self.cleanup_expired())
    }
}
