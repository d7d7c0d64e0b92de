//! Two-level cache tier: in-process L1 (DashMap) over a shared L2.
//!
//! ```text
//! get → L1 (DashMap) → L2 (DistributedCache) → miss
//!          ↓                ↓
//!      <1µs latency    network latency, promoted into L1 on hit
//! ```
//!
//! L2 failures are logged and reported as misses (reads) or ignored (writes).
//! They never propagate out of this module.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::distributed::DistributedCache;

/// An L1 entry with TTL.
///
/// The payload is wrapped in `Arc` so a hit is a reference-count bump.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Counters for the cache tier.
#[derive(Debug, Clone, Default)]
pub struct TierStats {
    pub l1_entries: usize,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    /// L2 calls that failed and were degraded to a miss or no-op.
    pub l2_errors: u64,
}

impl TierStats {
    /// Hit rate as a fraction in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// The engine's view of caching: L1 + L2 behind one `get`/`put`/`delete`/`exists`.
pub struct CacheTier {
    local: DashMap<String, CachedEntry>,
    remote: Arc<dyn DistributedCache>,
    /// Ceiling on L1 lifetime, so L1 never serves much longer than L2 would.
    local_ttl: Duration,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    l2_errors: AtomicU64,
}

impl CacheTier {
    pub fn new(remote: Arc<dyn DistributedCache>, local_ttl: Duration) -> Self {
        Self {
            local: DashMap::new(),
            remote,
            local_ttl,
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            l2_errors: AtomicU64::new(0),
        }
    }

    /// Raw lookup. L2 hits are promoted into L1.
    pub async fn get_raw(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(entry) = self.local.get(key) {
            if !entry.is_expired() {
                tracing::debug!(key = %key, "cache hit (L1)");
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.data));
            }
            drop(entry);
            self.local.remove(key);
        }

        match self.remote.get(key).await {
            Ok(Some(data)) => {
                tracing::debug!(key = %key, "cache hit (L2)");
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                let entry = CachedEntry::new(data, self.local_ttl);
                let data = Arc::clone(&entry.data);
                self.local.insert(key.to_string(), entry);
                Some(data)
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L2 GET failed, treating as miss");
                self.l2_errors.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Typed lookup. Undecodable entries are dropped and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.get_raw(key).await?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                self.local.remove(key);
                None
            }
        }
    }

    /// Store a value in L1 and L2.
    ///
    /// The L2 write is awaited so a subsequent `get` on another instance can
    /// observe it; a failed L2 write still leaves the L1 entry in place.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let data = match serde_json::to_vec(value) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        self.local.insert(
            key.to_string(),
            CachedEntry::new(data.clone(), ttl.min(self.local_ttl)),
        );

        if let Err(e) = self.remote.put(key, data, ttl).await {
            tracing::warn!(key = %key, error = %e, "L2 SET failed");
            self.l2_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set (L1+L2)");
        }
    }

    /// Remove a key from both levels.
    pub async fn delete(&self, key: &str) {
        self.local.remove(key);
        if let Err(e) = self.remote.delete(key).await {
            tracing::warn!(key = %key, error = %e, "L2 DEL failed");
            self.l2_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether the key is still live in L2.
    ///
    /// Probes L2 only. A failed probe answers `false` so callers that evict
    /// on absence fail toward eviction.
    pub async fn exists(&self, key: &str) -> bool {
        match self.remote.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L2 EXISTS failed, treating as expired");
                self.l2_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Drop expired L1 entries. Returns the number removed.
    pub fn cleanup_local(&self) -> usize {
        let mut removed = 0;
        self.local.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Ask L2 to drop its expired entries. Failures count as nothing removed.
    pub async fn purge_remote(&self) -> usize {
        match self.remote.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "L2 purge failed");
                self.l2_errors.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            l1_entries: self.local.len(),
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
        }
    }
}
