//! Per-principal access statistics ("hot data") behind prediction.
//!
//! Counters are individual atomics. There is no cross-field consistency: a
//! reader may observe an access count that already includes a request whose
//! validation outcome has not been recorded yet. The numbers are a heuristic.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::CacheTier;
use crate::cache::keys::hot_data_key;
use crate::types::{PermissionSet, PrincipalId, ValidationResult};

/// Minimum accesses before a permission contributes to confidence.
pub const MIN_ACCESS_FOR_CONFIDENCE: u64 = 5;

/// Minimum accesses before a permission takes part in a prediction vote.
pub const MIN_ACCESS_FOR_PREDICTION: u64 = 3;

/// Success rate (exclusive) above which a permission votes "granted".
pub const SUCCESS_RATE_THRESHOLD: f64 = 0.7;

/// Fraction (exclusive) of granted votes needed to predict a valid request.
pub const PREDICTION_VOTE_THRESHOLD: f64 = 0.7;

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn millis_to_datetime(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

// ============================================================================
// Permission statistics
// ============================================================================

/// Counters for one permission of one principal.
#[derive(Debug)]
pub struct PermissionStats {
    access_count: AtomicU64,
    cache_hit_count: AtomicU64,
    validation_count: AtomicU64,
    success_count: AtomicU64,
    last_access_ms: AtomicI64,
}

impl PermissionStats {
    fn new() -> Self {
        Self::from_snapshot(&PermissionStatsSnapshot::default())
    }

    fn from_snapshot(snapshot: &PermissionStatsSnapshot) -> Self {
        Self {
            access_count: AtomicU64::new(snapshot.access_count),
            cache_hit_count: AtomicU64::new(snapshot.cache_hit_count),
            validation_count: AtomicU64::new(snapshot.validation_count),
            success_count: AtomicU64::new(snapshot.success_count),
            last_access_ms: AtomicI64::new(
                (snapshot.last_access_time.unix_timestamp_nanos() / 1_000_000) as i64,
            ),
        }
    }

    fn record_access(&self, cache_hit: bool) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
        }
        self.last_access_ms.store(now_millis(), Ordering::Relaxed);
    }

    fn record_validation(&self, success: bool) {
        self.validation_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// `success / validations`, or 0 before the first validation.
    pub fn success_rate(&self) -> f64 {
        let validations = self.validation_count.load(Ordering::Relaxed);
        if validations == 0 {
            return 0.0;
        }
        let successes = self.success_count.load(Ordering::Relaxed);
        (successes as f64 / validations as f64).min(1.0)
    }

    /// Mean of access confidence (`min(access / 100, 1)`) and success rate.
    ///
    /// Zero below [`MIN_ACCESS_FOR_CONFIDENCE`] accesses.
    pub fn confidence(&self) -> f64 {
        let accesses = self.access_count();
        if accesses < MIN_ACCESS_FOR_CONFIDENCE {
            return 0.0;
        }
        let access_confidence = (accesses as f64 / 100.0).min(1.0);
        (access_confidence + self.success_rate()) / 2.0
    }

    pub fn snapshot(&self) -> PermissionStatsSnapshot {
        PermissionStatsSnapshot {
            access_count: self.access_count(),
            cache_hit_count: self.cache_hit_count.load(Ordering::Relaxed),
            validation_count: self.validation_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            last_access_time: millis_to_datetime(self.last_access_ms.load(Ordering::Relaxed)),
        }
    }
}

/// Serializable form of [`PermissionStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatsSnapshot {
    pub access_count: u64,
    pub cache_hit_count: u64,
    pub validation_count: u64,
    pub success_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_access_time: OffsetDateTime,
}

impl Default for PermissionStatsSnapshot {
    fn default() -> Self {
        Self {
            access_count: 0,
            cache_hit_count: 0,
            validation_count: 0,
            success_count: 0,
            last_access_time: OffsetDateTime::now_utc(),
        }
    }
}

// ============================================================================
// Hot data
// ============================================================================

/// Statistics for one principal.
#[derive(Debug)]
pub struct HotData {
    principal: PrincipalId,
    total_access_count: AtomicU64,
    cache_hit_count: AtomicU64,
    permissions: DashMap<String, PermissionStats>,
    last_update_ms: AtomicI64,
}

impl HotData {
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            principal,
            total_access_count: AtomicU64::new(0),
            cache_hit_count: AtomicU64::new(0),
            permissions: DashMap::new(),
            last_update_ms: AtomicI64::new(now_millis()),
        }
    }

    pub fn from_snapshot(snapshot: &HotDataSnapshot) -> Self {
        let permissions = snapshot
            .permission_stats
            .iter()
            .map(|(permission, stats)| (permission.clone(), PermissionStats::from_snapshot(stats)))
            .collect();

        Self {
            principal: snapshot.principal.clone(),
            total_access_count: AtomicU64::new(snapshot.total_access_count),
            cache_hit_count: AtomicU64::new(snapshot.cache_hit_count),
            permissions,
            last_update_ms: AtomicI64::new(
                (snapshot.last_update_time.unix_timestamp_nanos() / 1_000_000) as i64,
            ),
        }
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    pub fn total_access_count(&self) -> u64 {
        self.total_access_count.load(Ordering::Relaxed)
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.cache_hit_count.load(Ordering::Relaxed)
    }

    /// Record one request. Returns the principal's new total access count.
    pub fn record_access(&self, permissions: &PermissionSet, cache_hit: bool) -> u64 {
        let total = self.total_access_count.fetch_add(1, Ordering::Relaxed) + 1;
        if cache_hit {
            self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
        }

        for permission in permissions {
            self.permissions
                .entry(permission.clone())
                .or_insert_with(PermissionStats::new)
                .record_access(cache_hit);
        }

        self.touch();
        total
    }

    /// Feed an authoritative outcome into the per-permission success counters.
    pub fn update_model(&self, permissions: &PermissionSet, result: &ValidationResult) {
        for permission in permissions {
            self.permissions
                .entry(permission.clone())
                .or_insert_with(PermissionStats::new)
                .record_validation(result.grants(permission));
        }
        self.touch();
    }

    /// Mean confidence over the permissions with enough history; 0 if none.
    pub fn calculate_prediction_confidence(&self, permissions: &PermissionSet) -> f64 {
        let mut total = 0.0;
        let mut counted = 0usize;

        for permission in permissions {
            if let Some(stats) = self.permissions.get(permission) {
                if stats.access_count() >= MIN_ACCESS_FOR_CONFIDENCE {
                    total += stats.confidence();
                    counted += 1;
                }
            }
        }

        if counted == 0 {
            0.0
        } else {
            total / counted as f64
        }
    }

    /// Majority vote of permissions with enough history.
    ///
    /// `false` when no permission qualifies.
    pub fn predict_validation(&self, permissions: &PermissionSet) -> bool {
        let mut voters = 0usize;
        let mut granted = 0usize;

        for permission in permissions {
            if let Some(stats) = self.permissions.get(permission) {
                if stats.access_count() >= MIN_ACCESS_FOR_PREDICTION {
                    voters += 1;
                    if stats.success_rate() > SUCCESS_RATE_THRESHOLD {
                        granted += 1;
                    }
                }
            }
        }

        voters > 0 && (granted as f64 / voters as f64) > PREDICTION_VOTE_THRESHOLD
    }

    pub fn stats_for(&self, permission: &str) -> Option<PermissionStatsSnapshot> {
        self.permissions.get(permission).map(|stats| stats.snapshot())
    }

    pub fn last_update(&self) -> OffsetDateTime {
        millis_to_datetime(self.last_update_ms.load(Ordering::Relaxed))
    }

    /// Whether nothing touched this principal within `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        let idle_ms = now_millis() - self.last_update_ms.load(Ordering::Relaxed);
        idle_ms > ttl.as_millis() as i64
    }

    pub fn snapshot(&self) -> HotDataSnapshot {
        HotDataSnapshot {
            principal: self.principal.clone(),
            total_access_count: self.total_access_count(),
            cache_hit_count: self.cache_hit_count(),
            permission_stats: self
                .permissions
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().snapshot()))
                .collect(),
            last_update_time: self.last_update(),
        }
    }

    fn touch(&self) {
        self.last_update_ms.store(now_millis(), Ordering::Relaxed);
    }
}

/// Serializable form of [`HotData`], persisted under the `hot:` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotDataSnapshot {
    pub principal: PrincipalId,
    pub total_access_count: u64,
    pub cache_hit_count: u64,
    #[serde(default)]
    pub permission_stats: std::collections::BTreeMap<String, PermissionStatsSnapshot>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update_time: OffsetDateTime,
}

// ============================================================================
// Store
// ============================================================================

/// All principals' hot data, hydrated from and synced to the cache tier.
#[derive(Clone)]
pub struct HotDataStore {
    entries: Arc<DashMap<PrincipalId, Arc<HotData>>>,
    tier: Arc<CacheTier>,
    ttl: Duration,
    sync_every: u64,
}

impl HotDataStore {
    pub fn new(tier: Arc<CacheTier>, ttl: Duration, sync_every: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            tier,
            ttl,
            sync_every: sync_every.max(1),
        }
    }

    /// In-process entry only, no hydration.
    pub fn get(&self, principal: &PrincipalId) -> Option<Arc<HotData>> {
        self.entries.get(principal).map(|entry| Arc::clone(entry.value()))
    }

    /// Entry for the principal, loaded from the cache tier on first use.
    pub async fn get_or_hydrate(&self, principal: &PrincipalId) -> Arc<HotData> {
        if let Some(existing) = self.get(principal) {
            return existing;
        }

        let loaded = self
            .tier
            .get::<HotDataSnapshot>(&hot_data_key(principal))
            .await
            .map(|snapshot| {
                tracing::debug!(principal = %principal, "Hydrated hot data from cache tier");
                HotData::from_snapshot(&snapshot)
            })
            .unwrap_or_else(|| HotData::new(principal.clone()));

        // A concurrent hydrate may have won; keep whichever landed first
        Arc::clone(
            self.entries
                .entry(principal.clone())
                .or_insert_with(|| Arc::new(loaded))
                .value(),
        )
    }

    /// Replace the principal's hot data.
    pub fn insert(&self, hot_data: HotData) {
        self.entries
            .insert(hot_data.principal().clone(), Arc::new(hot_data));
    }

    /// Record an access, syncing to the cache tier every `sync_every` accesses.
    pub async fn record_access(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        cache_hit: bool,
    ) {
        let hot_data = self.get_or_hydrate(principal).await;
        let total = hot_data.record_access(permissions, cache_hit);
        if total % self.sync_every == 0 {
            self.persist(&hot_data).await;
        }
    }

    /// Record authoritative outcomes without forcing a sync.
    pub async fn record_outcomes(&self, result: &ValidationResult) {
        let hot_data = self.get_or_hydrate(&result.principal).await;
        hot_data.update_model(&result.permissions, result);
    }

    /// Correct the model with an authoritative result and sync immediately.
    pub async fn update_model(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        result: &ValidationResult,
    ) {
        let hot_data = self.get_or_hydrate(principal).await;
        hot_data.update_model(permissions, result);
        self.persist(&hot_data).await;
    }

    pub async fn persist(&self, hot_data: &HotData) {
        self.tier
            .put(
                &hot_data_key(hot_data.principal()),
                &hot_data.snapshot(),
                self.ttl,
            )
            .await;
    }

    /// Drop the principal's hot data from both tiers.
    pub async fn remove(&self, principal: &PrincipalId) {
        self.entries.remove(principal);
        self.tier.delete(&hot_data_key(principal)).await;
    }

    /// Drop in-process entries idle for longer than the hot-data TTL.
    pub fn evict_stale(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, hot_data| {
            if hot_data.is_stale(self.ttl) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(total accesses, cache hits)` across all principals.
    pub fn totals(&self) -> (u64, u64) {
        self.entries.iter().fold((0, 0), |(accesses, hits), entry| {
            (
                accesses + entry.total_access_count(),
                hits + entry.cache_hit_count(),
            )
        })
    }
}
