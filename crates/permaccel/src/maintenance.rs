//! Periodic eviction of in-process cache structures.
//!
//! Matrix, index and path entries are kept only while their distributed-tier
//! key still exists. This is an existence probe, not a TTL mirror: a failed
//! probe counts as "expired", so an unreachable tier drains local memory
//! rather than letting it grow.
//!
//! Each sweep also asks the distributed tier to purge its own expired
//! entries, which matters for the in-process tier where nothing else would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::cache::CacheTier;
use crate::cache::keys::{index_key, matrix_key, path_key};
use crate::hot_data::HotDataStore;
use crate::index::PermissionIndexStore;
use crate::path::ValidationPathCache;

// =============================================================================
// Sweep Report
// =============================================================================

/// What a single sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub matrix_evicted: usize,
    pub index_evicted: usize,
    pub path_evicted: usize,
    pub hot_data_evicted: usize,
    /// Expired L1 entries dropped from the cache tier.
    pub local_expired: usize,
    /// Expired entries the distributed tier dropped on request.
    pub remote_expired: usize,
    pub duration: Duration,
}

impl SweepReport {
    pub fn total_evicted(&self) -> usize {
        self.matrix_evicted
            + self.index_evicted
            + self.path_evicted
            + self.hot_data_evicted
            + self.local_expired
            + self.remote_expired
    }
}

/// Lifetime counters of the sweeper.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub sweeps_completed: u64,
    pub entries_evicted: u64,
}

// =============================================================================
// Maintenance Sweeper
// =============================================================================

pub struct MaintenanceSweeper {
    tier: Arc<CacheTier>,
    index: PermissionIndexStore,
    paths: ValidationPathCache,
    hot_data: HotDataStore,
    interval: Duration,

    shutdown: AtomicBool,
    wake: Notify,

    sweeps_completed: AtomicU64,
    entries_evicted: AtomicU64,
}

impl MaintenanceSweeper {
    pub fn new(
        tier: Arc<CacheTier>,
        index: PermissionIndexStore,
        paths: ValidationPathCache,
        hot_data: HotDataStore,
        interval: Duration,
    ) -> Self {
        Self {
            tier,
            index,
            paths,
            hot_data,
            interval,
            shutdown: AtomicBool::new(false),
            wake: Notify::new(),
            sweeps_completed: AtomicU64::new(0),
            entries_evicted: AtomicU64::new(0),
        }
    }

    /// Run one sweep over every in-process structure.
    pub async fn sweep_once(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        for principal in self.index.matrix_principals() {
            let live = self.tier.exists(&matrix_key(&principal)).await;
            if !live && self.index.evict_matrix(&principal) {
                report.matrix_evicted += 1;
            }
        }

        for principal in self.index.indexed_principals() {
            let live = self.tier.exists(&index_key(&principal)).await;
            if !live && self.index.evict_index(&principal) {
                report.index_evicted += 1;
            }
        }

        for path_id in self.paths.path_ids() {
            if !self.tier.exists(&path_key(&path_id)).await && self.paths.evict(&path_id) {
                report.path_evicted += 1;
            }
        }

        report.hot_data_evicted = self.hot_data.evict_stale();
        report.local_expired = self.tier.cleanup_local();
        report.remote_expired = self.tier.purge_remote().await;
        report.duration = started.elapsed();

        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
        self.entries_evicted
            .fetch_add(report.total_evicted() as u64, Ordering::Relaxed);

        tracing::info!(
            matrix = report.matrix_evicted,
            index = report.index_evicted,
            path = report.path_evicted,
            hot_data = report.hot_data_evicted,
            local = report.local_expired,
            remote = report.remote_expired,
            duration_ms = report.duration.as_millis() as u64,
            "Cache maintenance sweep completed"
        );

        report
    }

    /// Sweep every `interval` until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Cache maintenance started");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("Cache maintenance shutting down");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Stop [`run`](Self::run) at its next wake-up.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SweepStats {
        SweepStats {
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
        }
    }
}
