//! The optimization engine.
//!
//! ```text
//! CACHE_LOOKUP ─hit──────────────────────────────────────────► RETURN
//!      │ miss
//!      ▼
//!   PREDICT ─confident──► RETURN (+ detached shadow validation)
//!      │ not confident
//!      ▼
//!  size > batch_threshold ? BATCH : PARALLEL (index first)
//!      │
//!      ▼
//!  CACHE_WRITE ─────────────────────────────────────────────► RETURN
//! ```
//!
//! Everything after the empty-set check runs under `validation_deadline`,
//! cache reads and writes included. Any error or panic on the way, or the
//! deadline elapsing, ends in one direct call to the authoritative validator
//! whose result is returned unchanged.
//!
//! Concurrent misses for the same request are not deduplicated; each one
//! reaches the authoritative validator.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use serde::Serialize;
use time::OffsetDateTime;

use crate::AccelResult;
use crate::cache::keys::{request_id, validation_key};
use crate::cache::{CacheTier, DistributedCache};
use crate::config::OptimizationConfig;
use crate::error::AccelError;
use crate::fanout::FanOutValidator;
use crate::hot_data::HotDataStore;
use crate::index::PermissionIndexStore;
use crate::maintenance::MaintenanceSweeper;
use crate::path::{PathStep, PathTrace, ValidationPathCache};
use crate::predictor::Predictor;
use crate::scheduler::Scheduler;
use crate::types::{PermissionSet, PrincipalId, ValidationResult, ValidationSource};
use crate::validator::AuthoritativeValidator;

/// Point-in-time view of the engine's caches and counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationStatistics {
    pub matrix_cache_size: usize,
    pub index_cache_size: usize,
    pub hot_data_cache_size: usize,
    pub path_cache_size: usize,
    /// Entries in the in-process L1 tier.
    pub local_cache_size: usize,
    /// Cache hits over accesses recorded in hot data.
    pub cache_hit_rate: f64,
    pub predictions_served: u64,
    pub mispredictions: u64,
    /// Requests answered by a direct authoritative call after a failure.
    pub fallbacks: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

pub struct OptimizationEngine {
    config: Arc<OptimizationConfig>,
    tier: Arc<CacheTier>,
    hot_data: HotDataStore,
    index: PermissionIndexStore,
    paths: ValidationPathCache,
    predictor: Predictor,
    fanout: FanOutValidator,
    sweeper: Arc<MaintenanceSweeper>,
    scheduler: Arc<dyn Scheduler>,
    fallbacks: AtomicU64,
}

impl OptimizationEngine {
    /// Build an engine over a distributed tier. Fails if `config` is invalid.
    pub fn new(
        config: OptimizationConfig,
        remote: Arc<dyn DistributedCache>,
        scheduler: Arc<dyn Scheduler>,
    ) -> AccelResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let tier = Arc::new(CacheTier::new(remote, config.local_cache_ttl));
        let hot_data = HotDataStore::new(
            Arc::clone(&tier),
            config.hot_data_cache_ttl,
            config.hot_data_sync_every,
        );
        let index = PermissionIndexStore::new(
            Arc::clone(&tier),
            config.index_cache_ttl,
            config.matrix_cache_ttl,
        );
        let paths = ValidationPathCache::new(Arc::clone(&tier), config.optimization_cache_ttl);
        let predictor = Predictor::new(
            config.prediction_confidence_threshold,
            config.optimization_cache_ttl,
            hot_data.clone(),
            Arc::clone(&tier),
        );
        let fanout = FanOutValidator::new(
            Arc::clone(&tier),
            index.clone(),
            hot_data.clone(),
            config.worker_pool_size,
            config.optimization_cache_ttl,
            config.parallel_threshold,
        );
        let sweeper = Arc::new(MaintenanceSweeper::new(
            Arc::clone(&tier),
            index.clone(),
            paths.clone(),
            hot_data.clone(),
            config.maintenance_interval,
        ));

        tracing::info!(
            batch_threshold = config.batch_threshold,
            parallel_threshold = config.parallel_threshold,
            prediction = config.enable_prediction,
            workers = config.worker_pool_size,
            "Permission optimization engine initialized"
        );

        Ok(Self {
            config,
            tier,
            hot_data,
            index,
            paths,
            predictor,
            fanout,
            sweeper,
            scheduler,
            fallbacks: AtomicU64::new(0),
        })
    }

    /// Validate `permissions` for `principal` through the fastest available
    /// path.
    ///
    /// Never fails: if any optimized path errors or panics, `validator` is
    /// called directly and its result returned verbatim. A result with
    /// `source == Prediction` has **not** been confirmed yet; see
    /// [`crate::predictor`] for the implications.
    pub async fn optimize_validation(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: Arc<dyn AuthoritativeValidator>,
    ) -> ValidationResult {
        let attempt = AssertUnwindSafe(self.try_optimize(principal, permissions, &validator))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(result)) => result,
            Ok(Err(e @ AccelError::DeadlineExceeded { .. })) => {
                tracing::error!(
                    principal = %principal,
                    error = %e,
                    "Optimized validation timed out, falling back"
                );
                self.fallback(principal, permissions, validator.as_ref()).await
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    principal = %principal,
                    category = %e.category(),
                    error = %e,
                    "Optimized validation failed, falling back"
                );
                self.fallback(principal, permissions, validator.as_ref()).await
            }
            Err(_) => {
                tracing::error!(
                    principal = %principal,
                    "Optimized validation panicked, falling back"
                );
                self.fallback(principal, permissions, validator.as_ref()).await
            }
        }
    }

    async fn fallback(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: &dyn AuthoritativeValidator,
    ) -> ValidationResult {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        validator.validate(principal, permissions).await
    }

    async fn try_optimize(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: &Arc<dyn AuthoritativeValidator>,
    ) -> AccelResult<ValidationResult> {
        // Nothing to split or cache
        if permissions.is_empty() {
            return Ok(validator.validate(principal, permissions).await);
        }

        let deadline = self.config.validation_deadline;
        tokio::time::timeout(deadline, self.orchestrate(principal, permissions, validator))
            .await
            .map_err(|_| AccelError::DeadlineExceeded { deadline })?
    }

    /// Cache lookup, prediction, fan-out and write-back. Every step, cache
    /// I/O included, runs under the caller's deadline.
    async fn orchestrate(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: &Arc<dyn AuthoritativeValidator>,
    ) -> AccelResult<ValidationResult> {
        let mut trace = PathTrace::start();
        let key = validation_key(principal, permissions);

        trace.push(PathStep::CacheLookup);
        if let Some(cached) = self.tier.get::<ValidationResult>(&key).await {
            self.hot_data
                .record_access(principal, permissions, true)
                .await;
            return Ok(cached.as_cache_hit());
        }

        if self.config.enable_prediction {
            trace.push(PathStep::Predict);
            if let Some(predicted) = self.predictor.predict(principal, permissions).await {
                self.hot_data
                    .record_access(principal, permissions, false)
                    .await;
                self.scheduler.spawn_detached(
                    "shadow_validation",
                    self.predictor.shadow_task(
                        principal.clone(),
                        permissions.clone(),
                        predicted.clone(),
                        Arc::clone(validator),
                    ),
                );
                self.paths
                    .record(trace.finish(request_id(principal, permissions), predicted.confidence))
                    .await;
                return Ok(predicted);
            }
        }

        let result = self
            .fan_out(principal, permissions, validator, &mut trace)
            .await?;

        self.tier
            .put(&key, &result, self.config.optimization_cache_ttl)
            .await;
        self.hot_data
            .record_access(principal, permissions, false)
            .await;
        // Fan-out paths record their own validator calls per permission
        if result.source == ValidationSource::Authoritative {
            self.hot_data.record_outcomes(&result).await;
        }
        self.paths
            .record(trace.finish(request_id(principal, permissions), None))
            .await;

        Ok(result)
    }

    async fn fan_out(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: &Arc<dyn AuthoritativeValidator>,
        trace: &mut PathTrace,
    ) -> AccelResult<ValidationResult> {
        let size = permissions.len();

        if self.config.enable_batch_validation && size > self.config.batch_threshold {
            trace.push(PathStep::Batch);
            return self
                .fanout
                .validate_batch(principal, permissions, Arc::clone(validator))
                .await;
        }

        if self.config.enable_parallel_validation {
            let result = self
                .fanout
                .validate_parallel(principal, permissions, Arc::clone(validator))
                .await?;
            trace.push(if result.source == ValidationSource::Index {
                PathStep::Index
            } else {
                PathStep::Parallel
            });
            return Ok(result);
        }

        trace.push(PathStep::Authoritative);
        let result = validator.validate(principal, permissions).await;
        Ok(ValidationResult {
            source: ValidationSource::Authoritative,
            ..result
        })
    }

    /// Install a known full permission set as the principal's index and matrix.
    pub async fn refresh_index(&self, principal: &PrincipalId, permissions: PermissionSet) {
        self.index.refresh(principal, permissions).await;
    }

    /// Forget everything derived for a principal: index, matrix and hot data.
    ///
    /// Cached request results expire on their own TTL.
    pub async fn invalidate_principal(&self, principal: &PrincipalId) {
        self.index.invalidate(principal).await;
        self.hot_data.remove(principal).await;
        tracing::info!(principal = %principal, "Invalidated principal optimization state");
    }

    pub fn get_optimization_statistics(&self) -> OptimizationStatistics {
        let (accesses, hits) = self.hot_data.totals();
        let cache_hit_rate = if accesses == 0 {
            0.0
        } else {
            hits as f64 / accesses as f64
        };

        OptimizationStatistics {
            matrix_cache_size: self.index.matrix_len(),
            index_cache_size: self.index.index_len(),
            hot_data_cache_size: self.hot_data.len(),
            path_cache_size: self.paths.len(),
            local_cache_size: self.tier.stats().l1_entries,
            cache_hit_rate,
            predictions_served: self.predictor.predictions_served(),
            mispredictions: self.predictor.mispredictions(),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            last_update: OffsetDateTime::now_utc(),
        }
    }

    /// Start the periodic maintenance sweep on the engine's scheduler.
    pub fn start_maintenance(&self) {
        let sweeper = Arc::clone(&self.sweeper);
        self.scheduler
            .spawn_detached("maintenance_sweep", Box::pin(async move { sweeper.run().await }));
    }

    pub fn sweeper(&self) -> &Arc<MaintenanceSweeper> {
        &self.sweeper
    }

    pub fn hot_data(&self) -> &HotDataStore {
        &self.hot_data
    }

    pub fn index(&self) -> &PermissionIndexStore {
        &self.index
    }

    pub fn paths(&self) -> &ValidationPathCache {
        &self.paths
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }
}

impl Drop for OptimizationEngine {
    fn drop(&mut self) {
        self.sweeper.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryDistributedCache;
    use crate::scheduler::TokioScheduler;
    use crate::types::permission_set;
    use crate::validator::validator_fn;

    fn engine(config: OptimizationConfig) -> OptimizationEngine {
        OptimizationEngine::new(
            config,
            Arc::new(InMemoryDistributedCache::new()),
            Arc::new(TokioScheduler::new()),
        )
        .unwrap()
    }

    fn allow_all() -> Arc<dyn AuthoritativeValidator> {
        validator_fn(|principal, permissions| async move {
            ValidationResult::allowed(principal, permissions, ValidationSource::Authoritative)
        })
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = OptimizationConfig {
            batch_threshold: 0,
            ..Default::default()
        };
        let result = OptimizationEngine::new(
            config,
            Arc::new(InMemoryDistributedCache::new()),
            Arc::new(TokioScheduler::new()),
        );
        assert!(matches!(result, Err(AccelError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let engine = engine(OptimizationConfig::default());
        let principal = PrincipalId::from(42);
        let permissions = permission_set(["doc:read"]);

        let first = engine
            .optimize_validation(&principal, &permissions, allow_all())
            .await;
        assert_eq!(first.source, ValidationSource::Parallel);

        let second = engine
            .optimize_validation(&principal, &permissions, allow_all())
            .await;
        assert_eq!(second.source, ValidationSource::Cache);
        assert!(second.valid);

        let path = engine.paths().get("42:doc:read").unwrap();
        assert_eq!(
            path.steps,
            vec![PathStep::CacheLookup, PathStep::Predict, PathStep::Parallel]
        );
    }

    #[tokio::test]
    async fn test_all_fan_out_disabled_calls_validator() {
        let config = OptimizationConfig {
            enable_prediction: false,
            enable_batch_validation: false,
            enable_parallel_validation: false,
            ..Default::default()
        };
        let engine = engine(config);

        let result = engine
            .optimize_validation(&PrincipalId::from(1), &permission_set(["a", "b"]), allow_all())
            .await;
        assert_eq!(result.source, ValidationSource::Authoritative);
        assert!(result.valid);
    }

    #[tokio::test]
    async fn test_statistics_track_hits() {
        let engine = engine(OptimizationConfig::default());
        let principal = PrincipalId::from(5);
        let permissions = permission_set(["doc:read"]);

        for _ in 0..4 {
            engine
                .optimize_validation(&principal, &permissions, allow_all())
                .await;
        }

        let stats = engine.get_optimization_statistics();
        assert_eq!(stats.hot_data_cache_size, 1);
        assert_eq!(stats.matrix_cache_size, 1);
        assert_eq!(stats.path_cache_size, 1);
        assert!((stats.cache_hit_rate - 0.75).abs() < 1e-9);
        assert_eq!(stats.fallbacks, 0);
    }

    #[tokio::test]
    async fn test_invalidate_principal() {
        let engine = engine(OptimizationConfig::default());
        let principal = PrincipalId::from(5);
        engine
            .refresh_index(&principal, permission_set(["doc:read"]))
            .await;
        engine
            .optimize_validation(&principal, &permission_set(["doc:read"]), allow_all())
            .await;

        engine.invalidate_principal(&principal).await;

        let stats = engine.get_optimization_statistics();
        assert_eq!(stats.index_cache_size, 0);
        assert_eq!(stats.matrix_cache_size, 0);
        assert_eq!(stats.hot_data_cache_size, 0);
    }
}
