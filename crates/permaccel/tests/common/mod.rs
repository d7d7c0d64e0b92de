//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use permaccel::{
    AuthoritativeValidator, CacheError, DistributedCache, HotDataSnapshot, InMemoryDistributedCache,
    OptimizationConfig, OptimizationEngine, PermissionSet, PermissionStatsSnapshot, PrincipalId,
    Scheduler, ValidationResult, ValidationSource,
};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Mock validator
// ============================================================================

/// Grants everything except `denied`, counting calls.
#[derive(Default)]
pub struct MockValidator {
    denied: PermissionSet,
    known: Option<PermissionSet>,
    panic_on_single: bool,
    single_delay: Option<Duration>,
    calls: AtomicUsize,
    single_calls: AtomicUsize,
}

impl MockValidator {
    pub fn allowing_all() -> Self {
        Self::default()
    }

    pub fn denying<I, S>(denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: permaccel::permission_set(denied),
            ..Default::default()
        }
    }

    pub fn with_known<I, S>(mut self, known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known = Some(permaccel::permission_set(known));
        self
    }

    /// Panic whenever a single permission is validated.
    pub fn panicking_on_single(mut self) -> Self {
        self.panic_on_single = true;
        self
    }

    /// Delay single-permission validations only.
    pub fn slow_singles(mut self, delay: Duration) -> Self {
        self.single_delay = Some(delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    /// What the validator answers for a request, without counting it.
    pub fn expected(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
    ) -> ValidationResult {
        let (unmatched, matched): (PermissionSet, PermissionSet) = permissions
            .iter()
            .cloned()
            .partition(|p| self.denied.contains(p));
        ValidationResult::from_partition(
            principal.clone(),
            permissions.clone(),
            matched,
            unmatched,
            ValidationSource::Authoritative,
        )
    }
}

#[async_trait]
impl AuthoritativeValidator for MockValidator {
    async fn validate(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
    ) -> ValidationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if permissions.len() == 1 {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_single {
                panic!("validator exploded");
            }
            if let Some(delay) = self.single_delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.expected(principal, permissions)
    }

    async fn known_permissions(&self, _principal: &PrincipalId) -> Option<PermissionSet> {
        self.known.clone()
    }
}

pub fn as_validator(mock: &Arc<MockValidator>) -> Arc<dyn AuthoritativeValidator> {
    mock.clone()
}

// ============================================================================
// Failing distributed cache
// ============================================================================

/// Every call fails.
#[derive(Default)]
pub struct FailingDistributedCache {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DistributedCache for FailingDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::timeout(key))
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::unavailable("connection refused"))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::timeout(key))
    }
}

// ============================================================================
// Slow distributed cache
// ============================================================================

/// In-memory tier where every call first sleeps for `delay`.
pub struct SlowDistributedCache {
    inner: InMemoryDistributedCache,
    delay: Duration,
}

impl SlowDistributedCache {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryDistributedCache::new(),
            delay,
        }
    }
}

#[async_trait]
impl DistributedCache for SlowDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.exists(key).await
    }
}

// ============================================================================
// Scheduler that can be waited on
// ============================================================================

#[derive(Default)]
pub struct TrackingScheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackingScheduler {
    /// Await every task spawned so far.
    pub async fn wait_idle(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn spawned(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

impl Scheduler for TrackingScheduler {
    fn spawn_detached(&self, _name: &'static str, task: BoxFuture<'static, ()>) {
        let handle = tokio::spawn(task);
        self.handles.lock().unwrap().push(handle);
    }
}

// ============================================================================
// Engine fixtures
// ============================================================================

pub struct Harness {
    pub engine: OptimizationEngine,
    pub remote: Arc<InMemoryDistributedCache>,
    pub scheduler: Arc<TrackingScheduler>,
}

pub fn harness(config: OptimizationConfig) -> Harness {
    init_tracing();
    let remote = Arc::new(InMemoryDistributedCache::new());
    let scheduler = Arc::new(TrackingScheduler::default());
    let engine = OptimizationEngine::new(config, remote.clone(), scheduler.clone())
        .expect("valid config");
    Harness {
        engine,
        remote,
        scheduler,
    }
}

pub fn failing_harness(config: OptimizationConfig) -> (OptimizationEngine, Arc<TrackingScheduler>) {
    init_tracing();
    let scheduler = Arc::new(TrackingScheduler::default());
    let engine = OptimizationEngine::new(
        config,
        Arc::new(FailingDistributedCache::default()),
        scheduler.clone(),
    )
    .expect("valid config");
    (engine, scheduler)
}

pub fn slow_harness(config: OptimizationConfig, delay: Duration) -> OptimizationEngine {
    init_tracing();
    OptimizationEngine::new(
        config,
        Arc::new(SlowDistributedCache::new(delay)),
        Arc::new(TrackingScheduler::default()),
    )
    .expect("valid config")
}

/// Hot data with a single permission's history.
pub fn history(
    principal: &PrincipalId,
    permission: &str,
    accesses: u64,
    validations: u64,
    successes: u64,
) -> HotDataSnapshot {
    let mut snapshot = HotDataSnapshot {
        principal: principal.clone(),
        total_access_count: accesses,
        cache_hit_count: 0,
        permission_stats: Default::default(),
        last_update_time: OffsetDateTime::now_utc(),
    };
    snapshot.permission_stats.insert(
        permission.to_string(),
        PermissionStatsSnapshot {
            access_count: accesses,
            cache_hit_count: 0,
            validation_count: validations,
            success_count: successes,
            last_access_time: OffsetDateTime::now_utc(),
        },
    );
    snapshot
}
