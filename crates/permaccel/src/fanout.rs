//! Grouped (batch) and per-permission (parallel) fan-out validation.
//!
//! Both paths split a request, validate the parts concurrently on a bounded
//! pool, and combine them: AND over validity, union over the permission sets.
//! A permit is taken before a task is spawned, so neither running nor queued
//! tasks exceed the pool size regardless of request size. A panicking or
//! cancelled sub-task fails the whole fan-out with [`AccelError::TaskFailed`];
//! partial results are never combined.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::AccelResult;
use crate::cache::CacheTier;
use crate::cache::keys::{group_cache_key, single_key};
use crate::error::AccelError;
use crate::hot_data::HotDataStore;
use crate::index::PermissionIndexStore;
use crate::types::{PermissionSet, PrincipalId, ValidationResult, ValidationSource, group_key};
use crate::validator::AuthoritativeValidator;

/// Partition permissions by [`group_key`], in group order.
pub fn partition_by_group(permissions: &PermissionSet) -> BTreeMap<String, PermissionSet> {
    let mut groups: BTreeMap<String, PermissionSet> = BTreeMap::new();
    for permission in permissions {
        groups
            .entry(group_key(permission).to_string())
            .or_default()
            .insert(permission.clone());
    }
    groups
}

/// Combine partial results for `permissions`.
pub fn combine(
    principal: &PrincipalId,
    permissions: &PermissionSet,
    parts: &[ValidationResult],
    source: ValidationSource,
) -> ValidationResult {
    let mut matched = PermissionSet::new();
    let mut unmatched = PermissionSet::new();
    for part in parts {
        matched.extend(part.matched.iter().cloned());
        unmatched.extend(part.unmatched.iter().cloned());
    }

    let mut combined = ValidationResult::from_partition(
        principal.clone(),
        permissions.clone(),
        matched,
        unmatched,
        source,
    );
    combined.valid = combined.valid && parts.iter().all(|part| part.valid);
    combined
}

#[derive(Clone)]
pub struct FanOutValidator {
    tier: Arc<CacheTier>,
    index: PermissionIndexStore,
    hot_data: HotDataStore,
    pool: Arc<Semaphore>,
    optimization_ttl: Duration,
    parallel_threshold: usize,
}

impl FanOutValidator {
    pub fn new(
        tier: Arc<CacheTier>,
        index: PermissionIndexStore,
        hot_data: HotDataStore,
        pool_size: usize,
        optimization_ttl: Duration,
        parallel_threshold: usize,
    ) -> Self {
        Self {
            tier,
            index,
            hot_data,
            pool: Arc::new(Semaphore::new(pool_size)),
            optimization_ttl,
            parallel_threshold,
        }
    }

    async fn permit(&self) -> AccelResult<OwnedSemaphorePermit> {
        Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| AccelError::task_failed("worker pool closed"))
    }

    // ------------------------------------------------------------------------
    // Batch
    // ------------------------------------------------------------------------

    /// Validate one task per group and wait for all of them.
    pub async fn validate_batch(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: Arc<dyn AuthoritativeValidator>,
    ) -> AccelResult<ValidationResult> {
        let groups = partition_by_group(permissions);
        tracing::debug!(
            principal = %principal,
            permissions = permissions.len(),
            groups = groups.len(),
            "Batch validation"
        );

        let mut tasks = JoinSet::new();
        for (group, members) in groups {
            let permit = self.permit().await?;
            let this = self.clone();
            let principal = principal.clone();
            let validator = Arc::clone(&validator);
            tasks.spawn(async move {
                let _permit = permit;
                this.validate_group(&principal, &group, &members, validator.as_ref())
                    .await
            });
        }

        let parts = join_parts(principal, tasks, "Group validation task failed").await?;
        Ok(combine(principal, permissions, &parts, ValidationSource::Batch))
    }

    /// Validate every member of a group, reusing a cached group result.
    ///
    /// All members are checked even after a denial so `unmatched` is exact.
    async fn validate_group(
        &self,
        principal: &PrincipalId,
        group: &str,
        members: &PermissionSet,
        validator: &dyn AuthoritativeValidator,
    ) -> AccelResult<ValidationResult> {
        let key = group_cache_key(principal, group, members);
        if let Some(cached) = self.tier.get::<ValidationResult>(&key).await {
            tracing::debug!(principal = %principal, group = %group, "Group cache hit");
            return Ok(cached);
        }

        let mut parts = Vec::with_capacity(members.len());
        for permission in members {
            parts.push(self.validate_single(principal, permission, validator).await);
        }

        let result = combine(principal, members, &parts, ValidationSource::Batch)
            .with_group_key(group);
        self.tier.put(&key, &result, self.optimization_ttl).await;
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Parallel
    // ------------------------------------------------------------------------

    /// Answer from the permission index if possible, otherwise validate one
    /// task per permission.
    ///
    /// Requests of at least `parallel_threshold` permissions are spawned onto
    /// the runtime; smaller ones are driven concurrently on the caller's task.
    pub async fn validate_parallel(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: Arc<dyn AuthoritativeValidator>,
    ) -> AccelResult<ValidationResult> {
        if let Some(result) = self.index.validate_with_index(principal, permissions).await {
            return Ok(result);
        }

        let parts = if permissions.len() >= self.parallel_threshold {
            self.spawn_singles(principal, permissions, validator).await?
        } else {
            let validator = validator.as_ref();
            let singles = permissions.iter().map(|permission| async move {
                let _permit = self.permit().await?;
                Ok::<_, AccelError>(self.validate_single(principal, permission, validator).await)
            });
            join_all(singles)
                .await
                .into_iter()
                .collect::<AccelResult<Vec<_>>>()?
        };

        Ok(combine(principal, permissions, &parts, ValidationSource::Parallel))
    }

    async fn spawn_singles(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
        validator: Arc<dyn AuthoritativeValidator>,
    ) -> AccelResult<Vec<ValidationResult>> {
        let mut tasks = JoinSet::new();
        for permission in permissions {
            let permit = self.permit().await?;
            let this = self.clone();
            let principal = principal.clone();
            let permission = permission.clone();
            let validator = Arc::clone(&validator);
            tasks.spawn(async move {
                let _permit = permit;
                Ok::<_, AccelError>(
                    this.validate_single(&principal, &permission, validator.as_ref())
                        .await,
                )
            });
        }

        join_parts(principal, tasks, "Permission validation task failed").await
    }

    // ------------------------------------------------------------------------
    // Single permission
    // ------------------------------------------------------------------------

    /// Matrix, then single-permission cache, then the validator's known
    /// permissions, then the validator itself.
    pub async fn validate_single(
        &self,
        principal: &PrincipalId,
        permission: &str,
        validator: &dyn AuthoritativeValidator,
    ) -> ValidationResult {
        let requested: PermissionSet = [permission.to_string()].into();

        if self.index.matrix_contains(principal, permission).await {
            return ValidationResult::allowed(
                principal.clone(),
                requested,
                ValidationSource::Parallel,
            );
        }

        let key = single_key(principal, permission);
        if let Some(cached) = self.tier.get::<ValidationResult>(&key).await {
            return cached;
        }

        if let Some(known) = validator.known_permissions(principal).await {
            let granted = known.contains(permission);
            self.index.refresh(principal, known).await;
            return if granted {
                ValidationResult::allowed(principal.clone(), requested, ValidationSource::Parallel)
            } else {
                ValidationResult::denied(principal.clone(), requested, ValidationSource::Parallel)
            };
        }

        let authoritative = validator.validate(principal, &requested).await;
        let result = if authoritative.valid {
            ValidationResult::allowed(principal.clone(), requested, ValidationSource::Parallel)
        } else {
            ValidationResult::denied(principal.clone(), requested, ValidationSource::Parallel)
        };

        // Only answers from the validator itself count as model outcomes
        self.hot_data.record_outcomes(&result).await;
        self.tier.put(&key, &result, self.optimization_ttl).await;
        if result.valid {
            self.index.add_to_matrix(principal, permission).await;
        }
        result
    }
}

/// Collect every task's part; the first failure or join error wins.
async fn join_parts(
    principal: &PrincipalId,
    mut tasks: JoinSet<AccelResult<ValidationResult>>,
    failure: &'static str,
) -> AccelResult<Vec<ValidationResult>> {
    let mut parts = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(part) => parts.push(part?),
            Err(e) => {
                tracing::error!(principal = %principal, error = %e, "{failure}");
                return Err(AccelError::task_failed(e.to_string()));
            }
        }
    }
    Ok(parts)
}
