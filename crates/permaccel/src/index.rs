//! Permission index and matrix.
//!
//! The **index** is a snapshot of a principal's complete permission set. It
//! answers whole requests (`validate_with_index`) while fresh.
//!
//! The **matrix** is the set of permissions individually confirmed as granted
//! for a principal. It only ever holds positives, so it short-circuits single
//! permission checks but never denies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::CacheTier;
use crate::cache::keys::{index_key, matrix_key};
use crate::types::{PermissionSet, PrincipalId, ValidationResult, ValidationSource};

/// Snapshot of everything a principal is known to hold at `indexed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionIndex {
    pub principal: PrincipalId,
    pub permissions: PermissionSet,
    #[serde(with = "time::serde::rfc3339")]
    pub indexed_at: OffsetDateTime,
    pub version: String,
}

impl PermissionIndex {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let age = OffsetDateTime::now_utc() - self.indexed_at;
        age.whole_milliseconds() < ttl.as_millis() as i128
    }

    /// Split `permissions` into held and not held.
    pub fn partition(&self, permissions: &PermissionSet) -> (PermissionSet, PermissionSet) {
        permissions
            .iter()
            .cloned()
            .partition(|permission| self.permissions.contains(permission))
    }
}

/// In-process indexes and matrices, written back to the cache tier.
#[derive(Clone)]
pub struct PermissionIndexStore {
    indexes: Arc<DashMap<PrincipalId, PermissionIndex>>,
    matrix: Arc<DashMap<PrincipalId, PermissionSet>>,
    tier: Arc<CacheTier>,
    index_ttl: Duration,
    matrix_ttl: Duration,
    next_version: Arc<AtomicU64>,
}

impl PermissionIndexStore {
    pub fn new(tier: Arc<CacheTier>, index_ttl: Duration, matrix_ttl: Duration) -> Self {
        Self {
            indexes: Arc::new(DashMap::new()),
            matrix: Arc::new(DashMap::new()),
            tier,
            index_ttl,
            matrix_ttl,
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    // ------------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------------

    /// Fresh index for the principal, loading it from the cache tier if needed.
    pub async fn lookup(&self, principal: &PrincipalId) -> Option<PermissionIndex> {
        if let Some(index) = self.indexes.get(principal) {
            if index.is_fresh(self.index_ttl) {
                return Some(index.clone());
            }
        }
        self.indexes.remove(principal);

        let index = self
            .tier
            .get::<PermissionIndex>(&index_key(principal))
            .await?;
        if !index.is_fresh(self.index_ttl) {
            tracing::debug!(
                principal = %principal,
                version = %index.version,
                "Ignoring stale index"
            );
            return None;
        }
        self.indexes.insert(principal.clone(), index.clone());
        Some(index)
    }

    /// Answer a request from the index. `None` means no fresh snapshot exists.
    pub async fn validate_with_index(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
    ) -> Option<ValidationResult> {
        let index = self.lookup(principal).await?;
        let (matched, unmatched) = index.partition(permissions);

        tracing::debug!(
            principal = %principal,
            version = %index.version,
            unmatched = unmatched.len(),
            "Answered from permission index"
        );

        Some(ValidationResult::from_partition(
            principal.clone(),
            permissions.clone(),
            matched,
            unmatched,
            ValidationSource::Index,
        ))
    }

    /// Install a full permission set as the principal's index and matrix.
    pub async fn refresh(&self, principal: &PrincipalId, permissions: PermissionSet) {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let index = PermissionIndex {
            principal: principal.clone(),
            permissions: permissions.clone(),
            indexed_at: OffsetDateTime::now_utc(),
            version: format!("v{version}"),
        };

        self.tier
            .put(&index_key(principal), &index, self.index_ttl)
            .await;
        self.indexes.insert(principal.clone(), index);

        self.update_matrix(principal, permissions).await;
    }

    // ------------------------------------------------------------------------
    // Matrix
    // ------------------------------------------------------------------------

    /// Whether the permission is confirmed as granted.
    pub async fn matrix_contains(&self, principal: &PrincipalId, permission: &str) -> bool {
        if let Some(granted) = self.matrix.get(principal) {
            return granted.contains(permission);
        }

        match self.tier.get::<PermissionSet>(&matrix_key(principal)).await {
            Some(granted) => {
                let contains = granted.contains(permission);
                self.matrix.entry(principal.clone()).or_insert(granted);
                contains
            }
            None => false,
        }
    }

    /// Replace the principal's matrix.
    pub async fn update_matrix(&self, principal: &PrincipalId, granted: PermissionSet) {
        self.tier
            .put(&matrix_key(principal), &granted, self.matrix_ttl)
            .await;
        self.matrix.insert(principal.clone(), granted);
    }

    /// Add one confirmed permission and write the matrix back.
    pub async fn add_to_matrix(&self, principal: &PrincipalId, permission: &str) {
        let granted = {
            let mut entry = self.matrix.entry(principal.clone()).or_default();
            if !entry.insert(permission.to_string()) {
                return;
            }
            entry.clone()
        };
        self.tier
            .put(&matrix_key(principal), &granted, self.matrix_ttl)
            .await;
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Drop the principal's index and matrix from both tiers.
    pub async fn invalidate(&self, principal: &PrincipalId) {
        self.indexes.remove(principal);
        self.matrix.remove(principal);
        self.tier.delete(&index_key(principal)).await;
        self.tier.delete(&matrix_key(principal)).await;
    }

    pub fn indexed_principals(&self) -> Vec<PrincipalId> {
        self.indexes.iter().map(|e| e.key().clone()).collect()
    }

    pub fn matrix_principals(&self) -> Vec<PrincipalId> {
        self.matrix.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove the in-process index only.
    pub fn evict_index(&self, principal: &PrincipalId) -> bool {
        self.indexes.remove(principal).is_some()
    }

    /// Remove the in-process matrix only.
    pub fn evict_matrix(&self, principal: &PrincipalId) -> bool {
        self.matrix.remove(principal).is_some()
    }

    pub fn index_len(&self) -> usize {
        self.indexes.len()
    }

    pub fn matrix_len(&self) -> usize {
        self.matrix.len()
    }

    pub fn tier(&self) -> &Arc<CacheTier> {
        &self.tier
    }
}
