//! The authoritative validator contract.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{PermissionSet, PrincipalId, ValidationResult};

/// Ground truth for permission checks.
///
/// Assumed deterministic for a given system state and potentially slow. The
/// engine never inspects how it decides.
#[async_trait]
pub trait AuthoritativeValidator: Send + Sync {
    /// Validate `permissions` for `principal`.
    async fn validate(&self, principal: &PrincipalId, permissions: &PermissionSet)
    -> ValidationResult;

    /// Every permission the principal currently holds, if the implementation
    /// can answer that cheaply.
    ///
    /// Used to refresh the permission index and matrix. The default answers
    /// `None`, which makes the engine fall back to per-permission validation.
    async fn known_permissions(&self, _principal: &PrincipalId) -> Option<PermissionSet> {
        None
    }
}

/// Adapter turning an async closure into an [`AuthoritativeValidator`].
pub struct FnValidator<F> {
    f: F,
}

impl<F> FnValidator<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> AuthoritativeValidator for FnValidator<F>
where
    F: Fn(PrincipalId, PermissionSet) -> Fut + Send + Sync,
    Fut: Future<Output = ValidationResult> + Send,
{
    async fn validate(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
    ) -> ValidationResult {
        (self.f)(principal.clone(), permissions.clone()).await
    }
}

/// Wrap an async closure as a shared validator.
pub fn validator_fn<F, Fut>(f: F) -> Arc<dyn AuthoritativeValidator>
where
    F: Fn(PrincipalId, PermissionSet) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ValidationResult> + Send + 'static,
{
    Arc::new(FnValidator::new(f))
}
