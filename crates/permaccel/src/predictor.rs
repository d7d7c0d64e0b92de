//! Speculative answers from hot data, reconciled by shadow validation.
//!
//! # Security trade-off
//!
//! A predicted result is returned to the caller **before** the authoritative
//! validator has confirmed it. If a principal's permissions were revoked, a
//! caller can receive `valid = true` for a request the authoritative validator
//! would deny, until the shadow validation corrects the model and the cache.
//!
//! Deployments where permission checks gate sensitive operations should set
//! `enable_prediction = false`, or raise `prediction_confidence_threshold`.
//! Predictions are served only when the computed confidence reaches the
//! threshold; nothing here blocks on the authoritative answer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::cache::CacheTier;
use crate::cache::keys::validation_key;
use crate::hot_data::HotDataStore;
use crate::types::{PermissionSet, PrincipalId, ValidationResult, ValidationSource};
use crate::validator::AuthoritativeValidator;

#[derive(Clone)]
pub struct Predictor {
    confidence_threshold: f64,
    optimization_ttl: Duration,
    hot_data: HotDataStore,
    tier: Arc<CacheTier>,
    predictions_served: Arc<AtomicU64>,
    shadow_validations: Arc<AtomicU64>,
    mispredictions: Arc<AtomicU64>,
}

impl Predictor {
    pub fn new(
        confidence_threshold: f64,
        optimization_ttl: Duration,
        hot_data: HotDataStore,
        tier: Arc<CacheTier>,
    ) -> Self {
        Self {
            confidence_threshold,
            optimization_ttl,
            hot_data,
            tier,
            predictions_served: Arc::new(AtomicU64::new(0)),
            shadow_validations: Arc::new(AtomicU64::new(0)),
            mispredictions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Predicted result, or `None` when confidence is below the threshold.
    pub async fn predict(
        &self,
        principal: &PrincipalId,
        permissions: &PermissionSet,
    ) -> Option<ValidationResult> {
        let hot_data = self.hot_data.get_or_hydrate(principal).await;
        let confidence = hot_data.calculate_prediction_confidence(permissions);

        // Zero means no permission has enough history, whatever the threshold
        if confidence <= 0.0 || confidence < self.confidence_threshold {
            tracing::debug!(
                principal = %principal,
                confidence,
                threshold = self.confidence_threshold,
                "Prediction confidence below threshold"
            );
            return None;
        }

        let predicted_valid = hot_data.predict_validation(permissions);
        let result = if predicted_valid {
            ValidationResult::allowed(
                principal.clone(),
                permissions.clone(),
                ValidationSource::Prediction,
            )
        } else {
            ValidationResult::denied(
                principal.clone(),
                permissions.clone(),
                ValidationSource::Prediction,
            )
        };

        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            principal = %principal,
            confidence,
            valid = predicted_valid,
            "Serving predicted result"
        );

        Some(result.with_confidence(confidence))
    }

    /// Confirm a prediction against the authoritative validator.
    ///
    /// The authoritative result always replaces the cache entry for the
    /// request. On disagreement the hot-data model is corrected and synced.
    pub async fn reconcile(
        &self,
        principal: PrincipalId,
        permissions: PermissionSet,
        predicted: ValidationResult,
        validator: Arc<dyn AuthoritativeValidator>,
    ) {
        self.shadow_validations.fetch_add(1, Ordering::Relaxed);
        let actual = validator.validate(&principal, &permissions).await;

        if actual.valid != predicted.valid {
            self.mispredictions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                principal = %principal,
                predicted = predicted.valid,
                actual = actual.valid,
                confidence = predicted.confidence.unwrap_or_default(),
                "Prediction disagreed with authoritative validator, correcting model"
            );
            self.hot_data
                .update_model(&principal, &permissions, &actual)
                .await;
        }

        self.tier
            .put(
                &validation_key(&principal, &permissions),
                &actual,
                self.optimization_ttl,
            )
            .await;
    }

    /// [`reconcile`](Self::reconcile) as an owned future for a scheduler.
    pub fn shadow_task(
        &self,
        principal: PrincipalId,
        permissions: PermissionSet,
        predicted: ValidationResult,
        validator: Arc<dyn AuthoritativeValidator>,
    ) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            this.reconcile(principal, permissions, predicted, validator)
                .await;
        }
        .boxed()
    }

    pub fn predictions_served(&self) -> u64 {
        self.predictions_served.load(Ordering::Relaxed)
    }

    pub fn shadow_validations(&self) -> u64 {
        self.shadow_validations.load(Ordering::Relaxed)
    }

    pub fn mispredictions(&self) -> u64 {
        self.mispredictions.load(Ordering::Relaxed)
    }
}
