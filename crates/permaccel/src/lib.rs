//! # permaccel
//!
//! Speculative permission-validation accelerator.
//!
//! Given a principal and a set of permissions, the engine answers "is this
//! access allowed?" as cheaply as it can while an external authoritative
//! validator stays the single source of truth.
//!
//! This crate provides:
//! - Two-level caching (in-process L1 over a shared distributed L2)
//! - Hot-data statistics and confidence-gated prediction with shadow validation
//! - Per-principal permission index and permission matrix
//! - Grouped (batch) and per-permission (parallel) fan-out validation
//! - Periodic maintenance sweep of in-process structures
//!
//! ## Fail-open to ground truth
//!
//! [`OptimizationEngine::optimize_validation`] never returns an error. Any
//! failure on an optimized path ends in a direct call to the authoritative
//! validator, whose result is returned as-is.
//!
//! ## Modules
//!
//! - [`engine`] - Request orchestration and statistics
//! - [`cache`] - Cache tier, distributed cache contract and key layout
//! - [`hot_data`] - Access and success counters per principal and permission
//! - [`predictor`] - Confidence-gated predictions and shadow reconciliation
//! - [`index`] - Permission index snapshots and the permission matrix
//! - [`fanout`] - Batch and parallel validation
//! - [`maintenance`] - Periodic sweep
//! - [`config`] - Engine configuration and loading

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod hot_data;
pub mod index;
pub mod maintenance;
pub mod path;
pub mod predictor;
pub mod scheduler;
pub mod types;
pub mod validator;

pub use cache::{CacheTier, DistributedCache, InMemoryDistributedCache, TierStats};
pub use config::{ConfigError, OptimizationConfig, load_config};
pub use engine::{OptimizationEngine, OptimizationStatistics};
pub use error::{AccelError, CacheError, ErrorCategory};
pub use hot_data::{HotData, HotDataSnapshot, HotDataStore, PermissionStatsSnapshot};
pub use index::{PermissionIndex, PermissionIndexStore};
pub use maintenance::{MaintenanceSweeper, SweepReport, SweepStats};
pub use path::{PathStep, ValidationPath};
pub use scheduler::{Scheduler, TokioScheduler};
pub use types::{
    PermissionSet, PrincipalId, ValidationResult, ValidationSource, group_key, permission_set,
};
pub use validator::{AuthoritativeValidator, FnValidator, validator_fn};

/// Result type for the optimization pipeline.
pub type AccelResult<T> = Result<T, AccelError>;
