//! Optimization engine configuration.
//!
//! The configuration is built once, validated, and handed to the engine
//! behind an `Arc`. Nothing mutates it at runtime.
//!
//! # Example (TOML)
//!
//! ```toml
//! batch_threshold = 10
//! parallel_threshold = 5
//! optimization_cache_ttl = "30m"
//! index_cache_ttl = "15m"
//! prediction_confidence_threshold = 0.8
//! validation_deadline = "5s"
//! ```
//!
//! Every field can be overridden from the environment with the
//! `PERMACCEL__` prefix, e.g. `PERMACCEL__BATCH_THRESHOLD=20`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable prefix used by [`load_config`].
pub const ENV_PREFIX: &str = "PERMACCEL";

/// Configuration for the permission validation accelerator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Requests with more permissions than this use grouped (batch) validation.
    /// Requests with exactly this many or fewer use parallel validation.
    pub batch_threshold: usize,

    /// Parallel requests with at least this many permissions are spawned onto
    /// the worker pool; smaller ones are joined on the calling task.
    pub parallel_threshold: usize,

    /// TTL of cached request, group and single-permission results.
    #[serde(with = "humantime_serde")]
    pub optimization_cache_ttl: Duration,

    /// TTL of the per-principal permission matrix.
    #[serde(with = "humantime_serde")]
    pub matrix_cache_ttl: Duration,

    /// TTL (and freshness window) of permission index snapshots.
    #[serde(with = "humantime_serde")]
    pub index_cache_ttl: Duration,

    /// TTL of persisted hot data, also the staleness bound for in-process hot data.
    #[serde(with = "humantime_serde")]
    pub hot_data_cache_ttl: Duration,

    /// Serve predicted results when confidence allows.
    pub enable_prediction: bool,

    /// Minimum confidence in `[0, 1]` before a prediction is served.
    pub prediction_confidence_threshold: f64,

    /// Use grouped validation for large requests.
    pub enable_batch_validation: bool,

    /// Use per-permission parallel validation for small requests.
    pub enable_parallel_validation: bool,

    /// Maximum number of concurrently running group/permission tasks.
    pub worker_pool_size: usize,

    /// Overall deadline for a grouped or parallel fan-out.
    #[serde(with = "humantime_serde")]
    pub validation_deadline: Duration,

    /// Upper bound on how long an entry lives in the in-process tier.
    #[serde(with = "humantime_serde")]
    pub local_cache_ttl: Duration,

    /// Interval between maintenance sweeps.
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,

    /// Hot data is persisted every N accesses of a principal.
    pub hot_data_sync_every: u64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 10,
            parallel_threshold: 5,
            optimization_cache_ttl: Duration::from_secs(30 * 60),
            matrix_cache_ttl: Duration::from_secs(2 * 3600),
            index_cache_ttl: Duration::from_secs(15 * 60),
            hot_data_cache_ttl: Duration::from_secs(3600),
            enable_prediction: true,
            prediction_confidence_threshold: 0.8,
            enable_batch_validation: true,
            enable_parallel_validation: true,
            worker_pool_size: num_cpus::get().max(4),
            validation_deadline: Duration::from_secs(5),
            local_cache_ttl: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(300), // 5 minutes
            hot_data_sync_every: 10,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl OptimizationConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - A threshold or the worker pool size is zero
    /// - The confidence threshold is outside `[0, 1]`
    /// - A TTL, the deadline or the maintenance interval is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "batch_threshold must be > 0".to_string(),
            ));
        }

        if self.parallel_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "parallel_threshold must be > 0".to_string(),
            ));
        }

        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "worker_pool_size must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.prediction_confidence_threshold) {
            return Err(ConfigError::InvalidValue(format!(
                "prediction_confidence_threshold must be within [0, 1], got {}",
                self.prediction_confidence_threshold
            )));
        }

        let durations = [
            ("optimization_cache_ttl", self.optimization_cache_ttl),
            ("matrix_cache_ttl", self.matrix_cache_ttl),
            ("index_cache_ttl", self.index_cache_ttl),
            ("hot_data_cache_ttl", self.hot_data_cache_ttl),
            ("validation_deadline", self.validation_deadline),
            ("local_cache_ttl", self.local_cache_ttl),
            ("maintenance_interval", self.maintenance_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.hot_data_sync_every == 0 {
            return Err(ConfigError::InvalidValue(
                "hot_data_sync_every must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load configuration from an optional TOML file plus environment overrides.
///
/// Environment variables use the [`ENV_PREFIX`] prefix and `__` as separator,
/// e.g. `PERMACCEL__VALIDATION_DEADLINE=2s`. The merged result is validated.
pub fn load_config(path: Option<&Path>) -> Result<OptimizationConfig, ConfigError> {
    use config::{Config, Environment, File, FileFormat};

    let mut builder = Config::builder();
    if let Some(p) = path {
        if p.exists() {
            builder = builder.add_source(File::from(p.to_path_buf()).format(FileFormat::Toml));
        } else {
            tracing::warn!(path = %p.display(), "Config file not found, using defaults");
        }
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    let merged: OptimizationConfig = builder
        .build()
        .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
        .try_deserialize()
        .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

    merged.validate()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizationConfig::default();
        assert_eq!(config.batch_threshold, 10);
        assert_eq!(config.parallel_threshold, 5);
        assert_eq!(config.optimization_cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.matrix_cache_ttl, Duration::from_secs(7200));
        assert_eq!(config.index_cache_ttl, Duration::from_secs(900));
        assert_eq!(config.hot_data_cache_ttl, Duration::from_secs(3600));
        assert!(config.enable_prediction);
        assert!((config.prediction_confidence_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.enable_batch_validation);
        assert!(config.enable_parallel_validation);
        assert!(config.worker_pool_size >= 4);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(OptimizationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_threshold_fails_validation() {
        let config = OptimizationConfig {
            batch_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_confidence_out_of_range_fails_validation() {
        let config = OptimizationConfig {
            prediction_confidence_threshold: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("prediction_confidence_threshold"));
    }

    #[test]
    fn test_zero_deadline_fails_validation() {
        let config = OptimizationConfig {
            validation_deadline: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration value: validation_deadline must be > 0"
        );
    }

    #[test]
    fn test_humantime_durations_deserialize() {
        let config: OptimizationConfig = serde_json::from_str(
            r#"{ "optimization_cache_ttl": "45m", "validation_deadline": "250ms" }"#,
        )
        .unwrap();
        assert_eq!(config.optimization_cache_ttl, Duration::from_secs(45 * 60));
        assert_eq!(config.validation_deadline, Duration::from_millis(250));
        // Unspecified fields keep their defaults
        assert_eq!(config.batch_threshold, 10);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = OptimizationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OptimizationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
