//! Error types for the validation accelerator.
//!
//! None of these errors ever reach a caller of
//! [`OptimizationEngine::optimize_validation`]. They classify why an
//! optimized path was abandoned, and every one of them ends in a direct call
//! to the authoritative validator.
//!
//! [`OptimizationEngine::optimize_validation`]: crate::engine::OptimizationEngine::optimize_validation

use std::time::Duration;

use crate::config::ConfigError;

/// Failures reported by a distributed cache tier.
///
/// The cache tier converts all of these into misses; they exist so adapters
/// can report something more useful than "absent" in logs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached (connection refused, pool exhausted).
    #[error("Cache unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The backend did not answer in time.
    #[error("Cache operation timed out for key '{key}'")]
    Timeout {
        /// Key of the operation that timed out.
        key: String,
    },

    /// The backend answered with an error.
    #[error("Cache backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(key: impl Into<String>) -> Self {
        Self::Timeout { key: key.into() }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Errors raised inside the optimization pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    /// A cache tier operation failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A grouped or parallel sub-task panicked or was cancelled.
    #[error("Validation task failed: {message}")]
    TaskFailed {
        /// Description of the task failure.
        message: String,
    },

    /// The fan-out did not complete within the configured deadline.
    #[error("Validation deadline of {deadline:?} exceeded")]
    DeadlineExceeded {
        /// The deadline that was exceeded.
        deadline: Duration,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl AccelError {
    /// Creates a new `TaskFailed` error.
    #[must_use]
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cache(_) => ErrorCategory::Cache,
            Self::TaskFailed { .. } => ErrorCategory::Task,
            Self::DeadlineExceeded { .. } => ErrorCategory::Deadline,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Whether retrying the same request later could take the optimized path.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Cache(_) | Self::TaskFailed { .. } | Self::DeadlineExceeded { .. }
        )
    }
}

/// Error categories for log fields and fallback counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Cache,
    Task,
    Deadline,
    Configuration,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Task => write!(f, "task"),
            Self::Deadline => write!(f, "deadline"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::timeout("permission:optimization:validation:1:a");
        assert_eq!(
            err.to_string(),
            "Cache operation timed out for key 'permission:optimization:validation:1:a'"
        );

        let err = CacheError::unavailable("connection refused");
        assert_eq!(err.to_string(), "Cache unavailable: connection refused");
    }

    #[test]
    fn test_accel_error_from_cache_error() {
        let err: AccelError = CacheError::backend("WRONGTYPE").into();
        assert_eq!(err.category(), ErrorCategory::Cache);
        assert!(err.is_transient());
    }

    #[test]
    fn test_deadline_error() {
        let err = AccelError::DeadlineExceeded {
            deadline: Duration::from_millis(250),
        };
        assert_eq!(err.category(), ErrorCategory::Deadline);
        assert_eq!(err.to_string(), "Validation deadline of 250ms exceeded");
        assert_eq!(err.category().to_string(), "deadline");
    }

    #[test]
    fn test_configuration_error_is_not_transient() {
        let err: AccelError =
            ConfigError::InvalidValue("batch_threshold must be > 0".into()).into();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.is_transient());
    }
}
