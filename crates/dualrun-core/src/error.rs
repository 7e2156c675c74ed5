//! Error types for dualrun
//!
//! Provides error handling for:
//! - Primary-path upstream failures (passed through unwrapped)
//! - Primary-path deadline expiry
//! - Invalid options and configuration sources

use std::time::Duration;

/// Message carried by every timeout failure.
pub const TIMEOUT_MESSAGE: &str = "Operation timed out";

/// Error returned by a dual operation.
///
/// `E` is the error type of the two suppliers. A primary-path failure is
/// surfaced as [`DualError::Upstream`] holding the supplier's own error value,
/// so callers can match on it directly.
#[derive(Debug, thiserror::Error)]
pub enum DualError<E> {
    /// Primary path did not settle before its deadline
    #[error("Operation timed out")]
    Timeout {
        /// Deadline that expired, in milliseconds
        limit_ms: u64,
    },

    /// Primary path failed with its own error
    #[error("{0}")]
    Upstream(E),

    /// Primary task was cancelled by runtime shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Options or operation name rejected before any supplier ran
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl<E> DualError<E> {
    /// Check if the primary path timed out
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the call was rejected before running
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Borrow the upstream error, if that is what failed the call
    #[inline]
    #[must_use]
    pub fn upstream(&self) -> Option<&E> {
        match self {
            Self::Upstream(e) => Some(e),
            _ => None,
        }
    }

    /// Take the upstream error, handing back `self` otherwise
    pub fn into_upstream(self) -> Result<E, Self> {
        match self {
            Self::Upstream(e) => Ok(e),
            other => Err(other),
        }
    }
}

/// Deadline expiry reported by [`crate::timer::with_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation timed out")]
pub struct TimedOut {
    /// Deadline that expired
    pub limit: Duration,
}

impl<E> From<TimedOut> for DualError<E> {
    fn from(value: TimedOut) -> Self {
        Self::Timeout {
            limit_ms: crate::timer::duration_ms(value.limit),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Timeout must be a positive number of milliseconds
    #[error("timeout_ms must be positive, got {0}")]
    InvalidTimeout(u64),

    /// Operation names are used for correlation and may not be blank
    #[error("operation name must not be empty")]
    EmptyOperationName,

    /// Adapter names namespace metrics and may not be blank
    #[error("adapter name must not be empty")]
    EmptyAdapterName,

    /// A per-operation override failed validation
    #[error("operation '{operation}': {source}")]
    InvalidOverride {
        /// Operation the override belongs to
        operation: String,
        /// Underlying problem
        #[source]
        source: Box<ConfigError>,
    },

    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML source did not parse into the expected shape
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON source did not parse into the expected shape
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Simulator parameters out of range
    #[error("invalid simulation: {0}")]
    InvalidSimulation(String),

    /// File extension is neither `.toml` nor `.json`
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}
