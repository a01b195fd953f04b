use perfguard_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Telemetry core errors
///
/// Only construction-time mistakes are reported as errors. Runtime misses
/// (unknown benchmark ids, unknown phases, metrics without thresholds) are
/// returned as `None`/`false` and logged, so recording can never fail the
/// host application.
#[derive(Debug, Error)]
pub enum TelemetryError {
    // Shared errors (capacity, serialization) live in CommonError
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Invalid threshold for '{metric}': {reason}")]
    InvalidThreshold { metric: String, reason: String },
}

/// Result type alias for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl TelemetryError {
    /// Rejected configuration value at dotted path `field`
    pub fn invalid_config<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidConfig { field: field.into(), reason: reason.into() }
    }

    /// Inconsistent threshold limits for `metric`
    pub fn invalid_threshold<M: Into<String>, R: Into<String>>(metric: M, reason: R) -> Self {
        Self::InvalidThreshold { metric: metric.into(), reason: reason.into() }
    }
}

impl From<toml::de::Error> for TelemetryError {
    fn from(err: toml::de::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl ErrorClassification for TelemetryError {
    fn is_fatal(&self) -> bool {
        match self {
            Self::Common(err) => err.is_fatal(),
            Self::InvalidConfig { .. } | Self::InvalidThreshold { .. } => true,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Common(err) => err.severity(),
            Self::InvalidConfig { .. } | Self::InvalidThreshold { .. } => ErrorSeverity::Error,
        }
    }
}
