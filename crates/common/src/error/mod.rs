//! Common error types shared by perfguard crates
//!
//! Telemetry must never crash the host application, so almost every failure
//! in this workspace is a *soft miss* that surfaces as `None`/`false`. The
//! errors in this module cover the remaining cases:
//!
//! | Pattern | CommonError Variant | When to Use |
//! |---------|-------------------|-------------|
//! | **Capacity** | `InvalidCapacity` | A buffer was sized at zero (construction-fatal) |
//! | **Serialization** | `Serialization` | TOML/JSON parsing of options |
//!
//! ## ErrorClassification Trait
//!
//! All error types in the workspace implement [`ErrorClassification`] so
//! callers can tell construction-fatal configuration mistakes apart from
//! informational misses:
//!
//! - **`is_fatal()`**: must this error abort construction of the component?
//! - **`severity()`**: how loudly should it be logged?
//!
//! Module-specific errors compose with `CommonError` rather than duplicating
//! its variants:
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum TelemetryError {
//!     #[error("Invalid threshold for '{metric}': {reason}")]
//!     InvalidThreshold { metric: String, reason: String },
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//! ```

use std::fmt;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A fixed-capacity structure was configured with no usable slots
    InvalidCapacity { capacity: usize, context: String },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity { capacity, context } => {
                write!(
                    f,
                    "Invalid capacity {} for {}: capacity must be positive",
                    capacity, context
                )
            }
            Self::Serialization { message, format } => {
                if let Some(format) = format {
                    write!(f, "Serialization error ({}): {}", format, message)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidCapacity { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidCapacity { .. } => ErrorSeverity::Error,
            Self::Serialization { .. } => ErrorSeverity::Error,
        }
    }
}

impl CommonError {
    /// Create a capacity error for the named structure
    pub fn invalid_capacity<S: Into<String>>(capacity: usize, context: S) -> Self {
        Self::InvalidCapacity { capacity, context: context.into() }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }
}

/// Standard classification interface for workspace errors
pub trait ErrorClassification {
    /// Whether the error must abort construction of the component that
    /// produced it (as opposed to being logged and skipped).
    fn is_fatal(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for logging decisions.
    fn severity(&self) -> ErrorSeverity;
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}
