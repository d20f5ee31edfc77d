//! Error types for kernel, configuration and architecture operations.

use thiserror::Error;

/// Result type alias used across the crate.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors raised by kernels and their configuration layer.
///
/// Every variant describes a caller mistake; none of them is transient.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch in '{operation}': expected {expected}, got {got}")]
    ShapeMismatch {
        operation: &'static str,
        expected: String,
        got: String,
    },

    #[error("Invalid parameter '{parameter}' in '{operation}': {reason}")]
    InvalidParameter {
        operation: &'static str,
        parameter: &'static str,
        reason: String,
    },

    #[error("Invalid {context} \"{value}\". Must be one of: {expected}")]
    InvalidMode {
        context: &'static str,
        value: String,
        expected: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cache for layer {index} does not match: expected {expected}")]
    CacheMismatch { index: usize, expected: String },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl KernelError {
    pub(crate) fn shape_mismatch(
        operation: &'static str,
        expected: impl ToString,
        got: impl ToString,
    ) -> Self {
        KernelError::ShapeMismatch {
            operation,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub(crate) fn invalid_parameter(
        operation: &'static str,
        parameter: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        KernelError::InvalidParameter {
            operation,
            parameter,
            reason: reason.into(),
        }
    }
}
