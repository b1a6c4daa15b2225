//! Core error types

use thiserror::Error;

/// Core error type for VoltMesh
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration value is out of range
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
