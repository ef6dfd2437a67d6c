//! Error types for the Tollgate service.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A policy was constructed with invalid parameters
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Unexpected failure while evaluating a quota
    #[error("Quota evaluation failed: {0}")]
    Evaluation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
