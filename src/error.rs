//! Error types for the Palisade service.

use thiserror::Error;

/// Main error type for Palisade operations.
#[derive(Error, Debug)]
pub enum PalisadeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Palisade operations.
pub type Result<T> = std::result::Result<T, PalisadeError>;
