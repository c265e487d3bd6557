//! Common error types shared across Quaver crates

use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared model and configuration layer
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed time text (expected mm:ss or hh:mm:ss)
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
