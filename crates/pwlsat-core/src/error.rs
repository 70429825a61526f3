//! Error types for PWLSAT core

use thiserror::Error;

/// Main error type for core operations
#[derive(Debug, Error)]
pub enum Error {
    /// A variable index outside the query's range was used
    #[error("unknown variable x{0}")]
    UnknownVariable(u32),

    /// A query file could not be parsed
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// An unsupported input format was requested
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Underlying I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid operation for the current state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
