//! Engine error types

use thiserror::Error;

/// Errors surfaced by the engine and its orchestration layers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] pwlsat_core::Error),

    #[error(transparent)]
    Lp(#[from] pwlsat_lp::LpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
