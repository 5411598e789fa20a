//! Error types for the Trellis server.

use thiserror::Error;

use trellis_core::error::CoreError;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Anything surfaced from the core or the store
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration error at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal server error: {0}")]
    Internal(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {}", err))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
