use thiserror::Error;

/// Core error type for the Trellis platform
///
/// Every component below the HTTP boundary reports failures through this
/// enum; the server maps each kind onto a status code at the API edge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Missing or invalid credentials
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but not permitted
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource does not exist (or is soft-deleted)
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness or state conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Per-principal quota exhausted
    #[error("rate limit exceeded: {limit} requests per hour")]
    RateLimited {
        /// The principal's hourly quota
        limit: u32,
        /// Seconds until the window resets
        retry_after_secs: u64,
    },

    /// Outbound dependency unreachable (transport-level)
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Outbound call exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Flow graph failed structural validation
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Anything else; never shown verbatim to end users
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {}", err))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::Timeout(err.to_string())
        } else {
            CoreError::UpstreamUnavailable(err.to_string())
        }
    }
}
