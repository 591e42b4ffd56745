//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("validation already in progress")]
    ValidationInProgress,

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
