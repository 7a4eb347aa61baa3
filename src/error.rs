//! Error types for Tollbooth.

use thiserror::Error;

use crate::ratelimit::RateLimiterRes;

/// Failure of a single round trip to the counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database driver reported an error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not serve the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for Tollbooth operations.
#[derive(Error, Debug)]
pub enum TollboothError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter table could not be prepared
    #[error("Failed to prepare counter storage: {0}")]
    Schema(#[source] StoreError),

    /// A store round trip failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The key has spent its budget for the current window
    #[error("Rate limit exceeded: {0}")]
    OverLimit(RateLimiterRes),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollboothError {
    /// The rejection payload, if this error is an over-limit rejection.
    pub fn over_limit(&self) -> Option<&RateLimiterRes> {
        match self {
            TollboothError::OverLimit(res) => Some(res),
            _ => None,
        }
    }
}

/// Result type alias for Tollbooth operations.
pub type Result<T> = std::result::Result<T, TollboothError>;
