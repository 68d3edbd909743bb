//! Error types for guildwatch

use thiserror::Error;

/// Result type alias for guildwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application.
///
/// JSON parse failures surface as `ApiError::InvalidResponse` and
/// filesystem failures as `StoreError::Io`; nothing else escapes those two
/// domains.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Remote API errors.
///
/// Business-level absence (player has no guild, no SkyBlock profiles) is not
/// an error; those paths return `Ok(None)` from the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote API returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Remote API rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Failed to connect to API".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),
}
