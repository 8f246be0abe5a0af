//! Provider error types.
//!
//! These never cross the `ProviderClient` boundary: client methods log them
//! and return an empty result instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("{provider} response parse error: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },

    #[error("Rate governor closed for {0}")]
    GovernorClosed(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Core error: {0}")]
    Core(#[from] mdsync_core::CoreError),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
