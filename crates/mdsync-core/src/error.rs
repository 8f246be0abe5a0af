//! Error types for mdsync-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Unknown security kind: {0}")]
    UnknownSecurityKind(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
