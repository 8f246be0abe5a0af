//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Run '{name}' already in progress (pid {pid}, started {started_at})")]
    RunInProgress {
        name: String,
        pid: u32,
        started_at: String,
    },

    #[error("Unknown checkpoint kind: {0}")]
    UnknownCheckpointKind(String),

    #[error("Batch writer is closed")]
    WriterClosed,

    #[error("Batch writer task failed: {0}")]
    WriterTask(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<r2d2::Error> for PersistenceError {
    fn from(e: r2d2::Error) -> Self {
        Self::Pool(e.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
