//! Pipeline error types.
//!
//! Provider problems never surface here; clients turn them into empty
//! results. What remains is persistence and task plumbing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] mdsync_persistence::PersistenceError),

    #[error("Core error: {0}")]
    Core(#[from] mdsync_core::CoreError),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
