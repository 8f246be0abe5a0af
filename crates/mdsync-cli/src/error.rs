//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Provider error: {0}")]
    Provider(#[from] mdsync_provider::ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] mdsync_persistence::PersistenceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] mdsync_pipeline::PipelineError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mdsync_telemetry::TelemetryError),

    #[error("Background task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
