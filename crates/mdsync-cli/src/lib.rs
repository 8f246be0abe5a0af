//! mdsync command-line application.
//!
//! Orchestrates the pipeline crates for one run:
//! - TOML configuration and provider wiring
//! - Run lock, Ctrl-C cancellation and checkpointed chunks
//! - Run report, metrics dump and exit status

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::Application;
pub use cli::{Cli, Command};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
