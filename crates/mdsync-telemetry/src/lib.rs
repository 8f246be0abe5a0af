//! Prometheus metrics, structured logging and run reports for mdsync.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus counters for provider calls, persistence and exclusions
//! - `RunMonitor`: end-of-run report with timings, provider success rates
//!   and optimization savings

pub mod error;
pub mod logging;
pub mod metrics;
pub mod run_monitor;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use run_monitor::{
    PhaseReport, PhaseTimer, ProviderCallSnapshot, RunMonitor, RunReport, RunTotals, SavingsEntry,
};
