//! Ingestion pipeline for mdsync.
//!
//! - `IncrementalPlanner`: minimal fetch window per symbol
//! - `PriceProcessor`, `DividendProcessor`, `IssuerProcessor`: per-symbol
//!   ingestion run on a bounded worker pool via `SymbolProcessor::process_batch`
//! - `SymbolDiscovery`, `SymbolValidator`: candidate discovery and admission
//! - `BulkEodLoader`: whole-market end-of-day load for tracked symbols

pub mod bulk_eod;
pub mod discovery;
pub mod dividends;
pub mod error;
pub mod issuer;
pub mod planner;
pub mod prices;
pub mod processor;
pub mod validator;

mod blocking;

pub use bulk_eod::{BulkEodLoader, BulkEodReport};
pub use discovery::{DiscoveredCandidate, DiscoveryReport, SymbolDiscovery};
pub use dividends::DividendProcessor;
pub use error::{PipelineError, PipelineResult};
pub use issuer::IssuerProcessor;
pub use planner::IncrementalPlanner;
pub use prices::PriceProcessor;
pub use processor::{pool_size, BatchOptions, BatchReport, SymbolProcessor};
pub use validator::{SymbolValidator, ValidationConfig, ValidationReport};
