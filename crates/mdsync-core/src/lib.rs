//! Core domain types for the mdsync ingestion pipeline.
//!
//! This crate provides the record shapes shared by every other crate:
//! - `PricePoint`, `DividendEvent`: time-series records keyed by symbol + date
//! - `SymbolRecord`, `IssuerProfile`, `DiscoveredSymbol`: security metadata
//! - `ProviderId`, `DataKind`, `ProviderBatch`: provider plumbing
//! - `ValidationOutcome`, `ProcessingStats`, `SymbolOutcome`: run bookkeeping

pub mod error;
pub mod provider;
pub mod records;
pub mod stats;
pub mod symbol;
pub mod validation;

pub use error::{CoreError, Result};
pub use provider::{DataKind, ProviderBatch, ProviderId};
pub use records::{normalize_dividends, normalize_prices, DividendEvent, PricePoint};
pub use stats::{ProcessingStats, SkipReason, SymbolOutcome, MAX_ERROR_SAMPLES};
pub use symbol::{
    normalize_symbol, DiscoveredSymbol, IssuerProfile, SecurityKind, SymbolRecord,
};
pub use validation::ValidationOutcome;
