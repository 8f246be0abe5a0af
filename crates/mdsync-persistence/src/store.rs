//! Backing-store seam.
//!
//! The pipeline needs only upsert-by-natural-key, select-by-symbol-set and
//! select-max-date-per-symbol, plus the exclusion and admission bookkeeping.
//! Methods are synchronous; async callers run them on the blocking pool.

use crate::error::PersistenceResult;
use chrono::{DateTime, NaiveDate, Utc};
use mdsync_core::{DividendEvent, IssuerProfile, PricePoint, SymbolRecord, ValidationOutcome};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Who put a symbol on the exclusion list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionSource {
    /// Rejected by the admission rules.
    Validation,
    /// No data from any provider during ingestion.
    Ingestion,
}

impl ExclusionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Ingestion => "ingestion",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "validation" => Some(Self::Validation),
            "ingestion" => Some(Self::Ingestion),
            _ => None,
        }
    }
}

impl fmt::Display for ExclusionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait MarketStore: Send + Sync {
    /// Insert or replace on (symbol, date). Returns rows written.
    fn upsert_prices(&self, prices: &[PricePoint]) -> PersistenceResult<usize>;

    /// Insert or replace on (symbol, ex_date). Returns rows written.
    fn upsert_dividends(&self, dividends: &[DividendEvent]) -> PersistenceResult<usize>;

    /// Insert or update on symbol. `created_at` of an existing row is kept.
    fn upsert_symbol(&self, record: &SymbolRecord) -> PersistenceResult<()>;

    /// Symbol rows for the given identifiers; unknown ones are absent.
    fn symbols(&self, symbols: &[String]) -> PersistenceResult<Vec<SymbolRecord>>;

    /// Every symbol row not on the exclusion list, sorted.
    fn tracked_symbols(&self) -> PersistenceResult<Vec<String>>;

    fn latest_price_dates(&self, symbols: &[String]) -> PersistenceResult<HashMap<String, NaiveDate>>;

    fn latest_dividend_dates(
        &self,
        symbols: &[String],
    ) -> PersistenceResult<HashMap<String, NaiveDate>>;

    fn prices_for(&self, symbol: &str) -> PersistenceResult<Vec<PricePoint>>;

    fn dividends_for(&self, symbol: &str) -> PersistenceResult<Vec<DividendEvent>>;

    fn excluded_symbols(&self) -> PersistenceResult<HashSet<String>>;

    /// Reason recorded for an excluded symbol.
    fn exclusion_reason(&self, symbol: &str) -> PersistenceResult<Option<String>>;

    /// Append an exclusion. A symbol already excluded keeps its first reason.
    fn record_exclusion(
        &self,
        symbol: &str,
        reason: &str,
        source: ExclusionSource,
    ) -> PersistenceResult<()>;

    /// Symbols with a persisted admission or validation exclusion.
    fn validated_symbols(&self) -> PersistenceResult<HashSet<String>>;

    /// Persist a validation outcome atomically. Admission creates the symbol
    /// row if absent, rejection appends an exclusion.
    ///
    /// Admissions and exclusions are mutually exclusive: a symbol that
    /// already has either keeps it and `Ok(false)` is returned. An existing
    /// symbol row (issuer profile included) is never overwritten.
    fn record_validation(
        &self,
        outcome: &ValidationOutcome,
        record: &SymbolRecord,
    ) -> PersistenceResult<bool>;

    /// Fold an issuer profile into the symbol row, creating it if needed.
    fn apply_profile(&self, profile: &IssuerProfile, at: DateTime<Utc>) -> PersistenceResult<()> {
        let mut record = self
            .symbols(std::slice::from_ref(&profile.symbol))?
            .pop()
            .unwrap_or_else(|| {
                SymbolRecord::new(
                    profile.symbol.clone(),
                    profile.venue.clone(),
                    profile.kind.unwrap_or_default(),
                )
            });
        record.apply_profile(profile, at);
        self.upsert_symbol(&record)
    }
}
