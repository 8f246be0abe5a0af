//! Admission rules for discovered symbols.
//!
//! A candidate is admitted with price activity inside the recency window or
//! a dividend inside the lookback window. Portfolio symbols skip both
//! checks. Each candidate gets exactly one persisted outcome.

use crate::blocking::with_store;
use crate::discovery::DiscoveredCandidate;
use crate::error::PipelineResult;
use chrono::{Duration, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use mdsync_core::ValidationOutcome;
use mdsync_persistence::{ExclusionSource, MarketStore};
use mdsync_provider::{HybridFetcher, HybridOutcome};
use mdsync_telemetry::Metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub recency_days: u32,
    pub dividend_lookback_days: u32,
    /// Symbols admitted without evidence checks.
    pub portfolio: HashSet<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            recency_days: 7,
            dividend_lookback_days: 365,
            portfolio: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub admitted: u64,
    pub excluded: u64,
    /// Symbols that already had an admission or exclusion, left as they were.
    pub unchanged: u64,
    /// Outcomes that could not be persisted; validated again next run.
    pub failed: u64,
    /// Symbols with a persisted outcome.
    pub processed: Vec<String>,
    pub cancelled: Vec<String>,
    pub errors: Vec<String>,
}

pub struct SymbolValidator {
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    config: ValidationConfig,
    today: fn() -> NaiveDate,
}

impl SymbolValidator {
    pub fn new(
        fetcher: Arc<HybridFetcher>,
        store: Arc<dyn MarketStore>,
        config: ValidationConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
            today: || Utc::now().date_naive(),
        }
    }

    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Decide one symbol. Fetches only to test for presence.
    ///
    /// The dividend check runs only when the price check fails.
    pub async fn validate(&self, symbol: &str) -> ValidationOutcome {
        if self.config.portfolio.contains(symbol) {
            return ValidationOutcome::portfolio(symbol);
        }
        let today = (self.today)();

        let recent_cutoff = today - Duration::days(i64::from(self.config.recency_days));
        let has_recent_price = match self.fetcher.fetch_prices(symbol, recent_cutoff).await {
            HybridOutcome::Found { records, .. } => records
                .iter()
                .any(|p| p.is_valid() && p.date >= recent_cutoff),
            HybridOutcome::NoData => false,
        };
        if has_recent_price {
            return ValidationOutcome::admitted(symbol, true, false);
        }

        let dividend_cutoff =
            today - Duration::days(i64::from(self.config.dividend_lookback_days));
        let has_dividend_history =
            match self.fetcher.fetch_dividends(symbol, dividend_cutoff).await {
                HybridOutcome::Found { records, .. } => records
                    .iter()
                    .any(|d| d.is_valid() && d.ex_date >= dividend_cutoff),
                HybridOutcome::NoData => false,
            };
        if has_dividend_history {
            return ValidationOutcome::admitted(symbol, false, true);
        }

        ValidationOutcome::excluded(
            symbol,
            self.config.recency_days,
            self.config.dividend_lookback_days,
        )
    }

    /// Validate candidates on a bounded pool and persist every outcome.
    pub async fn validate_all(
        &self,
        candidates: &[DiscoveredCandidate],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> PipelineResult<ValidationReport> {
        let decided: Vec<(&DiscoveredCandidate, Option<ValidationOutcome>)> =
            stream::iter(candidates)
                .map(|candidate| async move {
                    if cancel.is_cancelled() {
                        return (candidate, None);
                    }
                    (candidate, Some(self.validate(&candidate.symbol).await))
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut report = ValidationReport::default();
        for (candidate, outcome) in decided {
            let Some(outcome) = outcome else {
                report.cancelled.push(candidate.symbol.clone());
                continue;
            };
            let admitted = outcome.admitted;
            let record = candidate.to_record();
            let persisted = outcome.clone();
            match with_store(&self.store, move |s| s.record_validation(&persisted, &record)).await
            {
                Ok(false) => {
                    report.unchanged += 1;
                    debug!(symbol = %outcome.symbol, "Earlier validation outcome kept");
                    report.processed.push(candidate.symbol.clone());
                }
                Ok(true) => {
                    if admitted {
                        report.admitted += 1;
                        debug!(symbol = %outcome.symbol, via_portfolio = outcome.via_portfolio, "Admitted");
                    } else {
                        report.excluded += 1;
                        Metrics::symbol_excluded(ExclusionSource::Validation.as_str());
                        debug!(symbol = %outcome.symbol, reason = ?outcome.reason, "Excluded");
                    }
                    report.processed.push(candidate.symbol.clone());
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(symbol = %candidate.symbol, error = %e, "Failed to persist validation outcome");
                    if report.errors.len() < mdsync_core::MAX_ERROR_SAMPLES {
                        report.errors.push(format!("{}: {e}", candidate.symbol));
                    }
                }
            }
        }

        info!(
            admitted = report.admitted,
            excluded = report.excluded,
            unchanged = report.unchanged,
            failed = report.failed,
            cancelled = report.cancelled.len(),
            "Validation finished"
        );
        Ok(report)
    }
}
