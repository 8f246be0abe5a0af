//! Batch execution shared by the ingestion processors.

use crate::blocking::with_store;
use crate::error::PipelineResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use mdsync_core::{DataKind, ProcessingStats, SkipReason, SymbolOutcome};
use mdsync_persistence::{FlushReport, MarketStore};
use mdsync_provider::{GovernorRegistry, HybridFetcher};
use mdsync_telemetry::Metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-batch knobs.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Ignore stored state and fetch the full lookback window.
    pub force_full_refresh: bool,
    /// Explicit window start overriding the planner.
    pub from_date: Option<NaiveDate>,
    /// Worker pool size.
    pub concurrency: usize,
    /// Skip symbols whose stored prices already cover the last session.
    pub skip_current: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            force_full_refresh: false,
            from_date: None,
            concurrency: 1,
            skip_current: true,
        }
    }
}

/// Result of one `process_batch` call.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub stats: ProcessingStats,
    /// Symbols finished with nothing left to do; their records are durable.
    pub completed: Vec<String>,
    /// Symbols never dispatched because the run was stopped.
    pub cancelled: Vec<String>,
    /// Skipped symbols by reason, used for savings accounting.
    pub skipped: BTreeMap<&'static str, u64>,
}

impl BatchReport {
    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(reason.as_str()).copied().unwrap_or(0)
    }
}

/// Pool size for a data kind: concurrency of the first provider in its order.
pub fn pool_size(fetcher: &HybridFetcher, registry: &GovernorRegistry, kind: DataKind) -> usize {
    fetcher
        .primary(kind)
        .and_then(|provider| registry.get(provider))
        .map(|governor| governor.concurrency())
        .unwrap_or(1)
        .max(1)
}

/// One ingestion variant.
#[async_trait]
pub trait SymbolProcessor: Send + Sync {
    fn kind(&self) -> DataKind;

    fn store(&self) -> &Arc<dyn MarketStore>;

    /// Load whatever per-symbol state the batch needs up front.
    async fn prepare(&self, _symbols: &[String]) -> PipelineResult<()> {
        Ok(())
    }

    async fn process_symbol(&self, symbol: &str, options: &BatchOptions) -> SymbolOutcome;

    /// Make every record enqueued so far durable and report failed writes.
    async fn flush(&self) -> PipelineResult<FlushReport> {
        Ok(FlushReport::default())
    }

    /// Run `process_symbol` for every symbol on a bounded pool.
    ///
    /// Excluded symbols are skipped without a fetch. Once `cancel` fires no
    /// new symbol is started. The writer is flushed before returning, and
    /// symbols whose records failed to persist are counted as failed.
    async fn process_batch(
        &self,
        symbols: &[String],
        options: &BatchOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<BatchReport> {
        let kind = self.kind();
        let mut stats = ProcessingStats::new(kind);
        let mut completed = Vec::new();
        let mut cancelled = Vec::new();
        let mut skipped: BTreeMap<&'static str, u64> = BTreeMap::new();

        let excluded = with_store(self.store(), |s| s.excluded_symbols()).await?;
        let mut candidates = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if excluded.contains(symbol) {
                let outcome = SymbolOutcome::Skipped(SkipReason::Excluded);
                stats.record(symbol, &outcome);
                *skipped.entry(SkipReason::Excluded.as_str()).or_default() += 1;
                Metrics::symbol_processed(kind.as_str(), outcome.label());
                completed.push(symbol.clone());
            } else {
                candidates.push(symbol.clone());
            }
        }

        self.prepare(&candidates).await?;

        let results: Vec<(String, SymbolOutcome)> = stream::iter(candidates)
            .map(|symbol| async move {
                if cancel.is_cancelled() {
                    return (symbol, SymbolOutcome::Skipped(SkipReason::Cancelled));
                }
                let outcome = self.process_symbol(&symbol, options).await;
                (symbol, outcome)
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        let flush = self.flush().await?;
        if !flush.is_clean() {
            warn!(
                kind = %kind,
                failed_records = flush.records_failed,
                failed_symbols = flush.failed_symbols.len(),
                "Some records failed to persist"
            );
        }

        for (symbol, outcome) in results {
            stats.record(&symbol, &outcome);
            let outcome = match outcome {
                SymbolOutcome::Succeeded { records, .. }
                    if flush.failed_symbols.contains_key(&symbol) =>
                {
                    let reason = flush
                        .errors
                        .first()
                        .map(|e| format!("persistence failed: {e}"))
                        .unwrap_or_else(|| "persistence failed".to_string());
                    stats.demote_to_failed(&symbol, records as u64, &reason);
                    SymbolOutcome::Failed(reason)
                }
                other => other,
            };

            match &outcome {
                SymbolOutcome::Skipped(SkipReason::Cancelled) => {
                    cancelled.push(symbol);
                    continue;
                }
                SymbolOutcome::Skipped(reason) => {
                    *skipped.entry(reason.as_str()).or_default() += 1;
                }
                _ => {}
            }
            Metrics::symbol_processed(kind.as_str(), outcome.label());
            if outcome.is_success() {
                completed.push(symbol);
            }
        }

        stats.finish();
        info!(
            kind = %kind,
            attempted = stats.attempted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            skipped = stats.skipped,
            cancelled = cancelled.len(),
            records = stats.records_persisted,
            elapsed_secs = stats.elapsed_secs(),
            "Batch finished"
        );

        Ok(BatchReport {
            stats,
            completed,
            cancelled,
            skipped,
        })
    }
}
