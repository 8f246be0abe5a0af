//! Dividend ingestion.
//!
//! Unlike prices, an empty answer from every provider is a normal outcome:
//! plenty of securities never pay a dividend.

use crate::blocking::with_store;
use crate::error::PipelineResult;
use crate::planner::IncrementalPlanner;
use crate::prices::failed;
use crate::processor::{BatchOptions, SymbolProcessor};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mdsync_core::{normalize_dividends, DataKind, DividendEvent, SkipReason, SymbolOutcome};
use mdsync_persistence::{BatchWriter, BatchWriterConfig, DividendSink, FlushReport, MarketStore};
use mdsync_provider::{HybridFetcher, HybridOutcome};
use mdsync_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct DividendProcessor {
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    planner: IncrementalPlanner,
    writer: BatchWriter<DividendEvent>,
    latest: Mutex<HashMap<String, Option<NaiveDate>>>,
    today: fn() -> NaiveDate,
}

impl DividendProcessor {
    pub fn new(
        fetcher: Arc<HybridFetcher>,
        store: Arc<dyn MarketStore>,
        planner: IncrementalPlanner,
        writer_config: BatchWriterConfig,
    ) -> Self {
        let writer =
            BatchWriter::spawn(Arc::new(DividendSink::new(store.clone())), writer_config);
        Self {
            fetcher,
            store,
            planner,
            writer,
            latest: Mutex::new(HashMap::new()),
            today: || Utc::now().date_naive(),
        }
    }

    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub async fn shutdown(self) -> PipelineResult<FlushReport> {
        Ok(self.writer.stop().await?)
    }

    async fn latest_for(&self, symbol: &str) -> PipelineResult<Option<NaiveDate>> {
        let cached = self.latest.lock().get(symbol).copied();
        if let Some(latest) = cached {
            return Ok(latest);
        }
        let wanted = vec![symbol.to_string()];
        let found = with_store(&self.store, move |s| s.latest_dividend_dates(&wanted)).await?;
        Ok(found.get(symbol).copied())
    }

    async fn run_symbol(&self, symbol: &str, options: &BatchOptions) -> PipelineResult<SymbolOutcome> {
        let today = (self.today)();
        let from = match options.from_date {
            Some(from) => from,
            None if options.force_full_refresh => self.planner.full_window_start(today),
            None => self.planner.from_date(self.latest_for(symbol).await?, today),
        };

        match self.fetcher.fetch_dividends(symbol, from).await {
            HybridOutcome::NoData => {
                debug!(symbol, %from, "No dividends from any provider");
                Ok(SymbolOutcome::Skipped(SkipReason::NoDividends))
            }
            HybridOutcome::Found { provider, records } => {
                let (kept, dropped) = normalize_dividends(records);
                if dropped > 0 {
                    Metrics::records_dropped(DataKind::Dividends.as_str(), dropped);
                }
                if kept.is_empty() {
                    return Ok(SymbolOutcome::Skipped(SkipReason::NoDividends));
                }
                let count = kept.len();
                self.writer.enqueue_all(kept).await?;
                Ok(SymbolOutcome::Succeeded {
                    provider: Some(provider),
                    records: count,
                    dropped,
                })
            }
        }
    }
}

#[async_trait]
impl SymbolProcessor for DividendProcessor {
    fn kind(&self) -> DataKind {
        DataKind::Dividends
    }

    fn store(&self) -> &Arc<dyn MarketStore> {
        &self.store
    }

    async fn prepare(&self, symbols: &[String]) -> PipelineResult<()> {
        let wanted = symbols.to_vec();
        let found = with_store(&self.store, move |s| s.latest_dividend_dates(&wanted)).await?;
        *self.latest.lock() = symbols
            .iter()
            .map(|s| (s.clone(), found.get(s).copied()))
            .collect();
        Ok(())
    }

    async fn process_symbol(&self, symbol: &str, options: &BatchOptions) -> SymbolOutcome {
        match self.run_symbol(symbol, options).await {
            Ok(outcome) => outcome,
            Err(e) => failed(symbol, e),
        }
    }

    async fn flush(&self) -> PipelineResult<FlushReport> {
        Ok(self.writer.flush().await?)
    }
}
