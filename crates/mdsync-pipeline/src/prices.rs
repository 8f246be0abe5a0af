//! Daily price ingestion.

use crate::blocking::with_store;
use crate::error::{PipelineError, PipelineResult};
use crate::planner::IncrementalPlanner;
use crate::processor::{BatchOptions, SymbolProcessor};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mdsync_core::{normalize_prices, DataKind, PricePoint, SkipReason, SymbolOutcome};
use mdsync_persistence::{
    BatchWriter, BatchWriterConfig, ExclusionSource, FlushReport, MarketStore, PriceSink,
};
use mdsync_provider::{HybridFetcher, HybridOutcome};
use mdsync_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NO_DATA_REASON: &str = "no data from any provider";

pub struct PriceProcessor {
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    planner: IncrementalPlanner,
    writer: BatchWriter<PricePoint>,
    /// Latest stored date per prepared symbol; `None` when nothing is stored.
    latest: Mutex<HashMap<String, Option<NaiveDate>>>,
    today: fn() -> NaiveDate,
}

impl PriceProcessor {
    /// Spawns the processor's writer; call from within a tokio runtime.
    pub fn new(
        fetcher: Arc<HybridFetcher>,
        store: Arc<dyn MarketStore>,
        planner: IncrementalPlanner,
        writer_config: BatchWriterConfig,
    ) -> Self {
        let writer = BatchWriter::spawn(Arc::new(PriceSink::new(store.clone())), writer_config);
        Self {
            fetcher,
            store,
            planner,
            writer,
            latest: Mutex::new(HashMap::new()),
            today: || Utc::now().date_naive(),
        }
    }

    /// Pin "today" for deterministic windows.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Drain and stop the writer.
    pub async fn shutdown(self) -> PipelineResult<FlushReport> {
        Ok(self.writer.stop().await?)
    }

    async fn latest_for(&self, symbol: &str) -> PipelineResult<Option<NaiveDate>> {
        let cached = self.latest.lock().get(symbol).copied();
        if let Some(latest) = cached {
            return Ok(latest);
        }
        let wanted = vec![symbol.to_string()];
        let found = with_store(&self.store, move |s| s.latest_price_dates(&wanted)).await?;
        Ok(found.get(symbol).copied())
    }

    async fn exclude(&self, symbol: &str) -> PipelineResult<()> {
        let owned = symbol.to_string();
        with_store(&self.store, move |s| {
            s.record_exclusion(&owned, NO_DATA_REASON, ExclusionSource::Ingestion)
        })
        .await?;
        Metrics::symbol_excluded(ExclusionSource::Ingestion.as_str());
        Ok(())
    }

    async fn run_symbol(&self, symbol: &str, options: &BatchOptions) -> PipelineResult<SymbolOutcome> {
        let today = (self.today)();
        let from = if let Some(from) = options.from_date {
            from
        } else if options.force_full_refresh {
            self.planner.full_window_start(today)
        } else {
            let latest = self.latest_for(symbol).await?;
            if options.skip_current && self.planner.is_current(latest, today) {
                debug!(symbol, ?latest, "Prices already current");
                return Ok(SymbolOutcome::Skipped(SkipReason::UpToDate));
            }
            self.planner.from_date(latest, today)
        };

        match self.fetcher.fetch_prices(symbol, from).await {
            HybridOutcome::NoData => {
                warn!(symbol, %from, "No prices from any provider, excluding symbol");
                self.exclude(symbol).await?;
                Ok(SymbolOutcome::Failed(NO_DATA_REASON.to_string()))
            }
            HybridOutcome::Found { provider, records } => {
                let (kept, dropped) = normalize_prices(records);
                if dropped > 0 {
                    Metrics::records_dropped(DataKind::Prices.as_str(), dropped);
                }
                if kept.is_empty() {
                    return Ok(SymbolOutcome::Failed(format!(
                        "all {dropped} records from {provider} were invalid"
                    )));
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
impl SymbolProcessor for PriceProcessor {
    fn kind(&self) -> DataKind {
        DataKind::Prices
    }

    fn store(&self) -> &Arc<dyn MarketStore> {
        &self.store
    }

    async fn prepare(&self, symbols: &[String]) -> PipelineResult<()> {
        let wanted = symbols.to_vec();
        let found = with_store(&self.store, move |s| s.latest_price_dates(&wanted)).await?;
        let latest = symbols
            .iter()
            .map(|s| (s.clone(), found.get(s).copied()))
            .collect();
        *self.latest.lock() = latest;
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

pub(crate) fn failed(symbol: &str, error: PipelineError) -> SymbolOutcome {
    warn!(symbol, error = %error, "Symbol failed");
    SymbolOutcome::Failed(error.to_string())
}
