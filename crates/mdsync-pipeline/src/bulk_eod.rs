//! Whole-market end-of-day load.
//!
//! One grouped-daily call replaces a per-symbol price fetch for every
//! tracked symbol.

use crate::blocking::with_store;
use crate::error::PipelineResult;
use chrono::NaiveDate;
use mdsync_core::{normalize_prices, DataKind, PricePoint, ProviderId};
use mdsync_persistence::{BatchWriter, BatchWriterConfig, MarketStore, PriceSink};
use mdsync_provider::{HybridFetcher, HybridOutcome};
use mdsync_telemetry::Metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct BulkEodReport {
    pub date: NaiveDate,
    /// `None` when no provider had bars for the date.
    pub provider: Option<ProviderId>,
    pub received: usize,
    pub dropped: usize,
    /// Bars for symbols that are tracked and not excluded.
    pub matched: usize,
    pub persisted: u64,
    pub failed: u64,
    pub tracked: usize,
    pub errors: Vec<String>,
}

impl BulkEodReport {
    fn empty(date: NaiveDate, tracked: usize) -> Self {
        Self {
            date,
            provider: None,
            received: 0,
            dropped: 0,
            matched: 0,
            persisted: 0,
            failed: 0,
            tracked,
            errors: Vec::new(),
        }
    }

    /// Per-symbol price calls avoided, net of the grouped call.
    pub fn calls_saved(&self) -> u64 {
        self.matched.saturating_sub(1) as u64
    }
}

pub struct BulkEodLoader {
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    writer_config: BatchWriterConfig,
}

impl BulkEodLoader {
    pub fn new(
        fetcher: Arc<HybridFetcher>,
        store: Arc<dyn MarketStore>,
        writer_config: BatchWriterConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            writer_config,
        }
    }

    pub async fn load(&self, date: NaiveDate) -> PipelineResult<BulkEodReport> {
        let tracked: HashSet<String> = with_store(&self.store, |s| s.tracked_symbols())
            .await?
            .into_iter()
            .collect();
        let mut report = BulkEodReport::empty(date, tracked.len());

        let (provider, bars) = match self.fetcher.fetch_bulk_eod(date).await {
            HybridOutcome::Found { provider, records } => (provider, records),
            HybridOutcome::NoData => {
                warn!(%date, "No provider returned end-of-day bars");
                return Ok(report);
            }
        };
        report.provider = Some(provider);
        report.received = bars.len();

        let (kept, dropped) = normalize_prices(bars);
        report.dropped = dropped;
        if dropped > 0 {
            Metrics::records_dropped(DataKind::Prices.as_str(), dropped);
        }
        let matched: Vec<PricePoint> = kept
            .into_iter()
            .filter(|bar| tracked.contains(&bar.symbol))
            .collect();
        report.matched = matched.len();

        let writer: BatchWriter<PricePoint> = BatchWriter::spawn(
            Arc::new(PriceSink::new(self.store.clone())),
            self.writer_config.clone(),
        );
        writer.enqueue_all(matched).await?;
        let flush = writer.stop().await?;
        report.persisted = flush.records_flushed;
        report.failed = flush.records_failed;
        report.errors = flush.errors;

        info!(
            %date,
            provider = %provider,
            received = report.received,
            matched = report.matched,
            persisted = report.persisted,
            failed = report.failed,
            "End-of-day load finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdsync_core::{ProviderBatch, SecurityKind, SymbolRecord};
    use mdsync_persistence::{ExclusionSource, MemoryStore};
    use mdsync_provider::{FetchOrder, MockProviderClient};
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[tokio::test]
    async fn test_only_tracked_symbols_are_persisted() {
        let store = Arc::new(MemoryStore::new());
        for symbol in ["O", "SCHD", "DEAD"] {
            store
                .upsert_symbol(&SymbolRecord::new(symbol, None, SecurityKind::Equity))
                .unwrap();
        }
        store
            .record_exclusion("DEAD", "no data from any provider", ExclusionSource::Ingestion)
            .unwrap();

        let mut polygon = MockProviderClient::new();
        polygon.expect_id().return_const(ProviderId::POLYGON);
        polygon.expect_is_available().return_const(true);
        polygon.expect_fetch_bulk_eod().times(1).returning(|date| {
            Some(ProviderBatch::new(
                ProviderId::POLYGON,
                vec![
                    PricePoint::new("O", date, dec!(55.1), Some(10), "polygon"),
                    PricePoint::new("SCHD", date, dec!(78.2), Some(10), "polygon"),
                    PricePoint::new("DEAD", date, dec!(1.0), Some(10), "polygon"),
                    PricePoint::new("AAPL", date, dec!(170), Some(10), "polygon"),
                    PricePoint::new("O", date, dec!(0), None, "polygon"),
                ],
            ))
        });
        let fetcher = Arc::new(HybridFetcher::new(vec![Arc::new(polygon)], FetchOrder::default()));
        let loader = BulkEodLoader::new(fetcher, store.clone(), BatchWriterConfig::default());

        let report = loader.load(day()).await.unwrap();
        assert_eq!(report.provider, Some(ProviderId::POLYGON));
        assert_eq!(report.received, 5);
        assert_eq!(report.matched, 2);
        assert_eq!(report.persisted, 2);
        assert_eq!(store.price_count(), 2);
        assert!(store.prices_for("DEAD").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_provider_data() {
        let mut polygon = MockProviderClient::new();
        polygon.expect_id().return_const(ProviderId::POLYGON);
        polygon.expect_is_available().return_const(true);
        polygon.expect_fetch_bulk_eod().returning(|_| None);
        let fetcher = Arc::new(HybridFetcher::new(vec![Arc::new(polygon)], FetchOrder::default()));
        let loader =
            BulkEodLoader::new(fetcher, Arc::new(MemoryStore::new()), BatchWriterConfig::default());

        let report = loader.load(day()).await.unwrap();
        assert!(report.provider.is_none());
        assert_eq!(report.persisted, 0);
    }
}
