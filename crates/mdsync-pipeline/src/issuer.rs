//! Issuer profile refresh.

use crate::blocking::with_store;
use crate::error::PipelineResult;
use crate::prices::failed;
use crate::processor::{BatchOptions, SymbolProcessor};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mdsync_core::{DataKind, SkipReason, SymbolOutcome};
use mdsync_persistence::MarketStore;
use mdsync_provider::{HybridFetcher, HybridOutcome};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Profiles are written straight onto the symbol row; there is no writer.
pub struct IssuerProcessor {
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    /// Profiles refreshed more recently than this are skipped.
    refresh_after: Duration,
    refreshed_at: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
}

impl IssuerProcessor {
    pub fn new(fetcher: Arc<HybridFetcher>, store: Arc<dyn MarketStore>, refresh_days: u32) -> Self {
        Self {
            fetcher,
            store,
            refresh_after: Duration::days(i64::from(refresh_days)),
            refreshed_at: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.refreshed_at
            .lock()
            .get(symbol)
            .copied()
            .flatten()
            .is_some_and(|at| now - at < self.refresh_after)
    }

    async fn run_symbol(&self, symbol: &str, options: &BatchOptions) -> PipelineResult<SymbolOutcome> {
        let now = Utc::now();
        if !options.force_full_refresh && self.is_fresh(symbol, now) {
            return Ok(SymbolOutcome::Skipped(SkipReason::FreshProfile));
        }

        match self.fetcher.fetch_issuer_info(symbol).await {
            HybridOutcome::NoData => {
                debug!(symbol, "No issuer profile from any provider");
                Ok(SymbolOutcome::Skipped(SkipReason::NoProfile))
            }
            HybridOutcome::Found { provider, records } => {
                let mut profile = records;
                profile.symbol = symbol.to_string();
                with_store(&self.store, move |s| s.apply_profile(&profile, now)).await?;
                self.refreshed_at
                    .lock()
                    .insert(symbol.to_string(), Some(now));
                Ok(SymbolOutcome::Succeeded {
                    provider: Some(provider),
                    records: 1,
                    dropped: 0,
                })
            }
        }
    }
}

#[async_trait]
impl SymbolProcessor for IssuerProcessor {
    fn kind(&self) -> DataKind {
        DataKind::Issuer
    }

    fn store(&self) -> &Arc<dyn MarketStore> {
        &self.store
    }

    async fn prepare(&self, symbols: &[String]) -> PipelineResult<()> {
        let wanted = symbols.to_vec();
        let rows = with_store(&self.store, move |s| s.symbols(&wanted)).await?;
        let mut refreshed: HashMap<String, Option<DateTime<Utc>>> =
            symbols.iter().map(|s| (s.clone(), None)).collect();
        for row in rows {
            refreshed.insert(row.symbol, row.profile_refreshed_at);
        }
        *self.refreshed_at.lock() = refreshed;
        Ok(())
    }

    async fn process_symbol(&self, symbol: &str, options: &BatchOptions) -> SymbolOutcome {
        match self.run_symbol(symbol, options).await {
            Ok(outcome) => outcome,
            Err(e) => failed(symbol, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdsync_core::{IssuerProfile, ProviderId, SecurityKind, SymbolRecord};
    use mdsync_persistence::MemoryStore;
    use mdsync_provider::{FetchOrder, MockProviderClient};
    use tokio_util::sync::CancellationToken;

    fn profile_client(calls: usize) -> MockProviderClient {
        let mut client = MockProviderClient::new();
        client.expect_id().return_const(ProviderId::POLYGON);
        client.expect_is_available().return_const(true);
        client
            .expect_fetch_issuer_info()
            .times(calls)
            .returning(|symbol| {
                Some(IssuerProfile {
                    symbol: symbol.to_string(),
                    name: Some("Realty Income Corp".into()),
                    sector: Some("Real Estate".into()),
                    source: "polygon".into(),
                    ..Default::default()
                })
            });
        client
    }

    fn fetcher(client: MockProviderClient) -> Arc<HybridFetcher> {
        Arc::new(HybridFetcher::new(vec![Arc::new(client)], FetchOrder::default()))
    }

    #[tokio::test]
    async fn test_profile_is_applied_then_skipped_while_fresh() {
        let store: Arc<dyn MarketStore> = Arc::new(MemoryStore::new());
        store
            .upsert_symbol(&SymbolRecord::new("O", Some("NYSE".into()), SecurityKind::Equity))
            .unwrap();
        let processor = IssuerProcessor::new(fetcher(profile_client(1)), store.clone(), 30);
        let symbols = vec!["O".to_string()];
        let cancel = CancellationToken::new();

        let first = processor
            .process_batch(&symbols, &BatchOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(first.stats.succeeded, 1);

        let row = store.symbols(&symbols).unwrap().pop().unwrap();
        assert_eq!(row.name.as_deref(), Some("Realty Income Corp"));
        assert_eq!(row.venue.as_deref(), Some("NYSE"));
        assert!(row.profile_refreshed_at.is_some());

        // Second pass sees the fresh profile and makes no call.
        let second = processor
            .process_batch(&symbols, &BatchOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(second.stats.skipped, 1);
        assert_eq!(second.skipped_for(SkipReason::FreshProfile), 1);
    }

    #[tokio::test]
    async fn test_missing_profile_is_a_skip() {
        let mut client = MockProviderClient::new();
        client.expect_id().return_const(ProviderId::POLYGON);
        client.expect_is_available().return_const(true);
        client.expect_fetch_issuer_info().returning(|_| None);

        let store: Arc<dyn MarketStore> = Arc::new(MemoryStore::new());
        let processor = IssuerProcessor::new(fetcher(client), store, 30);
        let outcome = processor
            .process_symbol("ZZZ", &BatchOptions::default())
            .await;
        assert_eq!(outcome, SymbolOutcome::Skipped(SkipReason::NoProfile));
    }
}
