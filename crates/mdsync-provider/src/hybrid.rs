//! Priority-ordered fallback across providers.

use crate::client::ProviderClient;
use chrono::NaiveDate;
use mdsync_core::{
    DataKind, DividendEvent, IssuerProfile, PricePoint, ProviderBatch, ProviderId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Provider priority per data kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOrder {
    pub prices: Vec<ProviderId>,
    pub dividends: Vec<ProviderId>,
    pub issuer: Vec<ProviderId>,
    pub discovery: Vec<ProviderId>,
    pub bulk_eod: Vec<ProviderId>,
}

impl Default for FetchOrder {
    fn default() -> Self {
        Self {
            prices: vec![ProviderId::TIINGO],
            dividends: vec![
                ProviderId::POLYGON,
                ProviderId::ALPHA_VANTAGE,
                ProviderId::TIINGO,
            ],
            issuer: vec![
                ProviderId::POLYGON,
                ProviderId::ALPHA_VANTAGE,
                ProviderId::TIINGO,
            ],
            discovery: vec![ProviderId::POLYGON, ProviderId::ALPHA_VANTAGE],
            bulk_eod: vec![ProviderId::POLYGON],
        }
    }
}

impl FetchOrder {
    pub fn for_kind(&self, kind: DataKind) -> &[ProviderId] {
        match kind {
            DataKind::Prices => &self.prices,
            DataKind::Dividends => &self.dividends,
            DataKind::Issuer => &self.issuer,
        }
    }
}

/// Result of a hybrid fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum HybridOutcome<T> {
    Found { provider: ProviderId, records: T },
    /// Every available provider in the order came back empty.
    NoData,
}

impl<T> HybridOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

impl<T> From<Option<ProviderBatch<T>>> for HybridOutcome<Vec<T>> {
    fn from(batch: Option<ProviderBatch<T>>) -> Self {
        match batch {
            Some(b) if !b.is_empty() => Self::Found {
                provider: b.provider,
                records: b.records,
            },
            _ => Self::NoData,
        }
    }
}

/// Tries providers in configured order and keeps the first non-empty answer.
///
/// Unavailable providers are skipped without a call. Clients that are not
/// registered are ignored.
#[derive(Clone)]
pub struct HybridFetcher {
    clients: HashMap<ProviderId, Arc<dyn ProviderClient>>,
    order: FetchOrder,
}

impl HybridFetcher {
    pub fn new(clients: Vec<Arc<dyn ProviderClient>>, order: FetchOrder) -> Self {
        let clients = clients.into_iter().map(|c| (c.id(), c)).collect();
        Self { clients, order }
    }

    pub fn order(&self) -> &FetchOrder {
        &self.order
    }

    pub fn client(&self, provider: ProviderId) -> Option<&Arc<dyn ProviderClient>> {
        self.clients.get(&provider)
    }

    /// Available clients for an order, in priority order.
    pub fn available(&self, order: &[ProviderId]) -> Vec<Arc<dyn ProviderClient>> {
        order
            .iter()
            .filter_map(|id| self.clients.get(id))
            .filter(|c| c.is_available())
            .cloned()
            .collect()
    }

    /// First provider of a kind's order that is registered, available or not.
    pub fn primary(&self, kind: DataKind) -> Option<ProviderId> {
        self.order
            .for_kind(kind)
            .iter()
            .copied()
            .find(|id| self.clients.contains_key(id))
    }

    pub async fn fetch_prices(&self, symbol: &str, from: NaiveDate) -> HybridOutcome<Vec<PricePoint>> {
        for client in self.available(&self.order.prices) {
            if let Some(batch) = client.fetch_prices(symbol, from).await {
                if !batch.is_empty() {
                    return found(symbol, DataKind::Prices, batch);
                }
            }
            debug!(symbol, provider = %client.id(), "No prices, trying next provider");
        }
        HybridOutcome::NoData
    }

    pub async fn fetch_dividends(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> HybridOutcome<Vec<DividendEvent>> {
        for client in self.available(&self.order.dividends) {
            if let Some(batch) = client.fetch_dividends(symbol, from).await {
                if !batch.is_empty() {
                    return found(symbol, DataKind::Dividends, batch);
                }
            }
            debug!(symbol, provider = %client.id(), "No dividends, trying next provider");
        }
        HybridOutcome::NoData
    }

    pub async fn fetch_issuer_info(&self, symbol: &str) -> HybridOutcome<IssuerProfile> {
        for client in self.available(&self.order.issuer) {
            match client.fetch_issuer_info(symbol).await {
                Some(profile) if !profile.is_blank() => {
                    return HybridOutcome::Found {
                        provider: client.id(),
                        records: profile,
                    }
                }
                _ => debug!(symbol, provider = %client.id(), "No profile, trying next provider"),
            }
        }
        HybridOutcome::NoData
    }

    /// Whole-market bars for a session from the first provider that has them.
    pub async fn fetch_bulk_eod(&self, date: NaiveDate) -> HybridOutcome<Vec<PricePoint>> {
        for client in self.available(&self.order.bulk_eod) {
            if let Some(batch) = client.fetch_bulk_eod(date).await {
                if !batch.is_empty() {
                    return found("*", DataKind::Prices, batch);
                }
            }
        }
        HybridOutcome::NoData
    }
}

fn found<T>(symbol: &str, kind: DataKind, batch: ProviderBatch<T>) -> HybridOutcome<Vec<T>> {
    debug!(
        symbol,
        kind = %kind,
        provider = %batch.provider,
        count = batch.count(),
        "Hybrid fetch hit"
    );
    HybridOutcome::Found {
        provider: batch.provider,
        records: batch.records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockProviderClient;
    use rust_decimal::Decimal;

    const A: ProviderId = ProviderId::new("a");
    const B: ProviderId = ProviderId::new("b");
    const C: ProviderId = ProviderId::new("c");

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, n).unwrap()
    }

    fn mock(id: ProviderId, available: bool) -> MockProviderClient {
        let mut m = MockProviderClient::new();
        m.expect_id().return_const(id);
        m.expect_is_available().return_const(available);
        m
    }

    fn dividends(provider: ProviderId, n: u32) -> Option<ProviderBatch<DividendEvent>> {
        let records = (1..=n)
            .map(|d| DividendEvent::new("O", day(d), Decimal::ONE, provider.as_str()))
            .collect();
        Some(ProviderBatch::new(provider, records))
    }

    fn order(ids: Vec<ProviderId>) -> FetchOrder {
        FetchOrder {
            prices: ids.clone(),
            dividends: ids.clone(),
            issuer: ids.clone(),
            discovery: ids,
            bulk_eod: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_first_non_empty_provider_wins() {
        let mut a = mock(A, true);
        a.expect_fetch_dividends()
            .times(1)
            .returning(|_, _| Some(ProviderBatch::new(A, Vec::new())));
        let mut b = mock(B, true);
        b.expect_fetch_dividends()
            .times(1)
            .returning(|_, _| dividends(B, 3));
        let mut c = mock(C, true);
        c.expect_fetch_dividends().times(0);

        let fetcher = HybridFetcher::new(
            vec![Arc::new(a), Arc::new(b), Arc::new(c)],
            order(vec![A, B, C]),
        );
        match fetcher.fetch_dividends("O", day(1)).await {
            HybridOutcome::Found { provider, records } => {
                assert_eq!(provider, B);
                assert_eq!(records.len(), 3);
            }
            HybridOutcome::NoData => panic!("expected B's records"),
        }
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_skipped_without_call() {
        let mut a = mock(A, false);
        a.expect_fetch_prices().times(0);
        let mut b = mock(B, true);
        b.expect_fetch_prices().times(1).returning(|symbol, from| {
            ProviderBatch::non_empty(
                B,
                vec![PricePoint::new(symbol, from, Decimal::TEN, Some(1), "b")],
            )
        });

        let fetcher = HybridFetcher::new(vec![Arc::new(a), Arc::new(b)], order(vec![A, B]));
        let outcome = fetcher.fetch_prices("XYZ", day(4)).await;
        assert!(outcome.is_found());
    }

    #[tokio::test]
    async fn test_all_empty_is_no_data() {
        let mut a = mock(A, true);
        a.expect_fetch_issuer_info().times(1).returning(|_| None);
        let mut b = mock(B, true);
        b.expect_fetch_issuer_info()
            .times(1)
            .returning(|s| Some(IssuerProfile {
                symbol: s.to_string(),
                source: "b".into(),
                ..Default::default()
            }));

        let fetcher = HybridFetcher::new(vec![Arc::new(a), Arc::new(b)], order(vec![A, B]));
        assert_eq!(fetcher.fetch_issuer_info("ZZZ").await, HybridOutcome::NoData);
    }

    #[test]
    fn test_default_order() {
        let order = FetchOrder::default();
        assert_eq!(order.for_kind(DataKind::Prices), &[ProviderId::TIINGO]);
        assert_eq!(order.for_kind(DataKind::Dividends)[0], ProviderId::POLYGON);
        assert_eq!(order.bulk_eod, vec![ProviderId::POLYGON]);
    }

    #[test]
    fn test_primary_ignores_unregistered() {
        let fetcher = HybridFetcher::new(vec![Arc::new(mock(B, false))], order(vec![A, B]));
        assert_eq!(fetcher.primary(DataKind::Prices), Some(B));
    }

    #[test]
    fn test_outcome_from_batch() {
        let empty: HybridOutcome<Vec<u8>> = Some(ProviderBatch::new(A, vec![])).into();
        assert_eq!(empty, HybridOutcome::NoData);
        let hit: HybridOutcome<Vec<u8>> = Some(ProviderBatch::new(A, vec![1])).into();
        assert!(hit.is_found());
    }
}
