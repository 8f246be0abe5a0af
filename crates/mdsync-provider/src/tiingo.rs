//! Tiingo end-of-day API.
//!
//! Prices and dividends come from the same daily-prices endpoint: every bar
//! carries a `divCash` field that is non-zero on ex-dividend days. Tiingo has
//! no listing endpoint, so discovery is empty.

use crate::client::{Availability, ClientSettings, ProviderClient};
use crate::error::{ProviderError, ProviderResult};
use crate::fetch::FetchWrapper;
use crate::parse::{non_blank_owned, parse_day, venue_name, volume_from_f64};
use async_trait::async_trait;
use chrono::NaiveDate;
use mdsync_core::{
    DiscoveredSymbol, DividendEvent, IssuerProfile, PricePoint, ProviderBatch, ProviderId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.tiingo.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyBar {
    date: String,
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    volume: Option<f64>,
    adj_close: Option<Decimal>,
    #[serde(default)]
    div_cash: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerMeta {
    ticker: Option<String>,
    name: Option<String>,
    exchange_code: Option<String>,
    description: Option<String>,
}

pub struct TiingoClient {
    settings: ClientSettings,
    fetch: FetchWrapper,
    availability: Availability,
}

impl TiingoClient {
    pub fn new(settings: ClientSettings, fetch: FetchWrapper) -> Self {
        let availability = Availability::new(ProviderId::TIINGO, settings.has_usable_credential());
        Self {
            settings,
            fetch,
            availability,
        }
    }

    async fn daily_bars(&self, symbol: &str, from: NaiveDate) -> Option<Vec<DailyBar>> {
        if !self.is_available() {
            return None;
        }
        let url = format!(
            "{}/tiingo/daily/{}/prices",
            self.settings.base_url,
            symbol.to_ascii_lowercase()
        );
        let query = [
            ("startDate", from.format("%Y-%m-%d").to_string()),
            ("token", self.settings.api_key()),
        ];
        let body = self
            .availability
            .body_of(self.fetch.get(&url, &query).await)?;

        match parse_bars(&body) {
            Ok(bars) => Some(bars),
            Err(e) => {
                warn!(provider = %ProviderId::TIINGO, symbol, error = %e, "Unparseable daily prices");
                None
            }
        }
    }
}

fn parse_bars(body: &str) -> ProviderResult<Vec<DailyBar>> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        provider: ProviderId::TIINGO.as_str(),
        message: e.to_string(),
    })
}

fn bars_to_prices(symbol: &str, bars: &[DailyBar]) -> Vec<PricePoint> {
    bars.iter()
        .filter_map(|bar| {
            let date = parse_day(&bar.date)?;
            let close = bar.close?;
            let mut point = PricePoint::new(
                symbol,
                date,
                close,
                bar.volume.and_then(volume_from_f64),
                ProviderId::TIINGO.as_str(),
            );
            point.open = bar.open;
            point.high = bar.high;
            point.low = bar.low;
            point.adj_close = bar.adj_close;
            Some(point)
        })
        .collect()
}

fn bars_to_dividends(symbol: &str, bars: &[DailyBar]) -> Vec<DividendEvent> {
    bars.iter()
        .filter_map(|bar| {
            let amount = bar.div_cash.filter(|d| *d > Decimal::ZERO)?;
            let ex_date = parse_day(&bar.date)?;
            Some(DividendEvent::new(
                symbol,
                ex_date,
                amount,
                ProviderId::TIINGO.as_str(),
            ))
        })
        .collect()
}

#[async_trait]
impl ProviderClient for TiingoClient {
    fn id(&self) -> ProviderId {
        ProviderId::TIINGO
    }

    fn is_available(&self) -> bool {
        self.availability.is_enabled()
    }

    async fn fetch_prices(&self, symbol: &str, from: NaiveDate) -> Option<ProviderBatch<PricePoint>> {
        let bars = self.daily_bars(symbol, from).await?;
        let prices = bars_to_prices(symbol, &bars);
        debug!(provider = %ProviderId::TIINGO, symbol, count = prices.len(), "Fetched prices");
        ProviderBatch::non_empty(ProviderId::TIINGO, prices)
    }

    async fn fetch_dividends(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> Option<ProviderBatch<DividendEvent>> {
        let bars = self.daily_bars(symbol, from).await?;
        ProviderBatch::non_empty(ProviderId::TIINGO, bars_to_dividends(symbol, &bars))
    }

    async fn fetch_issuer_info(&self, symbol: &str) -> Option<IssuerProfile> {
        if !self.is_available() {
            return None;
        }
        let url = format!(
            "{}/tiingo/daily/{}",
            self.settings.base_url,
            symbol.to_ascii_lowercase()
        );
        let query = [("token", self.settings.api_key())];
        let body = self
            .availability
            .body_of(self.fetch.get(&url, &query).await)?;

        let meta: TickerMeta = match serde_json::from_str(&body) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(provider = %ProviderId::TIINGO, symbol, error = %e, "Unparseable ticker metadata");
                return None;
            }
        };

        let profile = IssuerProfile {
            symbol: meta
                .ticker
                .map(|t| t.to_ascii_uppercase())
                .unwrap_or_else(|| symbol.to_string()),
            name: non_blank_owned(meta.name),
            venue: non_blank_owned(meta.exchange_code).map(|c| venue_name(&c)),
            kind: None,
            description: non_blank_owned(meta.description),
            sector: None,
            industry: None,
            website: None,
            source: ProviderId::TIINGO.to_string(),
        };
        (!profile.is_blank()).then_some(profile)
    }

    async fn discover_symbols(&self, _limit: usize) -> Vec<DiscoveredSymbol> {
        Vec::new()
    }
}
