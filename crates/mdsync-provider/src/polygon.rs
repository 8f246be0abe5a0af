//! Polygon.io REST API.
//!
//! Aggregates for prices, the reference dividends endpoint, the ticker
//! listing for discovery and grouped-daily bars for whole-market end-of-day
//! loads. Listing pages are followed through `next_url`.

use crate::client::{Availability, ClientSettings, ProviderClient};
use crate::fetch::FetchWrapper;
use crate::parse::{
    day_from_millis, non_blank_owned, parse_day, venue_allowed, venue_name, volume_from_f64,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mdsync_core::{
    normalize_symbol, DiscoveredSymbol, DividendEvent, IssuerProfile, PricePoint, ProviderBatch,
    ProviderId, SecurityKind,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

/// Listing page size; the endpoint maximum.
const LISTING_PAGE_LIMIT: usize = 1000;
/// Safety bound on `next_url` pagination.
const MAX_LISTING_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct ResultsPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Aggregate {
    /// Ticker; present only in grouped-daily results.
    #[serde(rename = "T")]
    ticker: Option<String>,
    #[serde(rename = "t")]
    timestamp_ms: i64,
    #[serde(rename = "o")]
    open: Option<Decimal>,
    #[serde(rename = "h")]
    high: Option<Decimal>,
    #[serde(rename = "l")]
    low: Option<Decimal>,
    #[serde(rename = "c")]
    close: Option<Decimal>,
    #[serde(rename = "v")]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Dividend {
    ticker: Option<String>,
    cash_amount: Option<Decimal>,
    ex_dividend_date: Option<String>,
    record_date: Option<String>,
    pay_date: Option<String>,
    declaration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    ticker: String,
    name: Option<String>,
    primary_exchange: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
    sic_description: Option<String>,
    homepage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerDetail {
    results: Option<Ticker>,
}

pub struct PolygonClient {
    settings: ClientSettings,
    fetch: FetchWrapper,
    availability: Availability,
}

impl PolygonClient {
    pub fn new(settings: ClientSettings, fetch: FetchWrapper) -> Self {
        let availability =
            Availability::new(ProviderId::POLYGON, settings.has_usable_credential());
        Self {
            settings,
            fetch,
            availability,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        mut query: Vec<(&str, String)>,
    ) -> Option<T> {
        if !self.is_available() {
            return None;
        }
        query.push(("apiKey", self.settings.api_key()));
        let body = self
            .availability
            .body_of(self.fetch.get(url, &query).await)?;

        match serde_json::from_str(&body) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(provider = %ProviderId::POLYGON, url, error = %e, "Unparseable response");
                None
            }
        }
    }
}

fn aggregate_to_price(symbol: &str, agg: &Aggregate) -> Option<PricePoint> {
    let date = day_from_millis(agg.timestamp_ms)?;
    let close = agg.close?;
    let mut point = PricePoint::new(
        symbol,
        date,
        close,
        agg.volume.and_then(volume_from_f64),
        ProviderId::POLYGON.as_str(),
    );
    point.open = agg.open;
    point.high = agg.high;
    point.low = agg.low;
    // Aggregates are requested split-adjusted.
    point.adj_close = Some(close);
    Some(point)
}

fn dividend_to_event(symbol: &str, div: &Dividend) -> Option<DividendEvent> {
    let ex_date = div.ex_dividend_date.as_deref().and_then(parse_day)?;
    let amount = div.cash_amount?;
    let symbol = div.ticker.as_deref().unwrap_or(symbol);
    let mut event = DividendEvent::new(symbol, ex_date, amount, ProviderId::POLYGON.as_str());
    event.record_date = div.record_date.as_deref().and_then(parse_day);
    event.pay_date = div.pay_date.as_deref().and_then(parse_day);
    event.declaration_date = div.declaration_date.as_deref().and_then(parse_day);
    Some(event)
}

fn ticker_to_discovered(ticker: &Ticker, allowed_venues: &[String]) -> Option<DiscoveredSymbol> {
    let symbol = normalize_symbol(&ticker.ticker)?;
    let kind = ticker
        .kind
        .as_deref()
        .and_then(SecurityKind::from_provider_code)?;
    let venue = ticker.primary_exchange.as_deref().map(venue_name);
    if !venue_allowed(venue.as_deref(), allowed_venues) {
        return None;
    }
    Some(DiscoveredSymbol {
        symbol,
        venue,
        kind,
        provider: ProviderId::POLYGON,
    })
}

fn ticker_to_profile(ticker: Ticker) -> IssuerProfile {
    IssuerProfile {
        symbol: ticker.ticker.to_ascii_uppercase(),
        name: non_blank_owned(ticker.name),
        venue: ticker.primary_exchange.as_deref().map(venue_name),
        kind: ticker
            .kind
            .as_deref()
            .and_then(SecurityKind::from_provider_code),
        description: non_blank_owned(ticker.description),
        sector: None,
        industry: non_blank_owned(ticker.sic_description),
        website: non_blank_owned(ticker.homepage_url),
        source: ProviderId::POLYGON.to_string(),
    }
}

#[async_trait]
impl ProviderClient for PolygonClient {
    fn id(&self) -> ProviderId {
        ProviderId::POLYGON
    }

    fn is_available(&self) -> bool {
        self.availability.is_enabled()
    }

    async fn fetch_prices(&self, symbol: &str, from: NaiveDate) -> Option<ProviderBatch<PricePoint>> {
        let to = Utc::now().date_naive();
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            self.settings.base_url,
            symbol,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        let query = vec![
            ("adjusted", "true".to_string()),
            ("sort", "asc".to_string()),
            ("limit", "50000".to_string()),
        ];
        let page: ResultsPage<Aggregate> = self.get_json(&url, query).await?;
        let prices: Vec<PricePoint> = page
            .results
            .iter()
            .filter_map(|agg| aggregate_to_price(symbol, agg))
            .collect();
        debug!(provider = %ProviderId::POLYGON, symbol, count = prices.len(), "Fetched prices");
        ProviderBatch::non_empty(ProviderId::POLYGON, prices)
    }

    async fn fetch_dividends(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> Option<ProviderBatch<DividendEvent>> {
        let url = format!("{}/v3/reference/dividends", self.settings.base_url);
        let query = vec![
            ("ticker", symbol.to_string()),
            ("ex_dividend_date.gte", from.format("%Y-%m-%d").to_string()),
            ("order", "asc".to_string()),
            ("limit", "1000".to_string()),
        ];
        let page: ResultsPage<Dividend> = self.get_json(&url, query).await?;
        let events: Vec<DividendEvent> = page
            .results
            .iter()
            .filter_map(|d| dividend_to_event(symbol, d))
            .collect();
        ProviderBatch::non_empty(ProviderId::POLYGON, events)
    }

    async fn fetch_issuer_info(&self, symbol: &str) -> Option<IssuerProfile> {
        let url = format!("{}/v3/reference/tickers/{}", self.settings.base_url, symbol);
        let detail: TickerDetail = self.get_json(&url, Vec::new()).await?;
        let profile = ticker_to_profile(detail.results?);
        (!profile.is_blank()).then_some(profile)
    }

    async fn discover_symbols(&self, limit: usize) -> Vec<DiscoveredSymbol> {
        let mut discovered = Vec::new();
        let mut url = format!("{}/v3/reference/tickers", self.settings.base_url);
        let mut query = vec![
            ("market", "stocks".to_string()),
            ("active", "true".to_string()),
            ("limit", LISTING_PAGE_LIMIT.min(limit.max(1)).to_string()),
        ];

        for page_no in 0..MAX_LISTING_PAGES {
            let Some(page) = self.get_json::<ResultsPage<Ticker>>(&url, query).await else {
                break;
            };
            discovered.extend(
                page.results
                    .iter()
                    .filter_map(|t| ticker_to_discovered(t, &self.settings.allowed_venues)),
            );
            debug!(
                provider = %ProviderId::POLYGON,
                page = page_no,
                total = discovered.len(),
                "Listing page fetched"
            );

            match page.next_url {
                Some(next) if discovered.len() < limit => {
                    // `next_url` carries its own cursor parameters.
                    url = next;
                    query = Vec::new();
                }
                _ => break,
            }
        }

        discovered.truncate(limit);
        discovered
    }

    async fn fetch_bulk_eod(&self, date: NaiveDate) -> Option<ProviderBatch<PricePoint>> {
        let url = format!(
            "{}/v2/aggs/grouped/locale/us/market/stocks/{}",
            self.settings.base_url,
            date.format("%Y-%m-%d")
        );
        let query = vec![("adjusted", "true".to_string())];
        let page: ResultsPage<Aggregate> = self.get_json(&url, query).await?;
        let prices: Vec<PricePoint> = page
            .results
            .iter()
            .filter_map(|agg| {
                let ticker = agg.ticker.as_deref()?;
                aggregate_to_price(ticker, agg)
            })
            .collect();
        ProviderBatch::non_empty(ProviderId::POLYGON, prices)
    }
}
