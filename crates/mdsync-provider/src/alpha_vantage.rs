//! Alpha Vantage query API.
//!
//! Daily adjusted series and the listing are requested as CSV; the company
//! overview is JSON. Throttled requests come back as HTTP 200 with a
//! `"Note"` or `"Information"` payload, so this client registers throttle
//! markers on its fetch wrapper.

use crate::client::{Availability, ClientSettings, ProviderClient};
use crate::error::{ProviderError, ProviderResult};
use crate::fetch::FetchWrapper;
use crate::parse::{decimal_cell, non_blank, parse_day, venue_allowed, venue_name};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mdsync_core::{
    normalize_symbol, DiscoveredSymbol, DividendEvent, IssuerProfile, PricePoint, ProviderBatch,
    ProviderId, SecurityKind,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// Payload fragments Alpha Vantage returns with HTTP 200 when throttling.
pub const THROTTLE_MARKERS: &[&str] = &["\"Note\"", "API rate limit", "call frequency"];

/// Compact output covers roughly the last 100 sessions.
const COMPACT_WINDOW_DAYS: i64 = 100;

#[derive(Debug, Deserialize)]
struct DailyRow {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
    adjusted_close: String,
    volume: String,
    dividend_amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingRow {
    symbol: String,
    exchange: String,
    asset_type: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Overview {
    symbol: Option<String>,
    asset_type: Option<String>,
    name: Option<String>,
    description: Option<String>,
    exchange: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    official_site: Option<String>,
}

pub struct AlphaVantageClient {
    settings: ClientSettings,
    fetch: FetchWrapper,
    availability: Availability,
}

impl AlphaVantageClient {
    pub fn new(settings: ClientSettings, fetch: FetchWrapper) -> Self {
        let availability =
            Availability::new(ProviderId::ALPHA_VANTAGE, settings.has_usable_credential());
        Self {
            settings,
            fetch: fetch.with_throttle_markers(THROTTLE_MARKERS),
            availability,
        }
    }

    async fn query(&self, mut params: Vec<(&str, String)>) -> Option<String> {
        if !self.is_available() {
            return None;
        }
        params.push(("apikey", self.settings.api_key()));
        let url = format!("{}/query", self.settings.base_url);
        self.availability
            .body_of(self.fetch.get(&url, &params).await)
    }

    async fn daily_rows(&self, symbol: &str, from: NaiveDate) -> Option<Vec<DailyRow>> {
        let today = Utc::now().date_naive();
        let output_size = if (today - from).num_days() <= COMPACT_WINDOW_DAYS {
            "compact"
        } else {
            "full"
        };
        let body = self
            .query(vec![
                ("function", "TIME_SERIES_DAILY_ADJUSTED".to_string()),
                ("symbol", symbol.to_string()),
                ("outputsize", output_size.to_string()),
                ("datatype", "csv".to_string()),
            ])
            .await?;

        match parse_csv::<DailyRow>(&body) {
            Ok(rows) => Some(rows),
            Err(e) => {
                debug!(provider = %ProviderId::ALPHA_VANTAGE, symbol, error = %e, "No daily series");
                None
            }
        }
    }
}

/// Parse a CSV body. A JSON body here is an error message, not data.
fn parse_csv<T: serde::de::DeserializeOwned>(body: &str) -> ProviderResult<Vec<T>> {
    if body.trim_start().starts_with('{') {
        return Err(ProviderError::Parse {
            provider: ProviderId::ALPHA_VANTAGE.as_str(),
            message: "expected CSV, got JSON message".to_string(),
        });
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn rows_to_prices(symbol: &str, rows: &[DailyRow], from: NaiveDate) -> Vec<PricePoint> {
    rows.iter()
        .filter_map(|row| {
            let date = parse_day(&row.timestamp).filter(|d| *d >= from)?;
            let close = decimal_cell(&row.close)?;
            let volume = non_blank(&row.volume).and_then(|v| v.parse::<i64>().ok());
            let mut point = PricePoint::new(
                symbol,
                date,
                close,
                volume,
                ProviderId::ALPHA_VANTAGE.as_str(),
            );
            point.open = decimal_cell(&row.open);
            point.high = decimal_cell(&row.high);
            point.low = decimal_cell(&row.low);
            point.adj_close = decimal_cell(&row.adjusted_close);
            Some(point)
        })
        .collect()
}

fn rows_to_dividends(symbol: &str, rows: &[DailyRow], from: NaiveDate) -> Vec<DividendEvent> {
    rows.iter()
        .filter_map(|row| {
            let amount = decimal_cell(&row.dividend_amount).filter(|a| *a > Decimal::ZERO)?;
            let ex_date = parse_day(&row.timestamp).filter(|d| *d >= from)?;
            Some(DividendEvent::new(
                symbol,
                ex_date,
                amount,
                ProviderId::ALPHA_VANTAGE.as_str(),
            ))
        })
        .collect()
}

fn listing_to_discovered(row: &ListingRow, allowed_venues: &[String]) -> Option<DiscoveredSymbol> {
    if !row.status.is_empty() && !row.status.eq_ignore_ascii_case("active") {
        return None;
    }
    let symbol = normalize_symbol(&row.symbol)?;
    let kind = SecurityKind::from_provider_code(&row.asset_type)?;
    let venue = non_blank(&row.exchange).map(venue_name);
    if !venue_allowed(venue.as_deref(), allowed_venues) {
        return None;
    }
    Some(DiscoveredSymbol {
        symbol,
        venue,
        kind,
        provider: ProviderId::ALPHA_VANTAGE,
    })
}

fn overview_to_profile(symbol: &str, overview: Overview) -> IssuerProfile {
    let own = |v: Option<String>| v.as_deref().and_then(non_blank).map(str::to_string);
    IssuerProfile {
        symbol: own(overview.symbol)
            .map(|s| s.to_ascii_uppercase())
            .unwrap_or_else(|| symbol.to_string()),
        name: own(overview.name),
        venue: own(overview.exchange).map(|e| venue_name(&e)),
        kind: overview
            .asset_type
            .as_deref()
            .and_then(SecurityKind::from_provider_code),
        description: own(overview.description),
        sector: own(overview.sector).map(|s| title_case(&s)),
        industry: own(overview.industry).map(|s| title_case(&s)),
        website: own(overview.official_site),
        source: ProviderId::ALPHA_VANTAGE.to_string(),
    }
}

/// `"REAL ESTATE"` -> `"Real Estate"`.
fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ProviderClient for AlphaVantageClient {
    fn id(&self) -> ProviderId {
        ProviderId::ALPHA_VANTAGE
    }

    fn is_available(&self) -> bool {
        self.availability.is_enabled()
    }

    async fn fetch_prices(&self, symbol: &str, from: NaiveDate) -> Option<ProviderBatch<PricePoint>> {
        let rows = self.daily_rows(symbol, from).await?;
        ProviderBatch::non_empty(
            ProviderId::ALPHA_VANTAGE,
            rows_to_prices(symbol, &rows, from),
        )
    }

    async fn fetch_dividends(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> Option<ProviderBatch<DividendEvent>> {
        let rows = self.daily_rows(symbol, from).await?;
        ProviderBatch::non_empty(
            ProviderId::ALPHA_VANTAGE,
            rows_to_dividends(symbol, &rows, from),
        )
    }

    async fn fetch_issuer_info(&self, symbol: &str) -> Option<IssuerProfile> {
        let body = self
            .query(vec![
                ("function", "OVERVIEW".to_string()),
                ("symbol", symbol.to_string()),
            ])
            .await?;

        // Unknown symbols come back as `{}`.
        let overview: Overview = match serde_json::from_str(&body) {
            Ok(overview) => overview,
            Err(e) => {
                warn!(provider = %ProviderId::ALPHA_VANTAGE, symbol, error = %e, "Unparseable overview");
                return None;
            }
        };
        let profile = overview_to_profile(symbol, overview);
        (!profile.is_blank()).then_some(profile)
    }

    async fn discover_symbols(&self, limit: usize) -> Vec<DiscoveredSymbol> {
        let Some(body) = self
            .query(vec![("function", "LISTING_STATUS".to_string())])
            .await
        else {
            return Vec::new();
        };

        match parse_csv::<ListingRow>(&body) {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| listing_to_discovered(row, &self.settings.allowed_venues))
                .take(limit)
                .collect(),
            Err(e) => {
                warn!(provider = %ProviderId::ALPHA_VANTAGE, error = %e, "Unparseable listing");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DAILY: &str = "timestamp,open,high,low,close,adjusted_close,volume,dividend_amount,split_coefficient\n\
2024-03-04,55.10,55.90,54.80,55.40,55.40,4100000,0.0000,1.0\n\
2024-02-29,54.00,54.50,53.90,54.20,53.95,3900000,0.2565,1.0\n\
2023-12-29,52.00,52.50,51.90,52.20,51.70,3000000,0.0000,1.0\n";

    fn from() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_daily_csv_to_prices() {
        let rows: Vec<DailyRow> = parse_csv(DAILY).unwrap();
        let prices = rows_to_prices("O", &rows, from());
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].close, dec!(55.40));
        assert_eq!(prices[1].adj_close, Some(dec!(53.95)));
        assert_eq!(prices[1].volume, Some(3_900_000));
    }

    #[test]
    fn test_daily_csv_to_dividends() {
        let rows: Vec<DailyRow> = parse_csv(DAILY).unwrap();
        let dividends = rows_to_dividends("O", &rows, from());
        assert_eq!(dividends.len(), 1);
        assert_eq!(dividends[0].amount, dec!(0.2565));
    }

    #[test]
    fn test_json_message_is_not_csv() {
        let body = r#"{"Error Message": "Invalid API call."}"#;
        assert!(parse_csv::<DailyRow>(body).is_err());
    }

    #[test]
    fn test_listing_filters() {
        let body = "symbol,name,exchange,assetType,ipoDate,delistingDate,status\n\
SCHD,Schwab US Dividend Equity ETF,NYSE ARCA,ETF,2011-10-20,null,Active\n\
AAPL,Apple Inc,NASDAQ,Stock,1980-12-12,null,Active\n\
ZZZW,Some Warrant,NYSE,Warrant,2020-01-01,null,Active\n";
        let rows: Vec<ListingRow> = parse_csv(body).unwrap();
        let allowed = vec!["NYSE ARCA".to_string(), "NASDAQ".to_string()];
        let found: Vec<_> = rows
            .iter()
            .filter_map(|r| listing_to_discovered(r, &allowed))
            .collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, SecurityKind::Fund);
        assert_eq!(found[1].symbol, "AAPL");
        assert_eq!(found[1].kind, SecurityKind::Equity);
    }

    #[test]
    fn test_overview_profile() {
        let body = r#"{"Symbol":"O","AssetType":"Common Stock","Name":"Realty Income Corporation",
            "Description":"Realty Income is a REIT.","Exchange":"NYSE","Sector":"REAL ESTATE",
            "Industry":"REAL ESTATE INVESTMENT TRUSTS","OfficialSite":"None"}"#;
        let overview: Overview = serde_json::from_str(body).unwrap();
        let profile = overview_to_profile("O", overview);
        assert_eq!(profile.name.as_deref(), Some("Realty Income Corporation"));
        assert_eq!(profile.sector.as_deref(), Some("Real Estate"));
        assert_eq!(profile.kind, Some(SecurityKind::Equity));
        assert_eq!(profile.website, None);

        let empty: Overview = serde_json::from_str("{}").unwrap();
        assert!(overview_to_profile("ZZZ", empty).is_blank());
    }
}
