//! Capability interface shared by all provider implementations.

use crate::alpha_vantage::AlphaVantageClient;
use crate::credential::Credential;
use crate::fetch::{FetchOutcome, FetchWrapper};
use crate::polygon::PolygonClient;
use crate::tiingo::TiingoClient;
use async_trait::async_trait;
use chrono::NaiveDate;
use mdsync_core::{
    DiscoveredSymbol, DividendEvent, IssuerProfile, PricePoint, ProviderBatch, ProviderId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// One external market-data API.
///
/// Every method returns an empty result rather than an error: not-found,
/// auth failures, exhausted retries and unparseable payloads all mean
/// "nothing from this provider". A provider lacking a capability returns
/// empty for it.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Credentials present and not rejected during this run.
    fn is_available(&self) -> bool;

    async fn fetch_prices(&self, symbol: &str, from: NaiveDate) -> Option<ProviderBatch<PricePoint>>;

    async fn fetch_dividends(
        &self,
        symbol: &str,
        from: NaiveDate,
    ) -> Option<ProviderBatch<DividendEvent>>;

    async fn fetch_issuer_info(&self, symbol: &str) -> Option<IssuerProfile>;

    async fn discover_symbols(&self, limit: usize) -> Vec<DiscoveredSymbol>;

    /// Whole-market end-of-day bars for one session.
    async fn fetch_bulk_eod(&self, _date: NaiveDate) -> Option<ProviderBatch<PricePoint>> {
        None
    }
}

/// Connection settings for one provider client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub credential: Option<Credential>,
    /// Venues kept by discovery. Empty keeps every venue.
    pub allowed_venues: Vec<String>,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>, credential: Option<Credential>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            allowed_venues: Vec::new(),
        }
    }

    pub fn with_allowed_venues(mut self, venues: Vec<String>) -> Self {
        self.allowed_venues = venues;
        self
    }

    pub(crate) fn has_usable_credential(&self) -> bool {
        self.credential.as_ref().is_some_and(Credential::is_usable)
    }

    pub(crate) fn api_key(&self) -> String {
        self.credential
            .as_ref()
            .map(|c| c.expose().to_string())
            .unwrap_or_default()
    }
}

/// Build the client implementation for `provider`.
///
/// Returns `None` for identifiers without an implementation.
pub fn build_client(
    provider: ProviderId,
    settings: ClientSettings,
    fetch: FetchWrapper,
) -> Option<Arc<dyn ProviderClient>> {
    let client: Arc<dyn ProviderClient> = match provider {
        ProviderId::TIINGO => Arc::new(TiingoClient::new(settings, fetch)),
        ProviderId::POLYGON => Arc::new(PolygonClient::new(settings, fetch)),
        ProviderId::ALPHA_VANTAGE => Arc::new(AlphaVantageClient::new(settings, fetch)),
        _ => return None,
    };
    Some(client)
}

/// Availability latch shared by the concrete clients.
///
/// Starts from whether usable credentials exist and flips off for the rest
/// of the run on the first rejected request.
#[derive(Debug)]
pub(crate) struct Availability {
    provider: ProviderId,
    enabled: AtomicBool,
}

impl Availability {
    pub(crate) fn new(provider: ProviderId, has_credentials: bool) -> Self {
        Self {
            provider,
            enabled: AtomicBool::new(has_credentials),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Body of a successful fetch; latches the provider off on rejection.
    pub(crate) fn body_of(&self, outcome: FetchOutcome) -> Option<String> {
        match outcome {
            FetchOutcome::Body(body) => Some(body),
            FetchOutcome::Unauthorized => {
                self.disable_unauthorized();
                None
            }
            FetchOutcome::NotFound | FetchOutcome::Exhausted => None,
        }
    }

    pub(crate) fn disable_unauthorized(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            warn!(
                provider = %self.provider,
                "Credentials rejected, provider disabled for the rest of the run"
            );
        }
    }
}
