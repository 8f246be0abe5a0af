//! Provider access for mdsync.
//!
//! - `RateGovernor` / `GovernorRegistry`: per-provider concurrency and adaptive backoff
//! - `FetchWrapper`: retrying GET with uniform response classification
//! - `ProviderClient`: capability trait with Tiingo, Polygon and Alpha Vantage clients
//! - `HybridFetcher`: priority-ordered fallback across providers

pub mod alpha_vantage;
pub mod client;
pub mod credential;
pub mod error;
pub mod fetch;
pub mod governor;
pub mod hybrid;
pub mod parse;
pub mod polygon;
pub mod tiingo;

pub use alpha_vantage::AlphaVantageClient;
#[cfg(any(test, feature = "mock"))]
pub use client::MockProviderClient;
pub use client::{build_client, ClientSettings, ProviderClient};
pub use credential::Credential;
pub use error::{ProviderError, ProviderResult};
pub use fetch::{FetchOutcome, FetchWrapper, RetryPolicy};
pub use governor::{GovernorConfig, GovernorPermit, GovernorRegistry, RateGovernor};
pub use hybrid::{FetchOrder, HybridFetcher, HybridOutcome};
pub use polygon::PolygonClient;
pub use tiingo::TiingoClient;

/// Default base URL for a known provider.
pub fn default_base_url(provider: mdsync_core::ProviderId) -> Option<&'static str> {
    match provider {
        mdsync_core::ProviderId::TIINGO => Some(tiingo::DEFAULT_BASE_URL),
        mdsync_core::ProviderId::POLYGON => Some(polygon::DEFAULT_BASE_URL),
        mdsync_core::ProviderId::ALPHA_VANTAGE => Some(alpha_vantage::DEFAULT_BASE_URL),
        _ => None,
    }
}
