//! Provider identity and the shape of a provider response.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an external market-data provider.
///
/// Backed by a `&'static str` so it is `Copy` and cheap to put in log fields
/// and metric labels. Configuration strings are mapped onto the known set via
/// `FromStr`; tests may mint ad-hoc identifiers with [`ProviderId::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct ProviderId(&'static str);

impl ProviderId {
    pub const TIINGO: Self = Self("tiingo");
    pub const POLYGON: Self = Self("polygon");
    pub const ALPHA_VANTAGE: Self = Self("alpha_vantage");

    /// Every provider with a client implementation.
    pub const KNOWN: [Self; 3] = [Self::TIINGO, Self::POLYGON, Self::ALPHA_VANTAGE];

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl FromStr for ProviderId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::KNOWN
            .iter()
            .copied()
            .find(|p| p.0 == wanted || (wanted == "alphavantage" && *p == Self::ALPHA_VANTAGE))
            .ok_or_else(|| CoreError::UnknownProvider(s.to_string()))
    }
}

impl TryFrom<String> for ProviderId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// Hand-written equivalent of `#[serde(try_from = "String")]`: the derive would
// infer a `'de: 'static` borrow from the `&'static str` field.
impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0.to_string()
    }
}

/// Kind of data a processor or fetch order deals with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Prices,
    Dividends,
    Issuer,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::Dividends => "dividends",
            Self::Issuer => "issuer",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records returned by one provider for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderBatch<T> {
    pub provider: ProviderId,
    pub records: Vec<T>,
}

impl<T> ProviderBatch<T> {
    pub fn new(provider: ProviderId, records: Vec<T>) -> Self {
        Self { provider, records }
    }

    /// `None` when the provider returned nothing usable.
    pub fn non_empty(provider: ProviderId, records: Vec<T>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self::new(provider, records))
        }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parse() {
        assert_eq!("tiingo".parse::<ProviderId>().unwrap(), ProviderId::TIINGO);
        assert_eq!(
            "Alpha-Vantage".parse::<ProviderId>().unwrap(),
            ProviderId::ALPHA_VANTAGE
        );
        assert_eq!(
            "alphavantage".parse::<ProviderId>().unwrap(),
            ProviderId::ALPHA_VANTAGE
        );
        assert!("yahoo".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_provider_id_serde_roundtrip_through_config_string() {
        let json = serde_json::to_string(&ProviderId::POLYGON).unwrap();
        assert_eq!(json, r#""polygon""#);
        let parsed: ProviderId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ProviderId::POLYGON);
        assert!(serde_json::from_str::<ProviderId>(r#""nope""#).is_err());
    }

    #[test]
    fn test_non_empty_batch() {
        assert!(ProviderBatch::<u32>::non_empty(ProviderId::TIINGO, vec![]).is_none());
        let batch = ProviderBatch::non_empty(ProviderId::TIINGO, vec![1, 2, 3]).unwrap();
        assert_eq!(batch.count(), 3);
    }
}
