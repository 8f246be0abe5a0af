//! Security identity and issuer metadata.

use crate::error::CoreError;
use crate::provider::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalize a raw ticker into the canonical uppercase form.
///
/// Returns `None` for empty input or tickers containing whitespace.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

/// Security kind tracked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityKind {
    #[default]
    Equity,
    Fund,
}

impl SecurityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Fund => "fund",
        }
    }

    /// Map a provider's asset-type code onto a kind.
    ///
    /// Covers Polygon ticker types (`CS`, `ETF`, ...) and Alpha Vantage /
    /// Tiingo asset type labels. Unknown codes return `None`.
    pub fn from_provider_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "CS" | "ADRC" | "PFD" | "STOCK" | "COMMON STOCK" | "EQUITY" => Some(Self::Equity),
            "ETF" | "ETN" | "ETP" | "ETS" | "ETV" | "FUND" | "MUTUAL FUND" | "CEF" => {
                Some(Self::Fund)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SecurityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equity" => Ok(Self::Equity),
            "fund" => Ok(Self::Fund),
            other => Self::from_provider_code(other)
                .ok_or_else(|| CoreError::UnknownSecurityKind(s.to_string())),
        }
    }
}

/// A candidate symbol reported by one provider's listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSymbol {
    pub symbol: String,
    pub venue: Option<String>,
    pub kind: SecurityKind,
    pub provider: ProviderId,
}

/// Issuer profile fields returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerProfile {
    pub symbol: String,
    pub name: Option<String>,
    pub venue: Option<String>,
    pub kind: Option<SecurityKind>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub source: String,
}

impl IssuerProfile {
    /// True when the provider returned nothing beyond the symbol itself.
    pub fn is_blank(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.sector.is_none()
            && self.industry.is_none()
            && self.website.is_none()
    }
}

/// Row in the `symbols` table.
///
/// Created on admission, updated by issuer refreshes, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    pub venue: Option<String>,
    pub kind: SecurityKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    /// Providers that reported this symbol during discovery.
    pub provenance: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last successful issuer-profile refresh.
    pub profile_refreshed_at: Option<DateTime<Utc>>,
}

impl SymbolRecord {
    pub fn new(symbol: impl Into<String>, venue: Option<String>, kind: SecurityKind) -> Self {
        let now = Utc::now();
        Self {
            symbol: symbol.into(),
            venue,
            kind,
            name: None,
            description: None,
            sector: None,
            industry: None,
            website: None,
            provenance: Vec::new(),
            created_at: now,
            updated_at: now,
            profile_refreshed_at: None,
        }
    }

    /// Fold an issuer profile into this record. Fields the profile lacks are kept.
    pub fn apply_profile(&mut self, profile: &IssuerProfile, at: DateTime<Utc>) {
        fn take(dst: &mut Option<String>, src: &Option<String>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }
        take(&mut self.name, &profile.name);
        take(&mut self.venue, &profile.venue);
        take(&mut self.description, &profile.description);
        take(&mut self.sector, &profile.sector);
        take(&mut self.industry, &profile.industry);
        take(&mut self.website, &profile.website);
        if let Some(kind) = profile.kind {
            self.kind = kind;
        }
        self.updated_at = at;
        self.profile_refreshed_at = Some(at);
    }
}
