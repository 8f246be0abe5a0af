//! Symbol admission outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of validating one candidate symbol.
///
/// Persisted exactly once per symbol, either as an admission or an exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub symbol: String,
    pub admitted: bool,
    pub has_recent_price: bool,
    pub has_dividend_history: bool,
    /// Admitted through the portfolio allow-list without evidence checks.
    pub via_portfolio: bool,
    /// Why the symbol was rejected. `None` for admissions.
    pub reason: Option<String>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationOutcome {
    /// Admission backed by evidence.
    pub fn admitted(symbol: impl Into<String>, has_recent_price: bool, has_dividend_history: bool) -> Self {
        Self {
            symbol: symbol.into(),
            admitted: true,
            has_recent_price,
            has_dividend_history,
            via_portfolio: false,
            reason: None,
            validated_at: Utc::now(),
        }
    }

    /// Unconditional admission from the portfolio allow-list.
    pub fn portfolio(symbol: impl Into<String>) -> Self {
        Self {
            via_portfolio: true,
            ..Self::admitted(symbol, false, false)
        }
    }

    /// Rejection citing every failed check.
    pub fn excluded(symbol: impl Into<String>, recency_days: u32, dividend_lookback_days: u32) -> Self {
        Self {
            symbol: symbol.into(),
            admitted: false,
            has_recent_price: false,
            has_dividend_history: false,
            via_portfolio: false,
            reason: Some(format!(
                "no price activity within {recency_days} days; no dividend history within {dividend_lookback_days} days"
            )),
            validated_at: Utc::now(),
        }
    }

    /// Rejection with a custom reason (e.g. symbol failed normalization).
    pub fn rejected(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            admitted: false,
            has_recent_price: false,
            has_dividend_history: false,
            via_portfolio: false,
            reason: Some(reason.into()),
            validated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_reason_cites_both_checks() {
        let outcome = ValidationOutcome::excluded("ZZZ", 7, 365);
        assert!(!outcome.admitted);
        let reason = outcome.reason.unwrap();
        assert!(reason.contains("7 days"));
        assert!(reason.contains("365 days"));
    }

    #[test]
    fn test_portfolio_admission() {
        let outcome = ValidationOutcome::portfolio("VTI");
        assert!(outcome.admitted);
        assert!(outcome.via_portfolio);
        assert!(outcome.reason.is_none());
    }
}
