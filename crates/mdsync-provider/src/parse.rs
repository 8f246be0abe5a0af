//! Field conversions shared by provider payload mappers.

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse `YYYY-MM-DD`, also accepting an ISO timestamp with that prefix.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// UTC trading date from a millisecond epoch timestamp.
pub fn day_from_millis(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// Volumes arrive as floats from some providers (`7.0589e+07`).
pub fn volume_from_f64(raw: f64) -> Option<i64> {
    if raw.is_finite() && raw >= 0.0 {
        Some(raw.round() as i64)
    } else {
        None
    }
}

/// Decimal from a CSV cell. Empty cells and placeholders become `None`.
pub fn decimal_cell(raw: &str) -> Option<Decimal> {
    non_blank(raw).and_then(|s| Decimal::from_str(s).ok())
}

/// Trim and drop placeholder strings such as `"None"` or `"-"`.
pub fn non_blank(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    match trimmed {
        "" | "-" | "None" | "none" | "null" | "N/A" => None,
        s => Some(s),
    }
}

pub fn non_blank_owned(raw: Option<String>) -> Option<String> {
    raw.as_deref().and_then(non_blank).map(str::to_string)
}

/// Canonical venue name for exchange codes and provider-specific labels.
pub fn venue_name(code: &str) -> String {
    match code.trim().to_ascii_uppercase().as_str() {
        "XNYS" | "NYSE" => "NYSE".to_string(),
        "XNAS" | "NASDAQ" | "NMS" | "NGM" | "NCM" => "NASDAQ".to_string(),
        "ARCX" | "NYSE ARCA" | "NYSEARCA" => "NYSE ARCA".to_string(),
        "XASE" | "NYSE MKT" | "NYSE AMERICAN" | "AMEX" => "NYSE AMERICAN".to_string(),
        "BATS" | "CBOE BZX" | "BZX" => "CBOE BZX".to_string(),
        other => other.to_string(),
    }
}

/// Whether `venue` passes the configured allow-list. An empty list allows all.
pub fn venue_allowed(venue: Option<&str>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match venue {
        Some(v) => allowed.iter().any(|a| a.eq_ignore_ascii_case(v)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_day() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_day("2024-03-01"), Some(d));
        assert_eq!(parse_day("2024-03-01T00:00:00.000Z"), Some(d));
        assert_eq!(parse_day("03/01/2024"), None);
        assert_eq!(parse_day(""), None);
    }

    #[test]
    fn test_day_from_millis() {
        // 2024-03-01T21:00:00Z
        assert_eq!(
            day_from_millis(1_709_326_800_000),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }

    #[test]
    fn test_cells() {
        assert_eq!(decimal_cell("12.50"), Some(dec!(12.50)));
        assert_eq!(decimal_cell("None"), None);
        assert_eq!(decimal_cell(""), None);
        assert_eq!(volume_from_f64(7.0589e7), Some(70_589_000));
        assert_eq!(volume_from_f64(-1.0), None);
        assert_eq!(volume_from_f64(f64::NAN), None);
    }

    #[test]
    fn test_venues() {
        assert_eq!(venue_name("XNYS"), "NYSE");
        assert_eq!(venue_name("arcx"), "NYSE ARCA");
        assert_eq!(venue_name("NYSE MKT"), "NYSE AMERICAN");
        assert_eq!(venue_name("OTC"), "OTC");

        let allowed = vec!["NYSE".to_string(), "NASDAQ".to_string()];
        assert!(venue_allowed(Some("nyse"), &allowed));
        assert!(!venue_allowed(Some("OTC"), &allowed));
        assert!(!venue_allowed(None, &allowed));
        assert!(venue_allowed(None, &[]));
    }
}
