//! Time-series records and their validity rules.
//!
//! Records arrive from providers in a shared shape but with no guarantees.
//! `normalize_prices` / `normalize_dividends` enforce the persistence
//! invariants and de-duplicate on the natural key before anything is written.

use crate::symbol::normalize_symbol;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily price bar for one symbol. Natural key: (symbol, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub adj_close: Option<Decimal>,
    pub volume: Option<i64>,
    /// Assets under management (funds only).
    pub aum: Option<Decimal>,
    pub implied_volatility: Option<Decimal>,
    pub source: String,
}

impl PricePoint {
    /// Minimal bar with only the required fields set.
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        close: Decimal,
        volume: Option<i64>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            open: None,
            high: None,
            low: None,
            close,
            adj_close: None,
            volume,
            aum: None,
            implied_volatility: None,
            source: source.into(),
        }
    }

    /// close > 0 and a non-negative volume is present.
    pub fn is_valid(&self) -> bool {
        self.close > Decimal::ZERO && self.volume.is_some_and(|v| v >= 0)
    }
}

/// Cash dividend. Natural key: (symbol, ex_date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividendEvent {
    pub symbol: String,
    pub ex_date: NaiveDate,
    pub amount: Decimal,
    pub record_date: Option<NaiveDate>,
    pub pay_date: Option<NaiveDate>,
    pub declaration_date: Option<NaiveDate>,
    pub source: String,
}

impl DividendEvent {
    pub fn new(
        symbol: impl Into<String>,
        ex_date: NaiveDate,
        amount: Decimal,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            ex_date,
            amount,
            record_date: None,
            pay_date: None,
            declaration_date: None,
            source: source.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

/// Drop invalid bars, canonicalize symbols, keep the last bar per date.
///
/// Returns the surviving bars sorted by date plus the number dropped.
pub fn normalize_prices(records: Vec<PricePoint>) -> (Vec<PricePoint>, usize) {
    let total = records.len();
    let mut by_key: BTreeMap<(String, NaiveDate), PricePoint> = BTreeMap::new();

    for mut record in records {
        if !record.is_valid() {
            continue;
        }
        let Some(symbol) = normalize_symbol(&record.symbol) else {
            continue;
        };
        record.symbol = symbol;
        by_key.insert((record.symbol.clone(), record.date), record);
    }

    let kept: Vec<PricePoint> = by_key.into_values().collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Drop non-positive dividends, canonicalize symbols, keep the last event per ex-date.
pub fn normalize_dividends(records: Vec<DividendEvent>) -> (Vec<DividendEvent>, usize) {
    let total = records.len();
    let mut by_key: BTreeMap<(String, NaiveDate), DividendEvent> = BTreeMap::new();

    for mut record in records {
        if !record.is_valid() {
            continue;
        }
        let Some(symbol) = normalize_symbol(&record.symbol) else {
            continue;
        };
        record.symbol = symbol;
        by_key.insert((record.symbol.clone(), record.ex_date), record);
    }

    let kept: Vec<DividendEvent> = by_key.into_values().collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_price_validity() {
        assert!(PricePoint::new("A", day(1), dec!(10.5), Some(100), "t").is_valid());
        assert!(!PricePoint::new("A", day(1), dec!(0), Some(100), "t").is_valid());
        assert!(!PricePoint::new("A", day(1), dec!(-1), Some(100), "t").is_valid());
        assert!(!PricePoint::new("A", day(1), dec!(10), None, "t").is_valid());
        assert!(!PricePoint::new("A", day(1), dec!(10), Some(-5), "t").is_valid());
    }

    #[test]
    fn test_normalize_prices_drops_and_dedupes() {
        let records = vec![
            PricePoint::new("xyz", day(2), dec!(11), Some(10), "t"),
            PricePoint::new("XYZ", day(1), dec!(10), Some(10), "t"),
            PricePoint::new("XYZ", day(2), dec!(12), Some(10), "t"),
            PricePoint::new("XYZ", day(3), dec!(0), Some(10), "t"),
            PricePoint::new("XYZ", day(4), dec!(13), None, "t"),
        ];

        let (kept, dropped) = normalize_prices(records);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 3);
        assert_eq!(kept[0].date, day(1));
        assert_eq!(kept[1].date, day(2));
        // Later duplicate wins.
        assert_eq!(kept[1].close, dec!(12));
        assert!(kept.iter().all(|p| p.symbol == "XYZ"));
    }

    #[test]
    fn test_normalize_dividends() {
        let records = vec![
            DividendEvent::new("o", day(1), dec!(0.2565), "p"),
            DividendEvent::new("O", day(2), dec!(0), "p"),
            DividendEvent::new("O", day(3), dec!(-0.1), "p"),
        ];
        let (kept, dropped) = normalize_dividends(records);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 2);
        assert_eq!(kept[0].symbol, "O");
    }
}
