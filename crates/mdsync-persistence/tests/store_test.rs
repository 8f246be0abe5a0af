//! File-backed store and writer integration tests.

use chrono::{NaiveDate, Utc};
use mdsync_core::{
    DividendEvent, IssuerProfile, PricePoint, SecurityKind, SymbolRecord, ValidationOutcome,
};
use mdsync_persistence::{
    BatchWriter, BatchWriterConfig, DividendSink, ExclusionSource, MarketStore, PriceSink,
    SqliteStore,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

#[test]
fn test_upsert_same_key_twice_keeps_latest_values() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("market.db"), 2).unwrap();

    store
        .upsert_prices(&[PricePoint::new("XYZ", day(4), dec!(10.00), Some(100), "tiingo")])
        .unwrap();
    store
        .upsert_prices(&[PricePoint::new("XYZ", day(4), dec!(10.25), Some(150), "polygon")])
        .unwrap();

    let rows = store.prices_for("XYZ").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].close, dec!(10.25));
    assert_eq!(rows[0].volume, Some(150));
    assert_eq!(rows[0].source, "polygon");
}

#[test]
fn test_reopen_keeps_data_and_latest_dates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("market.db");
    {
        let store = SqliteStore::open(&path, 1).unwrap();
        store
            .upsert_dividends(&[
                DividendEvent::new("O", day(1), dec!(0.2565), "polygon"),
                DividendEvent::new("O", day(29), dec!(0.2565), "polygon"),
            ])
            .unwrap();
    }

    let store = SqliteStore::open(&path, 1).unwrap();
    let latest = store
        .latest_dividend_dates(&["O".to_string(), "MAIN".to_string()])
        .unwrap();
    assert_eq!(latest.get("O"), Some(&day(29)));
    assert!(!latest.contains_key("MAIN"));
}

#[test]
fn test_tracked_symbols_exclude_exclusions() {
    let store = SqliteStore::in_memory().unwrap();
    for symbol in ["AAA", "BBB", "CCC"] {
        let outcome = ValidationOutcome::admitted(symbol, true, false);
        store
            .record_validation(&outcome, &SymbolRecord::new(symbol, None, SecurityKind::Equity))
            .unwrap();
    }
    store
        .record_exclusion("BBB", "no data from any provider", ExclusionSource::Ingestion)
        .unwrap();

    assert_eq!(
        store.tracked_symbols().unwrap(),
        vec!["AAA".to_string(), "CCC".to_string()]
    );
    assert!(store.excluded_symbols().unwrap().contains("BBB"));
    // Ingestion exclusions do not count as validation outcomes.
    assert_eq!(store.validated_symbols().unwrap().len(), 3);
}

#[test]
fn test_admission_keeps_stored_issuer_profile() {
    let store = SqliteStore::in_memory().unwrap();
    let profile = IssuerProfile {
        symbol: "O".into(),
        name: Some("Realty Income Corp".into()),
        sector: Some("Real Estate".into()),
        source: "polygon".into(),
        ..Default::default()
    };
    store.apply_profile(&profile, Utc::now()).unwrap();

    let recorded = store
        .record_validation(
            &ValidationOutcome::admitted("O", true, true),
            &SymbolRecord::new("O", Some("NYSE".into()), SecurityKind::Equity),
        )
        .unwrap();
    assert!(recorded);

    let rows = store.symbols(&["O".to_string()]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name.as_deref(), Some("Realty Income Corp"));
    assert_eq!(rows[0].sector.as_deref(), Some("Real Estate"));
    assert!(rows[0].profile_refreshed_at.is_some());
    assert!(store.validated_symbols().unwrap().contains("O"));
}

#[test]
fn test_admission_and_exclusion_are_mutually_exclusive() {
    let store = SqliteStore::in_memory().unwrap();
    store
        .record_exclusion("SCHD", "no data from any provider", ExclusionSource::Ingestion)
        .unwrap();
    let recorded = store
        .record_validation(
            &ValidationOutcome::admitted("SCHD", true, true),
            &SymbolRecord::new("SCHD", None, SecurityKind::Fund),
        )
        .unwrap();
    assert!(!recorded);
    assert!(store.symbols(&["SCHD".to_string()]).unwrap().is_empty());
    assert!(!store.validated_symbols().unwrap().contains("SCHD"));

    let record = SymbolRecord::new("MAIN", None, SecurityKind::Equity);
    assert!(store
        .record_validation(&ValidationOutcome::admitted("MAIN", true, false), &record)
        .unwrap());
    assert!(!store
        .record_validation(&ValidationOutcome::excluded("MAIN", 7, 365), &record)
        .unwrap());
    assert!(store.exclusion_reason("MAIN").unwrap().is_none());
    assert_eq!(store.tracked_symbols().unwrap(), vec!["MAIN".to_string()]);
}

#[test]
fn test_latest_dates_span_many_chunks() {
    let store = SqliteStore::in_memory().unwrap();
    let symbols: Vec<String> = (0..1200).map(|i| format!("S{i:04}")).collect();
    let prices: Vec<PricePoint> = symbols
        .iter()
        .map(|s| PricePoint::new(s.as_str(), day(8), dec!(1), Some(1), "t"))
        .collect();
    store.upsert_prices(&prices).unwrap();

    let latest = store.latest_price_dates(&symbols).unwrap();
    assert_eq!(latest.len(), 1200);
}

#[tokio::test]
async fn test_writers_persist_into_sqlite() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn MarketStore> =
        Arc::new(SqliteStore::open(&dir.path().join("market.db"), 2).unwrap());
    let config = BatchWriterConfig {
        batch_size: 4,
        flush_interval: None,
        queue_capacity: 8,
    };
    let prices: BatchWriter<PricePoint> =
        BatchWriter::spawn(Arc::new(PriceSink::new(store.clone())), config.clone());
    let dividends: BatchWriter<DividendEvent> =
        BatchWriter::spawn(Arc::new(DividendSink::new(store.clone())), config);

    for d in 1..=10 {
        assert_ok!(
            prices
                .enqueue(PricePoint::new("XYZ", day(d), dec!(20), Some(d as i64), "tiingo"))
                .await
        );
    }
    assert_ok!(
        dividends
            .enqueue(DividendEvent::new("XYZ", day(3), dec!(0.15), "polygon"))
            .await
    );

    let price_report = prices.stop().await.unwrap();
    let dividend_report = dividends.stop().await.unwrap();

    assert_eq!(price_report.records_flushed, 10);
    assert_eq!(price_report.flushes, 3);
    assert_eq!(dividend_report.records_flushed, 1);
    assert_eq!(store.prices_for("XYZ").unwrap().len(), 10);
    assert_eq!(store.dividends_for("XYZ").unwrap().len(), 1);
}
