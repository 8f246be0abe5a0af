//! Whole-run tests: commands driven through `Application` against an
//! in-memory store, on-disk checkpoints and mocked providers.

use chrono::{Duration, NaiveDate, Utc};
use mdsync_cli::cli::{BatchEodArgs, CheckpointAction, DiscoverArgs, UpdateArgs};
use mdsync_cli::{AppConfig, AppError, Application, Command};
use mdsync_core::{
    DiscoveredSymbol, PricePoint, ProviderBatch, ProviderId, SecurityKind, SymbolRecord,
};
use mdsync_persistence::{
    CheckpointKind, CheckpointStore, MarketStore, MemoryStore, PersistenceError, RunLock,
};
use mdsync_provider::{FetchOrder, GovernorRegistry, HybridFetcher, MockProviderClient};
use rust_decimal_macros::dec;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;
use uuid::Uuid;

fn config_in(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.checkpoints.dir = dir.join("checkpoints");
    config.checkpoints.chunk_size = 2;
    config.run.lock_dir = dir.join("locks");
    config.telemetry.report_path = Some(dir.join("report.json"));
    config
}

fn polygon_only() -> FetchOrder {
    FetchOrder {
        prices: vec![ProviderId::POLYGON],
        dividends: vec![ProviderId::POLYGON],
        issuer: vec![ProviderId::POLYGON],
        discovery: vec![ProviderId::POLYGON],
        bulk_eod: vec![ProviderId::POLYGON],
    }
}

/// Five daily bars ending yesterday.
fn recent_bars(symbol: &str, provider: ProviderId) -> Vec<PricePoint> {
    let today = Utc::now().date_naive();
    (1..=5)
        .map(|d| {
            PricePoint::new(
                symbol,
                today - Duration::days(d),
                dec!(10.5),
                Some(100),
                provider.as_str(),
            )
        })
        .collect()
}

fn tiingo_batch(symbol: &str) -> ProviderBatch<PricePoint> {
    ProviderBatch::new(ProviderId::TIINGO, recent_bars(symbol, ProviderId::TIINGO))
}

fn client(id: ProviderId) -> MockProviderClient {
    let mut client = MockProviderClient::new();
    client.expect_id().return_const(id);
    client.expect_is_available().return_const(true);
    client
}

fn store_tracking(symbols: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for symbol in symbols {
        store
            .upsert_symbol(&SymbolRecord::new(*symbol, None, SecurityKind::Equity))
            .unwrap();
    }
    store
}

fn application(
    config: AppConfig,
    client: MockProviderClient,
    order: FetchOrder,
    store: Arc<MemoryStore>,
) -> Application {
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    let fetcher = Arc::new(HybridFetcher::new(vec![Arc::new(client)], order));
    Application::from_parts(
        config,
        Arc::new(GovernorRegistry::new()),
        fetcher,
        store,
        Some(checkpoints),
    )
}

fn prices_only() -> Command {
    Command::Update(UpdateArgs {
        prices_only: true,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_update_checkpoints_every_chunk() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    let store = store_tracking(&["AAA", "BBB", "CCC"]);

    let mut tiingo = client(ProviderId::TIINGO);
    tiingo
        .expect_fetch_prices()
        .times(3)
        .returning(|symbol, _| Some(tiingo_batch(symbol)));
    let app = application(config, tiingo, FetchOrder::default(), store.clone());

    let report = app.run(&prices_only()).await.unwrap();
    assert_eq!(report.totals.succeeded, 3);
    assert!(!report.has_failures());
    assert_eq!(store.price_count(), 15);
    assert!(dir.path().join("report.json").exists());
    // The lock is released with the run.
    assert!(!dir.path().join("locks/update.lock").exists());

    // Two chunk checkpoints plus the completion marker.
    let history = checkpoints.history(CheckpointKind::Prices).unwrap();
    assert_eq!(history.len(), 3);
    assert!(!history[0].is_complete());
    let latest = history.last().unwrap();
    assert!(latest.is_complete());
    assert_eq!(latest.run_id, app.run_id());
    assert_eq!(latest.processed.len(), 3);
}

#[tokio::test]
async fn test_interrupted_run_resumes_where_it_stopped() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    assert_ok!(checkpoints.save(
        CheckpointKind::Prices,
        Uuid::new_v4(),
        vec!["AAA".to_string()],
        json!({ "complete": false }),
    ));
    let store = store_tracking(&["AAA", "BBB", "CCC"]);

    let mut tiingo = client(ProviderId::TIINGO);
    tiingo
        .expect_fetch_prices()
        .withf(|symbol, _| !symbol.eq_ignore_ascii_case("AAA"))
        .times(2)
        .returning(|symbol, _| Some(tiingo_batch(symbol)));
    let app = application(config, tiingo, FetchOrder::default(), store.clone());

    let report = app.run(&prices_only()).await.unwrap();
    assert_eq!(report.totals.succeeded, 2);
    let resumed = report
        .savings
        .iter()
        .find(|s| s.category == "prices_resumed")
        .unwrap();
    assert_eq!(resumed.items, 1);

    let latest = checkpoints.load_latest(CheckpointKind::Prices).unwrap().unwrap();
    assert!(latest.is_complete());
    assert!(latest.processed.contains("AAA"));
    assert_eq!(latest.processed.len(), 3);
}

#[tokio::test]
async fn test_symbol_without_data_sets_failure_status() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    let store = store_tracking(&["AAA", "ZZZ"]);

    let mut tiingo = client(ProviderId::TIINGO);
    tiingo.expect_fetch_prices().returning(|symbol, _| {
        (symbol == "AAA").then(|| tiingo_batch(symbol))
    });
    let app = application(config, tiingo, FetchOrder::default(), store.clone());

    let report = app.run(&prices_only()).await.unwrap();
    assert!(report.has_failures());
    assert_eq!(report.totals.failed, 1);
    assert_eq!(store.exclusion_count(), 1);
    assert!(report.errors[0].starts_with("ZZZ"));

    // Failed symbols never enter a checkpoint.
    let latest = checkpoints.load_latest(CheckpointKind::Prices).unwrap().unwrap();
    assert!(!latest.processed.contains("ZZZ"));
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let _held = RunLock::acquire(
        &config.run.lock_dir,
        "update",
        "someone-else",
        std::time::Duration::from_secs(3600),
    )
    .unwrap();

    let app = application(
        config,
        client(ProviderId::TIINGO),
        FetchOrder::default(),
        store_tracking(&["AAA"]),
    );
    let err = app.run(&prices_only()).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Persistence(PersistenceError::RunInProgress { .. })
    ));
}

#[tokio::test]
async fn test_dry_run_writes_no_checkpoints_or_locks() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let store = Arc::new(MemoryStore::new());

    let mut tiingo = client(ProviderId::TIINGO);
    tiingo
        .expect_fetch_prices()
        .times(1)
        .returning(|symbol, _| Some(tiingo_batch(symbol)));
    let fetcher = Arc::new(HybridFetcher::new(vec![Arc::new(tiingo)], FetchOrder::default()));
    let app = Application::from_parts(
        config,
        Arc::new(GovernorRegistry::new()),
        fetcher,
        store.clone(),
        None,
    );

    let command = Command::Update(UpdateArgs {
        prices_only: true,
        symbols: vec!["aaa".into()],
        ..Default::default()
    });
    let report = app.run(&command).await.unwrap();
    assert_eq!(report.totals.succeeded, 1);
    assert_eq!(store.prices_for("AAA").unwrap().len(), 5);
    assert!(!dir.path().join("locks").exists());
    assert!(!dir.path().join("checkpoints").exists());
}

#[tokio::test]
async fn test_discover_and_validate() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    let store = Arc::new(MemoryStore::new());

    let mut polygon = client(ProviderId::POLYGON);
    polygon.expect_discover_symbols().times(1).returning(|_| {
        ["NEW", "OLD", "OTC1"]
            .iter()
            .zip([Some("NYSE"), Some("NASDAQ"), Some("OTC")])
            .map(|(symbol, venue)| DiscoveredSymbol {
                symbol: symbol.to_string(),
                venue: venue.map(str::to_string),
                kind: SecurityKind::Equity,
                provider: ProviderId::POLYGON,
            })
            .collect()
    });
    polygon.expect_fetch_prices().returning(|symbol, _| {
        (symbol == "NEW").then(|| {
            ProviderBatch::new(ProviderId::POLYGON, recent_bars(symbol, ProviderId::POLYGON))
        })
    });
    polygon.expect_fetch_dividends().returning(|_, _| None);
    let app = application(config, polygon, polygon_only(), store.clone());

    let command = Command::Discover(DiscoverArgs {
        limit: Some(10),
        validate: true,
        fresh: false,
    });
    let report = app.run(&command).await.unwrap();
    assert!(!report.has_failures());

    assert_eq!(store.tracked_symbols().unwrap(), vec!["NEW".to_string()]);
    assert!(store.excluded_symbols().unwrap().contains("OLD"));
    assert_eq!(store.validated_symbols().unwrap().len(), 2);

    let discovered = checkpoints.load_latest(CheckpointKind::Discovery).unwrap().unwrap();
    assert_eq!(discovered.processed.len(), 2);
    let validated = checkpoints.load_latest(CheckpointKind::Validation).unwrap().unwrap();
    assert!(validated.is_complete());
    assert_eq!(validated.processed.len(), 2);
}

#[tokio::test]
async fn test_batch_eod_records_savings_and_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    let store = store_tracking(&["O", "SCHD", "VTI"]);
    let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

    let mut polygon = client(ProviderId::POLYGON);
    polygon.expect_fetch_bulk_eod().times(1).returning(|date| {
        let bars = ["O", "SCHD", "VTI", "AAPL"]
            .iter()
            .map(|s| PricePoint::new(*s, date, dec!(50), Some(1_000), "polygon"))
            .collect();
        Some(ProviderBatch::new(ProviderId::POLYGON, bars))
    });
    let app = application(config, polygon, polygon_only(), store.clone());

    let command = Command::BatchEod(BatchEodArgs { date: Some(date) });
    let report = app.run(&command).await.unwrap();
    assert_eq!(report.totals.records_persisted, 3);
    assert_eq!(store.price_count(), 3);
    let saving = report.savings.iter().find(|s| s.category == "bulk_eod").unwrap();
    assert_eq!(saving.api_calls_saved, 2);

    let latest = checkpoints.load_latest(CheckpointKind::BulkEod).unwrap().unwrap();
    assert!(latest.is_complete());
    assert_eq!(latest.metadata["date"], json!("2024-03-15"));
}

#[tokio::test]
async fn test_prune_command() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let checkpoints = CheckpointStore::new(config.checkpoints.dir.clone()).unwrap();
    for i in 0..5 {
        assert_ok!(checkpoints.save(
            CheckpointKind::Issuer,
            Uuid::new_v4(),
            vec![format!("S{i}")],
            json!({ "complete": true }),
        ));
    }
    let app = application(
        config,
        client(ProviderId::TIINGO),
        FetchOrder::default(),
        Arc::new(MemoryStore::new()),
    );

    let command = Command::Checkpoints {
        action: CheckpointAction::Prune {
            kind: CheckpointKind::Issuer,
            keep: 2,
        },
    };
    assert_ok!(app.run(&command).await);
    let history = checkpoints.history(CheckpointKind::Issuer).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].processed.contains("S4"));
}
