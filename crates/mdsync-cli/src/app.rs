//! Run orchestration.
//!
//! Wires providers, the store and checkpoints together and drives one mode:
//! - `discover`: candidate listing, optionally followed by validation
//! - `update`: incremental price / dividend / issuer refresh in checkpointed chunks
//! - `batch-eod`: one grouped end-of-day load
//! - `checkpoints prune`: checkpoint retention

use crate::cli::{
    checkpoint_kind, BatchEodArgs, CheckpointAction, Command, DiscoverArgs, UpdateArgs,
};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use mdsync_core::{normalize_symbol, DataKind, ProcessingStats, SkipReason, MAX_ERROR_SAMPLES};
use mdsync_persistence::{
    BatchWriterConfig, Checkpoint, CheckpointKind, CheckpointStore, MarketStore, MemoryStore,
    RunLock, SqliteStore,
};
use mdsync_pipeline::planner::last_completed_session;
use mdsync_pipeline::{
    pool_size, BatchOptions, BulkEodLoader, DiscoveredCandidate, DividendProcessor,
    IncrementalPlanner, IssuerProcessor, PriceProcessor, SymbolDiscovery, SymbolProcessor,
    SymbolValidator,
};
use mdsync_provider::{
    build_client, default_base_url, ClientSettings, Credential, FetchWrapper, GovernorRegistry,
    HybridFetcher,
};
use mdsync_telemetry::{Metrics, RunMonitor, RunReport};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Skips that avoided a provider call, reported as savings.
const SAVING_SKIPS: [SkipReason; 3] = [
    SkipReason::Excluded,
    SkipReason::UpToDate,
    SkipReason::FreshProfile,
];

pub struct Application {
    config: AppConfig,
    run_id: Uuid,
    registry: Arc<GovernorRegistry>,
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    /// `None` in dry-run mode.
    checkpoints: Option<CheckpointStore>,
    cancel: CancellationToken,
}

impl Application {
    /// Build providers and open the store. Dry-run keeps everything in memory.
    pub fn new(config: AppConfig, dry_run: bool) -> AppResult<Self> {
        let (registry, fetcher) = build_providers(&config)?;
        let (store, checkpoints): (Arc<dyn MarketStore>, Option<CheckpointStore>) = if dry_run {
            info!("Dry run: in-memory store, no checkpoints or locks");
            (Arc::new(MemoryStore::new()), None)
        } else {
            info!(path = %config.store.path.display(), "Opening store");
            (
                Arc::new(SqliteStore::open(&config.store.path, config.store.pool_size)?),
                Some(CheckpointStore::new(&config.checkpoints.dir)?),
            )
        };
        Ok(Self::from_parts(config, registry, fetcher, store, checkpoints))
    }

    /// Assemble from prebuilt components.
    pub fn from_parts(
        config: AppConfig,
        registry: Arc<GovernorRegistry>,
        fetcher: Arc<HybridFetcher>,
        store: Arc<dyn MarketStore>,
        checkpoints: Option<CheckpointStore>,
    ) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4(),
            registry,
            fetcher,
            store,
            checkpoints,
            cancel: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Token tripped on Ctrl-C; exposed so callers can stop a run themselves.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one command and return its report.
    ///
    /// Symbol failures are reported, not returned; an `Err` means the run
    /// itself could not proceed.
    pub async fn run(&self, command: &Command) -> AppResult<RunReport> {
        let _lock = match &self.checkpoints {
            Some(_) => Some(RunLock::acquire(
                &self.config.run.lock_dir,
                command.lock_name(),
                &self.run_id.to_string(),
                self.config.run.stale_after(),
            )?),
            None => None,
        };

        let monitor = RunMonitor::new(
            self.run_id.to_string(),
            command.name(),
            self.config.run.seconds_per_call,
        );
        info!(run_id = %self.run_id, mode = command.name(), "Run started");

        let watcher = self.watch_ctrl_c();
        let result = match command {
            Command::Discover(args) => self.discover(args, &monitor).await,
            Command::Update(args) => self.update(args, &monitor).await,
            Command::BatchEod(args) => self.batch_eod(args, &monitor).await,
            Command::Checkpoints {
                action: CheckpointAction::Prune { kind, keep },
            } => self.prune(*kind, *keep, &monitor),
        };
        watcher.abort();
        result?;
        if self.cancel.is_cancelled() {
            warn!(run_id = %self.run_id, "Run interrupted; rerun the same command to resume");
        }

        if !matches!(command, Command::Checkpoints { .. }) && self.config.checkpoints.keep > 0 {
            for kind in command.checkpoint_kinds() {
                if let Some(store) = &self.checkpoints {
                    store.prune(kind, self.config.checkpoints.keep)?;
                }
            }
        }

        for snapshot in self.registry.snapshots() {
            monitor.record_provider(snapshot);
        }
        let report = monitor.report();
        report.log_summary();
        self.write_outputs(&report)?;
        Ok(report)
    }

    fn watch_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight symbols");
                cancel.cancel();
            }
        })
    }

    fn write_outputs(&self, report: &RunReport) -> AppResult<()> {
        if let Some(path) = &self.config.telemetry.metrics_path {
            Metrics::write_to(path)?;
            debug!(path = %path.display(), "Wrote metrics");
        }
        if let Some(path) = &self.config.telemetry.report_path {
            report.write_json(path)?;
            info!(path = %path.display(), "Wrote run report");
        }
        Ok(())
    }

    // --- discover ---

    async fn discover(&self, args: &DiscoverArgs, monitor: &RunMonitor) -> AppResult<()> {
        let limit = args.limit.unwrap_or(self.config.discovery.limit);
        let timer = monitor.start_phase("discovery");
        let discovery = SymbolDiscovery::new(
            self.fetcher.clone(),
            self.store.clone(),
            self.config.discovery.allowed_venues.clone(),
        );
        let found = discovery.discover(limit, args.fresh).await?;
        monitor.finish_phase(timer, None);

        // Each skipped candidate would have cost at least one validation call.
        let known = found.already_validated as u64;
        monitor.record_savings("already_validated", known, known);

        self.save_checkpoint(
            CheckpointKind::Discovery,
            found.candidates.iter().map(|c| c.symbol.clone()),
            json!({
                "complete": true,
                "listed": found.listed,
                "duplicates": found.duplicates,
                "candidates": found.candidates.len(),
                "providers": found.providers,
            }),
        )?;

        if !args.validate {
            info!(
                candidates = found.candidates.len(),
                "Discovery only; pass --validate to admit candidates"
            );
            return Ok(());
        }
        self.validate(&found.candidates, monitor).await
    }

    /// Persisted outcomes keep validated symbols out of the next discovery,
    /// so validation checkpoints record progress without being resumed.
    async fn validate(
        &self,
        candidates: &[DiscoveredCandidate],
        monitor: &RunMonitor,
    ) -> AppResult<()> {
        let validator = SymbolValidator::new(
            self.fetcher.clone(),
            self.store.clone(),
            self.config.validation.to_validation_config(),
        );
        let concurrency = pool_size(&self.fetcher, &self.registry, DataKind::Prices);
        let timer = monitor.start_phase("validation");

        let mut processed: Vec<String> = Vec::new();
        let (mut admitted, mut excluded, mut unchanged, mut failed) = (0u64, 0u64, 0u64, 0u64);
        let mut errors = Vec::new();

        for chunk in candidates.chunks(self.config.checkpoints.chunk_size) {
            if self.cancel.is_cancelled() {
                break;
            }
            let report = validator.validate_all(chunk, concurrency, &self.cancel).await?;
            admitted += report.admitted;
            excluded += report.excluded;
            unchanged += report.unchanged;
            failed += report.failed;
            processed.extend(report.processed);
            for err in report.errors {
                if errors.len() < MAX_ERROR_SAMPLES {
                    errors.push(err);
                }
            }
            self.save_checkpoint(
                CheckpointKind::Validation,
                processed.iter().cloned(),
                json!({
                    "complete": false,
                    "total": candidates.len(),
                    "admitted": admitted,
                    "excluded": excluded,
                }),
            )?;
        }

        let complete = !self.cancel.is_cancelled();
        self.save_checkpoint(
            CheckpointKind::Validation,
            processed.iter().cloned(),
            json!({
                "complete": complete,
                "total": candidates.len(),
                "admitted": admitted,
                "excluded": excluded,
            }),
        )?;
        monitor.finish_phase(timer, None);
        monitor.record_failures(failed, &errors);
        info!(
            admitted,
            excluded,
            unchanged,
            failed,
            remaining = candidates.len() - processed.len(),
            "Validation phase finished"
        );
        Ok(())
    }

    // --- update ---

    async fn update(&self, args: &UpdateArgs, monitor: &RunMonitor) -> AppResult<()> {
        let symbols = if args.symbols.is_empty() {
            self.tracked_symbols().await?
        } else {
            select_symbols(&args.symbols)
        };
        if symbols.is_empty() {
            warn!("No symbols to update");
            return Ok(());
        }
        info!(symbols = symbols.len(), kinds = ?args.kinds(), "Update starting");

        let writer_config: BatchWriterConfig = (&self.config.batch_writer).into();
        let planner = IncrementalPlanner::new(self.config.ingestion.default_lookback_days);

        for kind in args.kinds() {
            if self.cancel.is_cancelled() {
                break;
            }
            let options = BatchOptions {
                force_full_refresh: args.full_refresh,
                from_date: args.from_date,
                concurrency: pool_size(&self.fetcher, &self.registry, kind),
                skip_current: self.config.ingestion.skip_current,
            };
            let resume = args.resumable();

            match kind {
                DataKind::Prices => {
                    let processor = PriceProcessor::new(
                        self.fetcher.clone(),
                        self.store.clone(),
                        planner,
                        writer_config.clone(),
                    );
                    let result = self
                        .run_processor(&processor, &symbols, &options, resume, monitor)
                        .await;
                    let flush = processor.shutdown().await;
                    result?;
                    flush?;
                }
                DataKind::Dividends => {
                    let processor = DividendProcessor::new(
                        self.fetcher.clone(),
                        self.store.clone(),
                        planner,
                        writer_config.clone(),
                    );
                    let result = self
                        .run_processor(&processor, &symbols, &options, resume, monitor)
                        .await;
                    let flush = processor.shutdown().await;
                    result?;
                    flush?;
                }
                DataKind::Issuer => {
                    let processor = IssuerProcessor::new(
                        self.fetcher.clone(),
                        self.store.clone(),
                        self.config.ingestion.issuer_refresh_days,
                    );
                    self.run_processor(&processor, &symbols, &options, resume, monitor)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Process `symbols` in checkpointed chunks.
    ///
    /// With `resume`, symbols recorded by an unfinished earlier run are left
    /// out and that run's processed set is carried forward.
    async fn run_processor<P: SymbolProcessor>(
        &self,
        processor: &P,
        symbols: &[String],
        options: &BatchOptions,
        resume: bool,
        monitor: &RunMonitor,
    ) -> AppResult<()> {
        let kind = processor.kind();
        let checkpoint = checkpoint_kind(kind);
        let timer = monitor.start_phase(kind.as_str());

        let mut done: Vec<String> = Vec::new();
        let mut pending = symbols.to_vec();
        if resume {
            if let Some(previous) = self.resumable(checkpoint)? {
                pending = self.remaining_of(checkpoint, symbols)?;
                let skipped = (symbols.len() - pending.len()) as u64;
                info!(
                    kind = %kind,
                    previous_run = %previous.run_id,
                    skipped,
                    remaining = pending.len(),
                    "Resuming from checkpoint"
                );
                monitor.record_savings(&format!("{kind}_resumed"), skipped, skipped);
                done = previous.processed.into_iter().collect();
            }
        }

        let mut stats = ProcessingStats::new(kind);
        let mut skipped: BTreeMap<&'static str, u64> = BTreeMap::new();
        for chunk in pending.chunks(self.config.checkpoints.chunk_size) {
            if self.cancel.is_cancelled() {
                break;
            }
            let report = processor.process_batch(chunk, options, &self.cancel).await?;
            stats.merge(&report.stats);
            for (reason, count) in report.skipped {
                *skipped.entry(reason).or_default() += count;
            }
            done.extend(report.completed);
            self.save_checkpoint(
                checkpoint,
                done.iter().cloned(),
                json!({
                    "complete": false,
                    "total": symbols.len(),
                    "succeeded": stats.succeeded,
                    "failed": stats.failed,
                }),
            )?;
        }

        if !self.cancel.is_cancelled() {
            self.save_checkpoint(
                checkpoint,
                done.iter().cloned(),
                json!({
                    "complete": true,
                    "total": symbols.len(),
                    "succeeded": stats.succeeded,
                    "failed": stats.failed,
                }),
            )?;
        }

        for reason in SAVING_SKIPS {
            let count = skipped.get(reason.as_str()).copied().unwrap_or(0);
            monitor.record_savings(&format!("{kind}_{reason}"), count, count);
        }
        stats.finish();
        monitor.finish_phase(timer, Some(stats));
        Ok(())
    }

    // --- batch-eod ---

    async fn batch_eod(&self, args: &BatchEodArgs, monitor: &RunMonitor) -> AppResult<()> {
        let date = args
            .date
            .unwrap_or_else(|| last_completed_session(Utc::now().date_naive()));
        let timer = monitor.start_phase("bulk_eod");
        let loader = BulkEodLoader::new(
            self.fetcher.clone(),
            self.store.clone(),
            (&self.config.batch_writer).into(),
        );
        let report = loader.load(date).await?;

        // One bar per symbol per session, so failed records are failed symbols.
        let mut stats = ProcessingStats::new(DataKind::Prices);
        stats.attempted = report.matched as u64;
        stats.failed = report.failed;
        stats.succeeded = stats.attempted.saturating_sub(report.failed);
        stats.records_persisted = report.persisted;
        stats.records_dropped = report.dropped as u64;
        for err in &report.errors {
            stats.push_error(err.clone());
        }
        stats.finish();
        monitor.finish_phase(timer, Some(stats));
        monitor.record_savings("bulk_eod", report.matched as u64, report.calls_saved());

        self.save_checkpoint(
            CheckpointKind::BulkEod,
            std::iter::empty(),
            json!({
                "complete": report.provider.is_some() && report.failed == 0,
                "date": date,
                "provider": report.provider,
                "matched": report.matched,
                "persisted": report.persisted,
                "tracked": report.tracked,
            }),
        )?;
        Ok(())
    }

    // --- checkpoints ---

    fn prune(&self, kind: CheckpointKind, keep: usize, monitor: &RunMonitor) -> AppResult<()> {
        let Some(store) = &self.checkpoints else {
            info!(kind = %kind, "Dry run: nothing to prune");
            return Ok(());
        };
        let timer = monitor.start_phase("checkpoint_prune");
        let removed = store.prune(kind, keep)?;
        monitor.finish_phase(timer, None);
        info!(kind = %kind, removed, keep, "Checkpoint prune finished");
        Ok(())
    }

    fn save_checkpoint(
        &self,
        kind: CheckpointKind,
        processed: impl IntoIterator<Item = String>,
        metadata: serde_json::Value,
    ) -> AppResult<()> {
        if let Some(store) = &self.checkpoints {
            store.save(kind, self.run_id, processed, metadata)?;
        }
        Ok(())
    }

    fn resumable(&self, kind: CheckpointKind) -> AppResult<Option<Checkpoint>> {
        match &self.checkpoints {
            Some(store) => Ok(store.resumable(kind)?),
            None => Ok(None),
        }
    }

    fn remaining_of(&self, kind: CheckpointKind, symbols: &[String]) -> AppResult<Vec<String>> {
        match &self.checkpoints {
            Some(store) => Ok(store.remaining_of(kind, symbols)?),
            None => Ok(symbols.to_vec()),
        }
    }

    async fn tracked_symbols(&self) -> AppResult<Vec<String>> {
        let store = self.store.clone();
        let symbols = tokio::task::spawn_blocking(move || store.tracked_symbols())
            .await
            .map_err(|e| AppError::Join(e.to_string()))??;
        Ok(symbols)
    }
}

/// Build one governed client per enabled provider.
pub fn build_providers(
    config: &AppConfig,
) -> AppResult<(Arc<GovernorRegistry>, Arc<HybridFetcher>)> {
    let registry = Arc::new(GovernorRegistry::new());
    let mut clients = Vec::new();

    for (id, cfg) in config.enabled_providers()? {
        let base_url = cfg
            .base_url
            .clone()
            .or_else(|| default_base_url(id).map(str::to_string))
            .ok_or_else(|| AppError::Config(format!("no base_url for provider {id}")))?;
        let credential = Credential::from_env(&cfg.api_key_env);
        if credential.is_none() {
            warn!(provider = %id, env = %cfg.api_key_env, "API key not set, provider unavailable");
        }

        let governor = registry.register(id, cfg.governor_config());
        let fetch = FetchWrapper::new(governor, cfg.retry_policy())?;
        let settings = ClientSettings::new(base_url, credential)
            .with_allowed_venues(config.discovery.allowed_venues.clone());
        match build_client(id, settings, fetch) {
            Some(client) => clients.push(client),
            None => warn!(provider = %id, "No client implementation"),
        }
    }

    if clients.iter().all(|c| !c.is_available()) {
        warn!("No provider is available; every fetch will come back empty");
    }
    Ok((registry, Arc::new(HybridFetcher::new(clients, config.fetch_order.clone()))))
}

/// Normalize and de-duplicate `--symbols`, keeping the given order.
pub fn select_symbols(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for item in raw {
        match normalize_symbol(item) {
            Some(symbol) if seen.insert(symbol.clone()) => selected.push(symbol),
            Some(_) => {}
            None => warn!(symbol = %item, "Ignoring invalid symbol"),
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_symbols() {
        let raw = vec![
            "o".to_string(),
            "SCHD".to_string(),
            " o ".to_string(),
            "BAD TICKER".to_string(),
            "".to_string(),
        ];
        assert_eq!(select_symbols(&raw), vec!["O", "SCHD"]);
    }

    #[test]
    fn test_missing_keys_still_build_clients() {
        let mut config = AppConfig::default();
        for cfg in config.providers.values_mut() {
            cfg.api_key_env = "MDSYNC_TEST_KEY_THAT_IS_NEVER_SET".into();
        }
        let (registry, fetcher) = build_providers(&config).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(fetcher.available(&fetcher.order().prices).is_empty());
    }
}
