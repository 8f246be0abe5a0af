//! Application configuration.

use crate::error::{AppError, AppResult};
use mdsync_core::ProviderId;
use mdsync_persistence::BatchWriterConfig;
use mdsync_pipeline::ValidationConfig;
use mdsync_provider::{FetchOrder, GovernorConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "MDSYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub batch_writer: WriterConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub fetch_order: FetchOrder,
    /// Keyed by provider identifier (`tiingo`, `polygon`, `alpha_vantage`).
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/mdsync.db")
}

fn default_pool_size() -> u32 {
    8
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
    /// Symbols processed between checkpoint saves.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Checkpoints kept per kind after each run. 0 disables pruning.
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/checkpoints")
}

fn default_chunk_size() -> usize {
    500
}

fn default_keep() -> usize {
    20
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            chunk_size: default_chunk_size(),
            keep: default_keep(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    /// Locks older than this are treated as left behind by a crashed run.
    #[serde(default = "default_stale_lock_mins")]
    pub stale_lock_mins: u64,
    /// Estimated cost of one provider call, used for savings reporting.
    #[serde(default = "default_seconds_per_call")]
    pub seconds_per_call: f64,
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("data/locks")
}

fn default_stale_lock_mins() -> u64 {
    360
}

fn default_seconds_per_call() -> f64 {
    1.0
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            stale_lock_mins: default_stale_lock_mins(),
            seconds_per_call: default_seconds_per_call(),
        }
    }
}

impl RunConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_mins.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Time-triggered flush period (ms). 0 flushes on size only.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_batch_size() -> usize {
    1_000
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    10_000
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl From<&WriterConfig> for BatchWriterConfig {
    fn from(cfg: &WriterConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            flush_interval: (cfg.flush_interval_ms > 0)
                .then(|| Duration::from_millis(cfg.flush_interval_ms)),
            queue_capacity: cfg.queue_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Window fetched for a symbol with nothing stored.
    #[serde(default = "default_lookback_days")]
    pub default_lookback_days: u32,
    /// Issuer profiles younger than this are not refetched.
    #[serde(default = "default_issuer_refresh_days")]
    pub issuer_refresh_days: u32,
    /// Skip price fetches for symbols already covering the last session.
    #[serde(default = "default_true")]
    pub skip_current: bool,
}

fn default_lookback_days() -> u32 {
    365
}

fn default_issuer_refresh_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            default_lookback_days: default_lookback_days(),
            issuer_refresh_days: default_issuer_refresh_days(),
            skip_current: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_recency_days")]
    pub recency_days: u32,
    #[serde(default = "default_lookback_days")]
    pub dividend_lookback_days: u32,
    /// Symbols admitted without evidence checks.
    #[serde(default)]
    pub portfolio: Vec<String>,
}

fn default_recency_days() -> u32 {
    7
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            recency_days: default_recency_days(),
            dividend_lookback_days: default_lookback_days(),
            portfolio: Vec::new(),
        }
    }
}

impl ValidationSection {
    pub fn to_validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            recency_days: self.recency_days,
            dividend_lookback_days: self.dividend_lookback_days,
            portfolio: self
                .portfolio
                .iter()
                .filter_map(|s| mdsync_core::normalize_symbol(s))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Default for `discover --limit`.
    #[serde(default = "default_discovery_limit")]
    pub limit: usize,
    /// Listing venues kept by discovery. Empty keeps every venue.
    #[serde(default = "default_allowed_venues")]
    pub allowed_venues: Vec<String>,
}

fn default_discovery_limit() -> usize {
    1_000
}

fn default_allowed_venues() -> Vec<String> {
    ["NYSE", "NASDAQ", "NYSE ARCA", "NYSE AMERICAN", "BATS"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            limit: default_discovery_limit(),
            allowed_venues: default_allowed_venues(),
        }
    }
}

/// One provider. The API key itself never lives in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_success_streak")]
    pub success_streak: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_floor_ms")]
    pub backoff_floor_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_success_streak() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_backoff_floor_ms() -> u64 {
    125
}

impl ProviderConfig {
    pub fn new(api_key_env: impl Into<String>) -> Self {
        Self {
            enabled: true,
            api_key_env: api_key_env.into(),
            base_url: None,
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            success_streak: default_success_streak(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_floor_ms: default_backoff_floor_ms(),
        }
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            concurrency: self.concurrency.max(1),
            success_streak: self.success_streak.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_floor: Duration::from_millis(self.backoff_floor_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            checkpoints: CheckpointConfig::default(),
            run: RunConfig::default(),
            batch_writer: WriterConfig::default(),
            ingestion: IngestionConfig::default(),
            validation: ValidationSection::default(),
            discovery: DiscoveryConfig::default(),
            fetch_order: FetchOrder::default(),
            providers: default_providers(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    [
        (ProviderId::TIINGO, "TIINGO_API_KEY"),
        (ProviderId::POLYGON, "POLYGON_API_KEY"),
        (ProviderId::ALPHA_VANTAGE, "ALPHA_VANTAGE_API_KEY"),
    ]
    .into_iter()
    .map(|(id, env)| (id.as_str().to_string(), ProviderConfig::new(env)))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus text dump written at the end of a run.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
    /// JSON run report written at the end of a run.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info,mdsync=debug".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_path: None,
            report_path: None,
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit argument, then `MDSYNC_CONFIG`,
    /// then the default location.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from a specific file.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Enabled providers with their parsed identifiers.
    pub fn enabled_providers(&self) -> AppResult<Vec<(ProviderId, &ProviderConfig)>> {
        self.providers
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, cfg)| {
                name.parse::<ProviderId>()
                    .map(|id| (id, cfg))
                    .map_err(|e| AppError::Config(e.to_string()))
            })
            .collect()
    }

    fn validate(&self) -> AppResult<()> {
        self.enabled_providers()?;
        if self.checkpoints.chunk_size == 0 {
            return Err(AppError::Config("checkpoints.chunk_size must be > 0".into()));
        }
        if self.store.pool_size == 0 {
            return Err(AppError::Config("store.pool_size must be > 0".into()));
        }
        Ok(())
    }
}
