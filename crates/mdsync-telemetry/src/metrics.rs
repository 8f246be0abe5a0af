//! Prometheus metrics for mdsync.
//!
//! Covers:
//! - Provider calls by outcome and latency
//! - Rate governor backoff and in-flight permits
//! - Symbols processed, records persisted/dropped, batch flushes
//! - Auto-exclusions and checkpoints
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash at
//! first use rather than silently drop data.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

/// Provider HTTP calls by outcome.
/// Labels: provider, outcome (success/not_found/unauthorized/throttled/error/exhausted)
pub static PROVIDER_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_provider_calls_total",
        "Provider HTTP calls by outcome",
        &["provider", "outcome"]
    )
    .unwrap()
});

/// Provider call latency in milliseconds.
pub static PROVIDER_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "mdsync_provider_latency_ms",
        "Provider HTTP call latency in milliseconds",
        &["provider"],
        vec![25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

/// Current adaptive backoff per provider.
pub static GOVERNOR_BACKOFF_MS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdsync_governor_backoff_ms",
        "Current pre-call backoff delay per provider in milliseconds",
        &["provider"]
    )
    .unwrap()
});

/// Permits currently held per provider.
pub static GOVERNOR_INFLIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdsync_governor_inflight",
        "In-flight provider calls",
        &["provider"]
    )
    .unwrap()
});

/// Symbols processed by data kind and outcome.
pub static SYMBOLS_PROCESSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_symbols_processed_total",
        "Symbols processed by data kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Records written to the store.
pub static RECORDS_PERSISTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_records_persisted_total",
        "Records upserted into the backing store",
        &["kind"]
    )
    .unwrap()
});

/// Records discarded for failing validity rules.
pub static RECORDS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_records_dropped_total",
        "Records dropped before persistence",
        &["kind"]
    )
    .unwrap()
});

/// Batch writer flushes.
/// Labels: kind, result (ok/error)
pub static BATCH_FLUSH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_batch_flush_total",
        "Batch writer flushes",
        &["kind", "result"]
    )
    .unwrap()
});

/// Auto-exclusions and validation rejections.
pub static EXCLUSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_exclusions_total",
        "Symbols excluded from ingestion",
        &["source"]
    )
    .unwrap()
});

/// Checkpoints written.
pub static CHECKPOINTS_SAVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdsync_checkpoints_saved_total",
        "Checkpoints appended",
        &["kind"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a provider call outcome.
    pub fn provider_call(provider: &str, outcome: &str) {
        PROVIDER_CALLS_TOTAL
            .with_label_values(&[provider, outcome])
            .inc();
    }

    /// Record provider call latency.
    pub fn provider_latency(provider: &str, latency_ms: f64) {
        PROVIDER_LATENCY_MS
            .with_label_values(&[provider])
            .observe(latency_ms);
    }

    /// Update a provider's backoff gauge.
    pub fn governor_backoff(provider: &str, backoff_ms: f64) {
        GOVERNOR_BACKOFF_MS
            .with_label_values(&[provider])
            .set(backoff_ms);
    }

    pub fn governor_inflight_inc(provider: &str) {
        GOVERNOR_INFLIGHT.with_label_values(&[provider]).inc();
    }

    pub fn governor_inflight_dec(provider: &str) {
        GOVERNOR_INFLIGHT.with_label_values(&[provider]).dec();
    }

    /// Record one processed symbol.
    pub fn symbol_processed(kind: &str, outcome: &str) {
        SYMBOLS_PROCESSED_TOTAL
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn records_persisted(kind: &str, count: usize) {
        RECORDS_PERSISTED_TOTAL
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    pub fn records_dropped(kind: &str, count: usize) {
        if count > 0 {
            RECORDS_DROPPED_TOTAL
                .with_label_values(&[kind])
                .inc_by(count as f64);
        }
    }

    pub fn batch_flush(kind: &str, ok: bool) {
        BATCH_FLUSH_TOTAL
            .with_label_values(&[kind, if ok { "ok" } else { "error" }])
            .inc();
    }

    pub fn symbol_excluded(source: &str) {
        EXCLUSIONS_TOTAL.with_label_values(&[source]).inc();
    }

    pub fn checkpoint_saved(kind: &str) {
        CHECKPOINTS_SAVED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }

    /// Write the text exposition to a file (textfile-collector style).
    pub fn write_to(path: &std::path::Path) -> TelemetryResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::render()?)?;
        Ok(())
    }
}
