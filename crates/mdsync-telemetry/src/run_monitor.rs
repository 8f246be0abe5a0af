//! End-of-run reporting.
//!
//! `RunMonitor` collects phase timings, per-phase processing counters,
//! provider call snapshots and optimization savings while a run executes,
//! then folds them into a single `RunReport`.

use crate::error::TelemetryResult;
use chrono::{DateTime, Utc};
use mdsync_core::{ProcessingStats, MAX_ERROR_SAMPLES};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Call counters for one provider, captured from its rate governor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallSnapshot {
    pub provider: String,
    pub calls: u64,
    pub successes: u64,
    pub throttled: u64,
    pub errors: u64,
    pub not_found: u64,
    pub unauthorized: u64,
    pub mean_latency_ms: f64,
    pub final_backoff_ms: u64,
}

impl ProviderCallSnapshot {
    /// Fraction of calls that returned a usable answer. 404 counts as an answer.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 1.0;
        }
        (self.successes + self.not_found) as f64 / self.calls as f64
    }
}

/// Work avoided by a staleness or caching filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsEntry {
    pub category: String,
    pub items: u64,
    pub api_calls_saved: u64,
    pub est_seconds_saved: f64,
}

/// Running phase. Hand back to [`RunMonitor::finish_phase`].
#[derive(Debug)]
pub struct PhaseTimer {
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl PhaseTimer {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub stats: Option<ProcessingStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub records_persisted: u64,
    pub records_dropped: u64,
    pub api_calls: u64,
    pub api_calls_saved: u64,
    pub est_seconds_saved: f64,
}

/// Serializable summary of a complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub phases: Vec<PhaseReport>,
    pub providers: Vec<ProviderCallSnapshot>,
    pub savings: Vec<SavingsEntry>,
    pub totals: RunTotals,
    /// Sampled failure messages across all phases.
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> TelemetryResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Output the report to logs.
    pub fn log_summary(&self) {
        info!("========== Run Summary ==========");
        info!(
            "Run {} ({}) finished in {:.1}s",
            self.run_id, self.mode, self.elapsed_secs
        );

        for phase in &self.phases {
            match &phase.stats {
                Some(s) => info!(
                    "  {}: {:.1}s, attempted={} succeeded={} failed={} skipped={} records={} dropped={} ({:.1}% ok)",
                    phase.name,
                    phase.elapsed_secs,
                    s.attempted,
                    s.succeeded,
                    s.failed,
                    s.skipped,
                    s.records_persisted,
                    s.records_dropped,
                    s.success_rate() * 100.0
                ),
                None => info!("  {}: {:.1}s", phase.name, phase.elapsed_secs),
            }
        }

        for p in &self.providers {
            info!(
                "  provider {}: calls={} ok={} throttled={} errors={} not_found={} unauthorized={} mean={:.0}ms backoff={}ms ({:.1}% ok)",
                p.provider,
                p.calls,
                p.successes,
                p.throttled,
                p.errors,
                p.not_found,
                p.unauthorized,
                p.mean_latency_ms,
                p.final_backoff_ms,
                p.success_rate() * 100.0
            );
        }

        for s in &self.savings {
            info!(
                "  saved [{}]: {} items, ~{} API calls, ~{:.0}s",
                s.category, s.items, s.api_calls_saved, s.est_seconds_saved
            );
        }

        let t = &self.totals;
        info!(
            "Totals: attempted={} succeeded={} failed={} skipped={} records={} api_calls={} saved_calls={}",
            t.attempted,
            t.succeeded,
            t.failed,
            t.skipped,
            t.records_persisted,
            t.api_calls,
            t.api_calls_saved
        );
        for err in &self.errors {
            info!("  error: {}", err);
        }
        info!("=================================");
    }
}

#[derive(Default)]
struct MonitorState {
    phases: Vec<PhaseReport>,
    providers: Vec<ProviderCallSnapshot>,
    savings: Vec<SavingsEntry>,
    /// Failures outside any phase's processing counters.
    loose_failures: u64,
    loose_errors: Vec<String>,
}

/// Run-scoped collector. Shareable by reference across tasks.
pub struct RunMonitor {
    run_id: String,
    mode: String,
    started_at: DateTime<Utc>,
    started: Instant,
    /// Estimated wall-clock cost of one provider call, used for savings.
    seconds_per_call: f64,
    state: Mutex<MonitorState>,
}

impl RunMonitor {
    pub fn new(run_id: impl Into<String>, mode: impl Into<String>, seconds_per_call: f64) -> Self {
        Self {
            run_id: run_id.into(),
            mode: mode.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            seconds_per_call,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn start_phase(&self, name: impl Into<String>) -> PhaseTimer {
        let name = name.into();
        info!(run_id = %self.run_id, phase = %name, "Phase started");
        PhaseTimer {
            name,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn finish_phase(&self, timer: PhaseTimer, stats: Option<ProcessingStats>) {
        let elapsed_secs = timer.started.elapsed().as_secs_f64();
        info!(
            run_id = %self.run_id,
            phase = %timer.name,
            elapsed_secs,
            "Phase finished"
        );
        self.state.lock().phases.push(PhaseReport {
            name: timer.name,
            started_at: timer.started_at,
            elapsed_secs,
            stats,
        });
    }

    /// Record (or replace) the call snapshot for a provider.
    pub fn record_provider(&self, snapshot: ProviderCallSnapshot) {
        let mut state = self.state.lock();
        match state
            .providers
            .iter_mut()
            .find(|p| p.provider == snapshot.provider)
        {
            Some(existing) => *existing = snapshot,
            None => state.providers.push(snapshot),
        }
    }

    /// Record items a filter let the run skip. Repeated categories accumulate.
    pub fn record_savings(&self, category: &str, items: u64, api_calls_saved: u64) {
        if items == 0 && api_calls_saved == 0 {
            return;
        }
        let est = api_calls_saved as f64 * self.seconds_per_call;
        let mut state = self.state.lock();
        match state.savings.iter_mut().find(|s| s.category == category) {
            Some(entry) => {
                entry.items += items;
                entry.api_calls_saved += api_calls_saved;
                entry.est_seconds_saved += est;
            }
            None => state.savings.push(SavingsEntry {
                category: category.to_string(),
                items,
                api_calls_saved,
                est_seconds_saved: est,
            }),
        }
    }

    /// Count failures of a step that has no `ProcessingStats`, such as
    /// validation outcomes that could not be persisted.
    pub fn record_failures(&self, count: u64, errors: &[String]) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.loose_failures += count;
        for err in errors {
            if state.loose_errors.len() < MAX_ERROR_SAMPLES {
                state.loose_errors.push(err.clone());
            }
        }
    }

    pub fn report(&self) -> RunReport {
        let state = self.state.lock();
        let mut totals = RunTotals::default();
        let mut errors = Vec::new();

        for phase in &state.phases {
            if let Some(s) = &phase.stats {
                totals.attempted += s.attempted;
                totals.succeeded += s.succeeded;
                totals.failed += s.failed;
                totals.skipped += s.skipped;
                totals.records_persisted += s.records_persisted;
                totals.records_dropped += s.records_dropped;
                for err in &s.errors {
                    if errors.len() < MAX_ERROR_SAMPLES {
                        errors.push(err.clone());
                    }
                }
            }
        }
        totals.failed += state.loose_failures;
        for err in &state.loose_errors {
            if errors.len() < MAX_ERROR_SAMPLES {
                errors.push(err.clone());
            }
        }
        totals.api_calls = state.providers.iter().map(|p| p.calls).sum();
        totals.api_calls_saved = state.savings.iter().map(|s| s.api_calls_saved).sum();
        totals.est_seconds_saved = state.savings.iter().map(|s| s.est_seconds_saved).sum();

        RunReport {
            run_id: self.run_id.clone(),
            mode: self.mode.clone(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            phases: state.phases.clone(),
            providers: state.providers.clone(),
            savings: state.savings.clone(),
            totals,
            errors,
        }
    }
}
