//! Per-symbol outcomes and per-run counters.

use crate::provider::{DataKind, ProviderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on error messages kept in a `ProcessingStats` sample.
pub const MAX_ERROR_SAMPLES: usize = 10;

/// Why a symbol was skipped without a provider fetch (or with an empty one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Symbol is on the exclusion list.
    Excluded,
    /// Stored prices already cover the last completed session.
    UpToDate,
    /// No provider has dividends for the symbol; a valid outcome.
    NoDividends,
    /// Issuer profile was refreshed recently.
    FreshProfile,
    /// No provider returned an issuer profile.
    NoProfile,
    /// Run stop was requested before the symbol was dispatched.
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excluded => "excluded",
            Self::UpToDate => "up_to_date",
            Self::NoDividends => "no_dividends",
            Self::FreshProfile => "fresh_profile",
            Self::NoProfile => "no_profile",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    Succeeded {
        provider: Option<ProviderId>,
        records: usize,
        dropped: usize,
    },
    Skipped(SkipReason),
    Failed(String),
}

impl SymbolOutcome {
    /// Success in the sense of "nothing left to do for this symbol".
    ///
    /// Skips count as success except a cancellation, which leaves the
    /// symbol unprocessed.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Succeeded { .. } => true,
            Self::Skipped(reason) => *reason != SkipReason::Cancelled,
            Self::Failed(_) => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Counters for one batch operation of one data kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub kind: DataKind,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub records_persisted: u64,
    pub records_dropped: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Sample of failure messages, at most `MAX_ERROR_SAMPLES`.
    pub errors: Vec<String>,
}

impl ProcessingStats {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            records_persisted: 0,
            records_dropped: 0,
            started_at: Utc::now(),
            ended_at: None,
            errors: Vec::new(),
        }
    }

    /// Fold one symbol outcome in. Cancelled symbols are not counted.
    pub fn record(&mut self, symbol: &str, outcome: &SymbolOutcome) {
        match outcome {
            SymbolOutcome::Skipped(SkipReason::Cancelled) => {}
            SymbolOutcome::Succeeded {
                records, dropped, ..
            } => {
                self.attempted += 1;
                self.succeeded += 1;
                self.records_persisted += *records as u64;
                self.records_dropped += *dropped as u64;
            }
            SymbolOutcome::Skipped(_) => {
                self.attempted += 1;
                self.skipped += 1;
            }
            SymbolOutcome::Failed(reason) => {
                self.attempted += 1;
                self.failed += 1;
                self.push_error(format!("{symbol}: {reason}"));
            }
        }
    }

    /// Re-classify a symbol previously counted as succeeded whose records
    /// failed to persist.
    pub fn demote_to_failed(&mut self, symbol: &str, records: u64, reason: &str) {
        if self.succeeded > 0 {
            self.succeeded -= 1;
            self.failed += 1;
            self.records_persisted = self.records_persisted.saturating_sub(records);
        }
        self.push_error(format!("{symbol}: {reason}"));
    }

    pub fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_ERROR_SAMPLES {
            self.errors.push(message);
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Fraction of attempted symbols that did not fail.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 1.0;
        }
        (self.succeeded + self.skipped) as f64 / self.attempted as f64
    }

    pub fn elapsed_secs(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Combine counters from another batch of the same kind.
    pub fn merge(&mut self, other: &ProcessingStats) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.records_persisted += other.records_persisted;
        self.records_dropped += other.records_dropped;
        self.started_at = self.started_at.min(other.started_at);
        self.ended_at = match (self.ended_at, other.ended_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for err in &other.errors {
            self.push_error(err.clone());
        }
    }
}
