//! Command-line surface.

use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};
use mdsync_core::DataKind;
use mdsync_persistence::CheckpointKind;
use std::path::PathBuf;

/// Multi-provider market-data ingestion.
#[derive(Parser, Debug)]
#[command(name = "mdsync", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (can also be set via MDSYNC_CONFIG env var)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-memory store and write no checkpoints or locks
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Find candidate symbols across providers, optionally validating them
    Discover(DiscoverArgs),
    /// Incrementally refresh prices, dividends and issuer profiles
    Update(UpdateArgs),
    /// Load one session's end-of-day bars for every tracked symbol
    BatchEod(BatchEodArgs),
    /// Checkpoint maintenance
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverArgs {
    /// Maximum candidates per provider and in total
    #[arg(long)]
    pub limit: Option<usize>,

    /// Validate candidates and persist admissions/exclusions
    #[arg(long)]
    pub validate: bool,

    /// Keep candidates that already have a validation outcome
    #[arg(long)]
    pub fresh: bool,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
#[command(group(
    ArgGroup::new("only")
        .args(["prices_only", "dividends_only", "companies_only"])
        .multiple(false)
))]
pub struct UpdateArgs {
    #[arg(long)]
    pub prices_only: bool,

    #[arg(long)]
    pub dividends_only: bool,

    /// Issuer profiles only
    #[arg(long)]
    pub companies_only: bool,

    /// Fetch from this date (YYYY-MM-DD) instead of the planned window
    #[arg(long)]
    pub from_date: Option<NaiveDate>,

    /// Ignore stored state and fetch the full lookback window
    #[arg(long)]
    pub full_refresh: bool,

    /// Comma-separated subset of symbols
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

impl UpdateArgs {
    /// Data kinds to refresh, in run order.
    pub fn kinds(&self) -> Vec<DataKind> {
        if self.prices_only {
            vec![DataKind::Prices]
        } else if self.dividends_only {
            vec![DataKind::Dividends]
        } else if self.companies_only {
            vec![DataKind::Issuer]
        } else {
            vec![DataKind::Prices, DataKind::Dividends, DataKind::Issuer]
        }
    }

    /// Resuming only makes sense for a plain incremental run over the
    /// tracked universe.
    pub fn resumable(&self) -> bool {
        self.symbols.is_empty() && !self.full_refresh && self.from_date.is_none()
    }
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchEodArgs {
    /// Session date (YYYY-MM-DD); defaults to the last completed weekday
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointAction {
    /// Keep only the newest checkpoints of a kind
    Prune {
        #[arg(long)]
        kind: CheckpointKind,

        #[arg(long)]
        keep: usize,
    },
}

impl Command {
    /// Mode label used in reports and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover(_) => "discover",
            Self::Update(_) => "update",
            Self::BatchEod(_) => "batch-eod",
            Self::Checkpoints { .. } => "checkpoints",
        }
    }

    /// Checkpoint kinds this command writes.
    pub fn checkpoint_kinds(&self) -> Vec<CheckpointKind> {
        match self {
            Self::Discover(args) if args.validate => {
                vec![CheckpointKind::Discovery, CheckpointKind::Validation]
            }
            Self::Discover(_) => vec![CheckpointKind::Discovery],
            Self::Update(args) => args.kinds().into_iter().map(checkpoint_kind).collect(),
            Self::BatchEod(_) => vec![CheckpointKind::BulkEod],
            Self::Checkpoints {
                action: CheckpointAction::Prune { kind, .. },
            } => vec![*kind],
        }
    }

    /// Name of the run lock. Pruning shares the lock of the mode that
    /// writes the pruned kind.
    pub fn lock_name(&self) -> &'static str {
        match self {
            Self::Checkpoints {
                action: CheckpointAction::Prune { kind, .. },
            } => lock_for_kind(*kind),
            other => other.name(),
        }
    }
}

pub fn checkpoint_kind(kind: DataKind) -> CheckpointKind {
    match kind {
        DataKind::Prices => CheckpointKind::Prices,
        DataKind::Dividends => CheckpointKind::Dividends,
        DataKind::Issuer => CheckpointKind::Issuer,
    }
}

fn lock_for_kind(kind: CheckpointKind) -> &'static str {
    match kind {
        CheckpointKind::Discovery | CheckpointKind::Validation => "discover",
        CheckpointKind::Prices | CheckpointKind::Dividends | CheckpointKind::Issuer => "update",
        CheckpointKind::BulkEod => "batch-eod",
    }
}
