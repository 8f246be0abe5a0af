//! Checkpoints for resumable runs.
//!
//! One JSON Lines file per kind under the checkpoint directory:
//! - Each line is a complete checkpoint; newer lines supersede older ones
//! - A truncated or corrupt line only loses that checkpoint
//! - History is kept until `prune`

use crate::error::{PersistenceError, PersistenceResult};
use chrono::{DateTime, Utc};
use mdsync_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Discovery,
    Validation,
    Prices,
    Dividends,
    Issuer,
    BulkEod,
}

impl CheckpointKind {
    pub const ALL: [Self; 6] = [
        Self::Discovery,
        Self::Validation,
        Self::Prices,
        Self::Dividends,
        Self::Issuer,
        Self::BulkEod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Validation => "validation",
            Self::Prices => "prices",
            Self::Dividends => "dividends",
            Self::Issuer => "issuer",
            Self::BulkEod => "bulk_eod",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointKind {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| PersistenceError::UnknownCheckpointKind(s.to_string()))
    }
}

/// Processed-item set of one run at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub kind: CheckpointKind,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub processed: BTreeSet<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Checkpoint {
    /// True when the run that wrote it marked itself finished
    /// (`metadata.complete == true`).
    pub fn is_complete(&self) -> bool {
        self.metadata
            .get("complete")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(format!("{}.jsonl", kind.as_str()))
    }

    /// Append a checkpoint. Earlier checkpoints of the kind stay in history.
    pub fn save(
        &self,
        kind: CheckpointKind,
        run_id: Uuid,
        processed: impl IntoIterator<Item = String>,
        metadata: serde_json::Value,
    ) -> PersistenceResult<Checkpoint> {
        let checkpoint = Checkpoint {
            kind,
            run_id,
            created_at: Utc::now(),
            processed: processed.into_iter().collect(),
            metadata,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(kind))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", serde_json::to_string(&checkpoint)?)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;

        Metrics::checkpoint_saved(kind.as_str());
        debug!(
            kind = %kind,
            run_id = %run_id,
            processed = checkpoint.processed.len(),
            "Saved checkpoint"
        );
        Ok(checkpoint)
    }

    /// Every readable checkpoint of a kind, oldest first.
    pub fn history(&self, kind: CheckpointKind) -> PersistenceResult<Vec<Checkpoint>> {
        let path = self.path(kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut checkpoints = Vec::new();
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            // Raw bytes: a torn append may leave invalid UTF-8.
            let parsed = std::str::from_utf8(&buf)
                .map_err(|e| e.to_string())
                .and_then(|line| {
                    if line.trim().is_empty() {
                        Ok(None)
                    } else {
                        serde_json::from_str::<Checkpoint>(line)
                            .map(Some)
                            .map_err(|e| e.to_string())
                    }
                });
            match parsed {
                Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
                Ok(None) => {}
                Err(error) => warn!(
                    path = %path.display(),
                    line = line_no,
                    error = %error,
                    "Skipping corrupt checkpoint line"
                ),
            }
        }
        Ok(checkpoints)
    }

    pub fn load_latest(&self, kind: CheckpointKind) -> PersistenceResult<Option<Checkpoint>> {
        Ok(self.history(kind)?.pop())
    }

    /// Latest checkpoint when its run did not complete.
    pub fn resumable(&self, kind: CheckpointKind) -> PersistenceResult<Option<Checkpoint>> {
        Ok(self.load_latest(kind)?.filter(|c| !c.is_complete()))
    }

    /// Items of `full` not in the latest checkpoint, in their original order.
    pub fn remaining_of(
        &self,
        kind: CheckpointKind,
        full: &[String],
    ) -> PersistenceResult<Vec<String>> {
        let Some(latest) = self.load_latest(kind)? else {
            return Ok(full.to_vec());
        };
        let done: HashSet<&str> = latest.processed.iter().map(String::as_str).collect();
        Ok(full
            .iter()
            .filter(|item| !done.contains(item.as_str()))
            .cloned()
            .collect())
    }

    /// Keep the newest `keep` checkpoints of a kind. Returns how many were removed.
    pub fn prune(&self, kind: CheckpointKind, keep: usize) -> PersistenceResult<usize> {
        let history = self.history(kind)?;
        if history.len() <= keep {
            return Ok(0);
        }
        let removed = history.len() - keep;
        let path = self.path(kind);
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for checkpoint in &history[removed..] {
                writeln!(writer, "{}", serde_json::to_string(checkpoint)?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        std::fs::rename(&tmp, &path)?;

        info!(kind = %kind, removed, kept = keep, "Pruned checkpoints");
        Ok(removed)
    }
}
