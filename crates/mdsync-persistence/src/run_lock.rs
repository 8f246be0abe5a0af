//! Lock file preventing two runs of the same kind from overlapping.

use crate::error::{PersistenceError, PersistenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    run_id: String,
    started_at: DateTime<Utc>,
}

/// Held for the lifetime of a run; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create `<dir>/<name>.lock`.
    ///
    /// An existing lock older than `stale_after`, or one that cannot be read,
    /// is reclaimed. A live lock fails with `RunInProgress`.
    pub fn acquire(
        dir: &Path,
        name: &str,
        run_id: &str,
        stale_after: Duration,
    ) -> PersistenceResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.lock"));
        let info = LockInfo {
            pid: std::process::id(),
            run_id: run_id.to_string(),
            started_at: Utc::now(),
        };

        // Second attempt only after reclaiming a stale lock.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(serde_json::to_string(&info)?.as_bytes())?;
                    file.sync_data()?;
                    info!(lock = %path.display(), run_id, "Acquired run lock");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|raw| serde_json::from_str::<LockInfo>(&raw).ok());
                    match holder {
                        Some(holder) if !is_stale(&holder, stale_after) => {
                            return Err(PersistenceError::RunInProgress {
                                name: name.to_string(),
                                pid: holder.pid,
                                started_at: holder.started_at.to_rfc3339(),
                            });
                        }
                        _ => {
                            warn!(lock = %path.display(), "Reclaiming stale run lock");
                            match std::fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PersistenceError::RunInProgress {
            name: name.to_string(),
            pid: 0,
            started_at: "unknown".to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_stale(holder: &LockInfo, stale_after: Duration) -> bool {
    let age = Utc::now() - holder.started_at;
    age.to_std().map(|age| age > stale_after).unwrap_or(false)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove run lock");
        }
    }
}
