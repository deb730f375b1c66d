//! Branch lock registry.
//!
//! One lock file per branch under `<state_dir>/locks/`. Acquisition is an
//! exclusive create-new open, so two processes racing for a branch can never
//! both succeed; whoever loses sees the existing file and gets `Busy`.
//!
//! # Guarantees
//!
//! - **Mutual Exclusion**: at most one live lock file per branch
//! - **Idempotent Release**: releasing twice, or releasing a lock that was
//!   never acquired, is a no-op
//! - **Owner-checked Release**: a handle only ever removes a file that still
//!   carries its own owner ID
//! - **No Reclaiming**: stale locks are detected and reported, never removed
//!   except by explicit operator action ([`LockRegistry::force_release`])

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod queries;
mod types;

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::{debug, warn};

pub(crate) use queries::{current_hostname, is_owner_stale, sanitize_branch};
pub use types::{Acquisition, LockEntry, LockHandle, LockRecord};

use crate::{request::OwnerId, Error, Result};

/// Filesystem-backed registry of branch locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRegistry {
    dir: PathBuf,
}

impl LockRegistry {
    /// Open the registry rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, &e))?;
        Ok(Self { dir })
    }

    /// Directory holding the lock files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, branch: &str) -> PathBuf {
        self.dir.join(queries::lock_file_name(branch))
    }

    /// Try to take the lock for `branch` without waiting.
    pub fn try_acquire(&self, branch: &str, owner: &OwnerId) -> Result<Acquisition> {
        let path = self.lock_path(branch);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = read_record(&path).ok().flatten();
                debug!(branch, holder = ?holder.as_ref().map(|h| &h.owner_id), "lock busy");
                return Ok(Acquisition::Busy { holder });
            }
            Err(e) => return Err(Error::io(&path, &e)),
        };

        let record = LockRecord {
            branch: branch.to_string(),
            owner_id: owner.clone(),
            pid: std::process::id(),
            hostname: current_hostname(),
            acquired_at: Utc::now(),
        };

        let written = serde_json::to_vec_pretty(&record)
            .map_err(Error::from)
            .and_then(|json| {
                file.write_all(&json)
                    .and_then(|()| file.sync_all())
                    .map_err(|e| Error::io(&path, &e))
            });

        if let Err(e) = written {
            // We created the file, so nobody else can own it yet.
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        debug!(branch, owner = %owner, path = %path.display(), "lock acquired");
        Ok(Acquisition::Acquired(LockHandle { record, path }))
    }

    /// Release a held lock. Returns whether a file was removed.
    ///
    /// Idempotent: a missing file, or a file now owned by someone else,
    /// is left alone and reported as `false`.
    pub fn release(&self, handle: &LockHandle) -> Result<bool> {
        let current = match read_record(&handle.path) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(branch = handle.branch(), "lock already released");
                return Ok(false);
            }
            Err(e) => {
                warn!(branch = handle.branch(), error = %e, "lock file unreadable, not removing");
                return Ok(false);
            }
        };

        if current.owner_id != handle.record.owner_id {
            warn!(
                branch = handle.branch(),
                ours = %handle.record.owner_id,
                theirs = %current.owner_id,
                "lock now belongs to another run, not removing"
            );
            return Ok(false);
        }

        match fs::remove_file(&handle.path) {
            Ok(()) => {
                debug!(branch = handle.branch(), owner = %current.owner_id, "lock released");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(&handle.path, &e)),
        }
    }

    /// Whether any run currently holds `branch`.
    #[must_use]
    pub fn is_held(&self, branch: &str) -> bool {
        self.lock_path(branch).exists()
    }

    /// Current holder of `branch`, if the lock exists and is readable.
    pub fn holder(&self, branch: &str) -> Result<Option<LockRecord>> {
        read_record(&self.lock_path(branch))
    }

    /// Every lock file in the registry.
    pub fn list(&self) -> Result<Vec<LockEntry>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::io(&self.dir, &e))?;

        let mut locks: Vec<LockEntry> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "lock"))
            .map(|path| {
                let record = read_record(&path).ok().flatten();
                LockEntry { path, record }
            })
            .collect();

        locks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(locks)
    }

    /// Operator-only removal of a lock regardless of owner.
    ///
    /// Refuses while the recorded owner is still running unless `force`.
    pub fn force_release(&self, branch: &str, force: bool) -> Result<bool> {
        let path = self.lock_path(branch);
        let Some(record) = read_record(&path)? else {
            return Ok(false);
        };

        if !force && !record.is_stale() {
            return Err(Error::LockBusy {
                branch: branch.to_string(),
                holder: format!("{} (pid {} on {})", record.owner_id, record.pid, record.hostname),
            });
        }

        warn!(branch, owner = %record.owner_id, pid = record.pid, "operator cleared lock");
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(&path, &e)),
        }
    }
}

/// Read a lock record; `Ok(None)` when the file is absent.
fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Parse(format!("lock file {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, &e)),
    }
}
