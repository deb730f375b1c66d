//! Type definitions for the branch lock registry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::queries::is_owner_stale;
use crate::request::OwnerId;

/// Owner metadata persisted inside a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Branch the lock excludes
    pub branch: String,
    /// Run that holds the lock
    pub owner_id: OwnerId,
    /// Process that created the lock
    pub pid: u32,
    /// Host the owning process runs on
    pub hostname: String,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Whether the owning process is known to be dead.
    ///
    /// Stale locks are reported, never reclaimed automatically.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        is_owner_stale(&self.hostname, self.pid)
    }
}

/// Proof of a held lock, handed to the cleanup supervisor for release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub(super) record: LockRecord,
    pub(super) path: PathBuf,
}

impl LockHandle {
    /// The persisted record
    #[must_use]
    pub const fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Branch this handle locks
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.record.branch
    }

    /// Lock file on disk
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Result of a single, non-blocking acquisition attempt
#[derive(Debug)]
pub enum Acquisition {
    /// Lock created for the caller
    Acquired(LockHandle),
    /// Lock file already exists; holder is `None` while its owner is still
    /// writing metadata or if the file is unreadable
    Busy { holder: Option<LockRecord> },
}

/// A lock file found on disk during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Lock file path
    pub path: PathBuf,
    /// Parsed record, `None` if unreadable
    pub record: Option<LockRecord>,
}
