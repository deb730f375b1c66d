//! Read-only view of coordination state for operators.

use std::{fmt, path::PathBuf};

use serde::Serialize;

use crate::{
    isolation::{Instance, IsolationProvider},
    lock::{LockRecord, LockRegistry},
    queue::{QueueEntry, QueueManager},
    Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub queue_size: usize,
    pub queue: Vec<QueueStatus>,
    pub locks: Vec<LockStatus>,
    pub instances: Vec<InstanceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub path: PathBuf,
    /// `None` when the lock file could not be parsed
    pub record: Option<LockRecord>,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    #[serde(flatten)]
    pub instance: Instance,
    pub stale: bool,
}

/// State left behind by a process that is no longer running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StaleFinding {
    Lock(LockRecord),
    Instance(Instance),
    Waiter(QueueEntry),
}

impl fmt::Display for StaleFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock(record) => write!(
                f,
                "stale lock on '{}' held by {} (pid {}); clear it with `convoy unlock {}`",
                record.branch, record.owner_id, record.pid, record.branch
            ),
            Self::Instance(instance) => write!(
                f,
                "stale isolation instance {} for '{}' at {} (pid {})",
                instance.id,
                instance.branch,
                instance.path.display(),
                instance.pid
            ),
            Self::Waiter(entry) => write!(
                f,
                "stale queue entry {} at position {} for '{}' (pid {})",
                entry.owner_id,
                entry.position,
                entry.request.branch(),
                entry.pid
            ),
        }
    }
}

impl StatusReport {
    pub fn stale_findings(&self) -> Vec<StaleFinding> {
        let locks = self
            .locks
            .iter()
            .filter(|l| l.stale)
            .filter_map(|l| l.record.clone())
            .map(StaleFinding::Lock);
        let instances = self
            .instances
            .iter()
            .filter(|i| i.stale)
            .map(|i| StaleFinding::Instance(i.instance.clone()));
        let waiters = self
            .queue
            .iter()
            .filter(|q| q.stale)
            .map(|q| StaleFinding::Waiter(q.entry.clone()));
        locks.chain(instances).chain(waiters).collect()
    }

    /// Lock holders whose record could be read
    pub fn holders(&self) -> impl Iterator<Item = &LockRecord> {
        self.locks.iter().filter_map(|l| l.record.as_ref())
    }
}

/// Snapshot queue, locks and instances
pub fn collect(
    locks: &LockRegistry,
    queue: &QueueManager,
    isolation: &IsolationProvider,
) -> Result<StatusReport> {
    let queue: Vec<QueueStatus> = queue
        .list()?
        .into_iter()
        .map(|entry| QueueStatus {
            stale: entry.is_stale(),
            entry,
        })
        .collect();

    let locks = locks
        .list()?
        .into_iter()
        .map(|entry| LockStatus {
            stale: entry.record.as_ref().is_some_and(LockRecord::is_stale),
            path: entry.path,
            record: entry.record,
        })
        .collect();

    let instances = isolation
        .instances()?
        .into_iter()
        .map(|instance| InstanceStatus {
            stale: instance.is_stale(),
            instance,
        })
        .collect();

    Ok(StatusReport {
        queue_size: queue.len(),
        queue,
        locks,
        instances,
    })
}
