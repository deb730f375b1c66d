//! FIFO queue of deferred requests in `<state_dir>/queue.json`.
//!
//! Positions are 1-based and renumbered on every mutation, so among the
//! entries currently queued they are always dense (no gaps, no duplicates)
//! and ordered by enqueue sequence.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    lock::{current_hostname, is_owner_stale},
    request::{OwnerId, Request},
    state_file::StateFile,
    Result,
};

/// A deferred request waiting for its conflict to clear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Monotonic enqueue sequence number
    pub seq: u64,
    /// 1-based position among currently queued entries
    pub position: usize,
    pub owner_id: OwnerId,
    pub request: Request,
    pub pid: u32,
    pub hostname: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether the waiting process is known to be dead
    #[must_use]
    pub fn is_stale(&self) -> bool {
        is_owner_stale(&self.hostname, self.pid)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueState {
    next_seq: u64,
    entries: Vec<QueueEntry>,
}

impl QueueState {
    fn renumber(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.position = i + 1;
        }
    }

    fn position_of(&self, owner: &OwnerId) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| &e.owner_id == owner)
            .map(|e| e.position)
    }
}

/// Shared FIFO of deferred requests
#[derive(Debug, Clone)]
pub struct QueueManager {
    file: StateFile<QueueState>,
}

impl QueueManager {
    /// Queue backed by the file at `path` (created on first write)
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            file: StateFile::new(path),
        }
    }

    /// Append a request and return its position.
    ///
    /// An owner already in the queue keeps its place.
    pub fn enqueue(&self, request: &Request, owner: &OwnerId) -> Result<usize> {
        let position = self.file.update(|state| {
            if let Some(position) = state.position_of(owner) {
                return Ok(position);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(QueueEntry {
                seq,
                position: state.entries.len() + 1,
                owner_id: owner.clone(),
                request: request.clone(),
                pid: std::process::id(),
                hostname: current_hostname(),
                enqueued_at: Utc::now(),
            });
            Ok(state.entries.len())
        })?;
        debug!(
            branch = request.branch(),
            owner = %owner,
            position,
            queue = %self.file.path().display(),
            "request queued"
        );
        Ok(position)
    }

    /// Number of queued entries
    pub fn size(&self) -> Result<usize> {
        Ok(self.file.read()?.entries.len())
    }

    /// Remove and return the entry at the front
    pub fn dequeue_next(&self) -> Result<Option<QueueEntry>> {
        let entry = self.file.update(|state| {
            if state.entries.is_empty() {
                return Ok(None);
            }
            let entry = state.entries.remove(0);
            state.renumber();
            Ok(Some(entry))
        })?;
        if let Some(entry) = &entry {
            debug!(owner = %entry.owner_id, seq = entry.seq, "request dequeued");
        }
        Ok(entry)
    }

    /// Current position of `owner`, if queued
    pub fn position_of(&self, owner: &OwnerId) -> Result<Option<usize>> {
        Ok(self.file.read()?.position_of(owner))
    }

    /// Whether `owner` is first among entries whose processes are alive.
    ///
    /// Entries left by dead processes stay queued but do not block the
    /// entries behind them.
    pub fn is_front(&self, owner: &OwnerId) -> Result<bool> {
        let state = self.file.read()?;
        Ok(state
            .entries
            .iter()
            .find(|e| &e.owner_id == owner || !e.is_stale())
            .is_some_and(|e| &e.owner_id == owner))
    }

    /// Remove `owner`'s entry wherever it is. Returns whether it was queued.
    pub fn remove(&self, owner: &OwnerId) -> Result<bool> {
        let removed = self.file.update(|state| {
            let before = state.entries.len();
            state.entries.retain(|e| &e.owner_id != owner);
            state.renumber();
            Ok(state.entries.len() != before)
        })?;
        if removed {
            debug!(owner = %owner, "queue entry removed");
        }
        Ok(removed)
    }

    /// Snapshot of every entry in queue order
    pub fn list(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.file.read()?.entries)
    }
}
