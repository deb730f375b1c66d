//! Cleanup supervisor: the per-run finalizer.
//!
//! Resources are registered the moment they are acquired: the branch lock,
//! the isolation instance and, while deferred, the queue entry. `finalize`
//! takes each one out of its slot before releasing it, so however many
//! termination paths race to finalize, every resource is released exactly
//! once. Dropping the supervisor finalizes too, which covers panics and
//! cancelled futures.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::{
    isolation::{Instance, IsolationProvider},
    lock::{LockHandle, LockRegistry},
    queue::QueueManager,
    request::OwnerId,
    Result,
};

/// What one `finalize` call actually released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub queue_entry_removed: bool,
    pub lock_released: bool,
    pub instance_destroyed: bool,
}

/// A queue entry waiting to be withdrawn
#[derive(Debug)]
struct QueuedEntry {
    queue: QueueManager,
    owner: OwnerId,
}

#[derive(Debug)]
pub struct CleanupSupervisor {
    locks: LockRegistry,
    isolation: IsolationProvider,
    lock: Mutex<Option<LockHandle>>,
    instance: Mutex<Option<Instance>>,
    queued: Mutex<Option<QueuedEntry>>,
}

impl CleanupSupervisor {
    pub fn new(locks: LockRegistry, isolation: IsolationProvider) -> Self {
        Self {
            locks,
            isolation,
            lock: Mutex::new(None),
            instance: Mutex::new(None),
            queued: Mutex::new(None),
        }
    }

    /// Take ownership of `owner`'s entry in `queue`
    pub fn register_queue_entry(&self, queue: QueueManager, owner: OwnerId) {
        *self.queued.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(QueuedEntry { queue, owner });
    }

    /// Withdraw the registered queue entry now, once the run is admitted.
    ///
    /// Returns whether an entry was still queued. On failure the entry
    /// stays registered, so `finalize` retries it.
    pub fn leave_queue(&self) -> Result<bool> {
        let mut slot = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = slot.take() else {
            return Ok(false);
        };
        match entry.queue.remove(&entry.owner) {
            Ok(removed) => Ok(removed),
            Err(e) => {
                *slot = Some(entry);
                Err(e)
            }
        }
    }

    /// Take ownership of a freshly acquired lock
    pub fn register_lock(&self, handle: LockHandle) {
        let previous = self
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            self.release_lock(&previous);
        }
    }

    /// Take ownership of a freshly created instance
    pub fn register_instance(&self, instance: Instance) {
        let previous = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(instance);
        if let Some(previous) = previous {
            self.destroy_instance(&previous);
        }
    }

    /// Whether anything is still registered
    pub fn is_holding(&self) -> bool {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
            || self
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
            || self
                .instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    /// Leave the queue, destroy the instance, then release the lock. Safe
    /// to call any number of times, from any thread.
    pub fn finalize(&self) -> CleanupReport {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let instance = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner).take();

        let report = CleanupReport {
            queue_entry_removed: queued.as_ref().is_some_and(Self::remove_queue_entry),
            instance_destroyed: instance.as_ref().is_some_and(|i| self.destroy_instance(i)),
            lock_released: lock.as_ref().is_some_and(|l| self.release_lock(l)),
        };
        if report != CleanupReport::default() {
            debug!(?report, "run resources released");
        }
        report
    }

    /// Undo a failed admission attempt: destroy the instance and release
    /// the lock, but keep any queue entry so the run holds its place.
    pub fn abandon_attempt(&self) -> CleanupReport {
        let instance = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner).take();
        CleanupReport {
            queue_entry_removed: false,
            instance_destroyed: instance.as_ref().is_some_and(|i| self.destroy_instance(i)),
            lock_released: lock.as_ref().is_some_and(|l| self.release_lock(l)),
        }
    }

    fn remove_queue_entry(entry: &QueuedEntry) -> bool {
        match entry.queue.remove(&entry.owner) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(owner = %entry.owner, error = %e, "queue entry cleanup failed");
                false
            }
        }
    }

    fn destroy_instance(&self, instance: &Instance) -> bool {
        match self.isolation.destroy(instance) {
            Ok(was_live) => was_live,
            Err(e) => {
                warn!(id = %instance.id, path = %instance.path.display(), error = %e, "instance cleanup failed");
                false
            }
        }
    }

    fn release_lock(&self, handle: &LockHandle) -> bool {
        match self.locks.release(handle) {
            Ok(released) => released,
            Err(e) => {
                warn!(branch = handle.branch(), error = %e, "lock release failed");
                false
            }
        }
    }
}

impl Drop for CleanupSupervisor {
    fn drop(&mut self) {
        if self.is_holding() {
            warn!("run ended without explicit cleanup, finalizing on drop");
            self.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use tempfile::TempDir;

    use super::*;
    use crate::{
        lock::Acquisition,
        request::{OwnerId, Request},
        vcs::{GitCli, VersionControl},
    };

    fn fixture() -> (TempDir, LockRegistry, IsolationProvider) {
        let dir = TempDir::new().unwrap();
        let locks = LockRegistry::open(dir.path().join("locks")).unwrap();
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new("convoy-no-such-git", dir.path()));
        let isolation = IsolationProvider::new(
            vcs,
            dir.path().join("worktrees"),
            dir.path().join("instances.json"),
        );
        (dir, locks, isolation)
    }

    fn acquire(locks: &LockRegistry, branch: &str) -> LockHandle {
        match locks.try_acquire(branch, &OwnerId::new("run-a")).unwrap() {
            Acquisition::Acquired(handle) => handle,
            Acquisition::Busy { .. } => panic!("lock should be free"),
        }
    }

    #[test]
    fn test_finalize_runs_once() {
        let (_dir, locks, isolation) = fixture();
        let supervisor = CleanupSupervisor::new(locks.clone(), isolation);
        supervisor.register_lock(acquire(&locks, "main"));

        let first = supervisor.finalize();
        assert!(first.lock_released);
        assert!(!locks.is_held("main"));
        assert_eq!(supervisor.finalize(), CleanupReport::default());
    }

    #[test]
    fn test_nothing_registered_is_noop() {
        let (_dir, locks, isolation) = fixture();
        let supervisor = CleanupSupervisor::new(locks, isolation);
        assert!(!supervisor.is_holding());
        assert_eq!(supervisor.finalize(), CleanupReport::default());
    }

    #[test]
    fn test_drop_releases_lock() {
        let (_dir, locks, isolation) = fixture();
        {
            let supervisor = CleanupSupervisor::new(locks.clone(), isolation);
            supervisor.register_lock(acquire(&locks, "main"));
        }
        assert!(!locks.is_held("main"));
    }

    fn queued(dir: &TempDir, owner: &OwnerId) -> QueueManager {
        let queue = QueueManager::open(dir.path().join("queue.json"));
        let request = Request::new("plan.yaml", "main").unwrap();
        queue.enqueue(&request, owner).unwrap();
        queue
    }

    #[test]
    fn test_drop_withdraws_queue_entry() {
        let (dir, locks, isolation) = fixture();
        let owner = OwnerId::new("run-waiting");
        let queue = queued(&dir, &owner);
        {
            let supervisor = CleanupSupervisor::new(locks, isolation);
            supervisor.register_queue_entry(queue.clone(), owner.clone());
            assert!(supervisor.is_holding());
        }
        assert_eq!(queue.size().unwrap(), 0);
    }

    #[test]
    fn test_leave_queue_hands_nothing_to_finalize() {
        let (dir, locks, isolation) = fixture();
        let owner = OwnerId::new("run-admitted");
        let queue = queued(&dir, &owner);
        let supervisor = CleanupSupervisor::new(locks, isolation);
        supervisor.register_queue_entry(queue.clone(), owner);

        assert!(supervisor.leave_queue().unwrap());
        assert_eq!(queue.size().unwrap(), 0);
        assert!(!supervisor.leave_queue().unwrap());
        assert_eq!(supervisor.finalize(), CleanupReport::default());
    }

    #[test]
    fn test_abandon_attempt_keeps_queue_place() {
        let (dir, locks, isolation) = fixture();
        let owner = OwnerId::new("run-retrying");
        let queue = queued(&dir, &owner);
        let supervisor = CleanupSupervisor::new(locks.clone(), isolation);
        supervisor.register_queue_entry(queue.clone(), owner.clone());
        supervisor.register_lock(acquire(&locks, "main"));

        let report = supervisor.abandon_attempt();
        assert!(report.lock_released);
        assert!(!report.queue_entry_removed);
        assert!(!locks.is_held("main"));
        assert_eq!(queue.position_of(&owner).unwrap(), Some(1));

        assert!(supervisor.finalize().queue_entry_removed);
        assert_eq!(queue.size().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_finalize_releases_exactly_once() {
        let (_dir, locks, isolation) = fixture();
        let supervisor = Arc::new(CleanupSupervisor::new(locks.clone(), isolation));
        supervisor.register_lock(acquire(&locks, "main"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let supervisor = Arc::clone(&supervisor);
                thread::spawn(move || supervisor.finalize().lock_released)
            })
            .collect();
        let released = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r)
            .count();

        assert_eq!(released, 1);
        assert!(!locks.is_held("main"));
    }
}
