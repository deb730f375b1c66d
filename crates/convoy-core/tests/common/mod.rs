//! Common test utilities and relaxed clippy settings for convoy-core integration tests
//!
//! Every `Coordinator` built from a [`Fixture`] shares the same on-disk state
//! directory, so several coordinators stand in for independent processes.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unreachable,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    clippy::significant_drop_tightening,
    clippy::must_use_candidate
)]

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use convoy_core::{
    vcs::{VcsVersion, VersionControl},
    Classification, ClassificationObserver, Config, Coordinator, Error, ExecutionContext,
    ExecutionEngine, OwnerId, Result,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

// ═══════════════════════════════════════════════════════════════════════════
// FAKE VERSION CONTROL
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory stand-in for git; worktrees are plain directories.
#[derive(Debug)]
pub struct FakeVcs {
    version: &'static str,
    installed: bool,
    fail_add: AtomicBool,
    branches: Mutex<HashSet<String>>,
    committed: Mutex<HashSet<String>>,
    worktrees: Mutex<HashSet<PathBuf>>,
}

impl FakeVcs {
    /// Fake whose version supports worktrees when `isolation` is true
    pub fn new(isolation: bool, branches: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            version: if isolation {
                "git version 2.43.0"
            } else {
                "git version 2.4.11"
            },
            installed: true,
            fail_add: AtomicBool::new(false),
            branches: Mutex::new(branches.iter().map(ToString::to_string).collect()),
            committed: Mutex::new(HashSet::new()),
            worktrees: Mutex::new(HashSet::new()),
        })
    }

    /// Fake that behaves like a missing binary
    pub fn not_installed() -> Arc<Self> {
        Arc::new(Self {
            version: "",
            installed: false,
            fail_add: AtomicBool::new(false),
            branches: Mutex::new(HashSet::new()),
            committed: Mutex::new(HashSet::new()),
            worktrees: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_worktree_creation(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn live_worktrees(&self) -> Vec<PathBuf> {
        self.worktrees.lock().unwrap().iter().cloned().collect()
    }

    /// Record a commit on `branch` that its base does not have
    pub fn commit_on(&self, branch: &str) {
        self.committed.lock().unwrap().insert(branch.to_string());
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.branches.lock().unwrap().iter().cloned().collect()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.branches.lock().unwrap().contains(branch)
    }

    fn missing() -> Error {
        Error::vcs_command("run git", "No such file or directory", true)
    }
}

impl VersionControl for FakeVcs {
    fn version(&self) -> Result<VcsVersion> {
        if !self.installed {
            return Err(Self::missing());
        }
        VcsVersion::parse(self.version)
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        if !self.installed {
            return Err(Self::missing());
        }
        Ok(self.has_branch(branch))
    }

    fn add_worktree(&self, path: &Path, work_branch: &str, base_branch: &str) -> Result<()> {
        // Mimic git: the directory may exist before the checkout fails.
        fs::create_dir_all(path).map_err(|e| Error::io(path, &e))?;
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(Error::vcs_command(
                "add worktree",
                format!("fatal: '{base_branch}' is already checked out"),
                false,
            ));
        }
        self.branches.lock().unwrap().insert(work_branch.to_string());
        self.worktrees.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        if !self.worktrees.lock().unwrap().remove(path) {
            return Err(Error::vcs_command(
                "remove worktree",
                format!("fatal: '{}' is not a working tree", path.display()),
                false,
            ));
        }
        fs::remove_dir_all(path).map_err(|e| Error::io(path, &e))
    }

    fn prune_worktrees(&self) -> Result<()> {
        self.worktrees.lock().unwrap().retain(|p| p.exists());
        Ok(())
    }

    fn has_commits_beyond(&self, branch: &str, _base: &str) -> Result<bool> {
        if !self.installed {
            return Err(Self::missing());
        }
        Ok(self.committed.lock().unwrap().contains(branch))
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.branches.lock().unwrap().remove(branch);
        self.committed.lock().unwrap().remove(branch);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINES AND OBSERVERS
// ═══════════════════════════════════════════════════════════════════════════

/// Engine that reports each start and then blocks until released.
pub struct GatedEngine {
    started: mpsc::UnboundedSender<ExecutionContext>,
    release: Semaphore,
    outcome: Mutex<Option<Error>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ExecutionContext>) {
        let (started, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            started,
            release: Semaphore::new(0),
            outcome: Mutex::new(None),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        (engine, rx)
    }

    /// Let `n` blocked (or future) executions finish
    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    /// Make every execution fail with `error`
    pub fn fail_with(&self, error: Error) {
        *self.outcome.lock().unwrap() = Some(error);
    }

    /// Highest number of simultaneous executions observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionEngine for GatedEngine {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _ = self.started.send(ctx.clone());

        let permit = self.release.acquire().await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        permit.map_err(|e| Error::execution_failed(e.to_string(), None))?.forget();

        match self.outcome.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Engine that finishes immediately
pub struct InstantEngine;

#[async_trait]
impl ExecutionEngine for InstantEngine {
    async fn execute(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }
}

/// Records every classification it is shown
#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<(OwnerId, Classification)>>,
}

impl RecordingObserver {
    pub fn classifications(&self) -> Vec<Classification> {
        self.seen.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn queued_positions(&self) -> Vec<usize> {
        self.classifications()
            .into_iter()
            .filter_map(|c| match c {
                Classification::Queued(n) => Some(n),
                _ => None,
            })
            .collect()
    }
}

impl ClassificationObserver for RecordingObserver {
    fn on_classified(&self, owner: &OwnerId, classification: &Classification) {
        self.seen
            .lock()
            .unwrap()
            .push((owner.clone(), classification.clone()));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURE
// ═══════════════════════════════════════════════════════════════════════════

/// A scratch repository directory plus the fake tool behind it
pub struct Fixture {
    pub dir: TempDir,
    pub repo: PathBuf,
    pub vcs: Arc<FakeVcs>,
}

impl Fixture {
    pub fn new(vcs: Arc<FakeVcs>) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        Self { dir, repo, vcs }
    }

    pub fn config() -> Config {
        Config {
            poll_interval_ms: 10,
            worktree_dir: "../worktrees".to_string(),
            ..Config::default()
        }
    }

    /// A fresh coordinator over the shared state, like a separate process
    pub fn coordinator(&self) -> Coordinator {
        Coordinator::with_vcs(&self.repo, Self::config(), self.vcs.clone()).unwrap()
    }

    pub fn coordinator_with(&self, config: Config) -> Coordinator {
        Coordinator::with_vcs(&self.repo, config, self.vcs.clone()).unwrap()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.repo.join(".convoy")
    }

    /// Number of lock files currently on disk
    pub fn lock_count(&self) -> usize {
        fs::read_dir(self.state_dir().join("locks"))
            .map(|entries| entries.filter_map(std::result::Result::ok).count())
            .unwrap_or(0)
    }

    /// Directories left under the worktree root
    pub fn worktree_dirs(&self) -> usize {
        fs::read_dir(self.dir.path().join("worktrees"))
            .map(|entries| entries.filter_map(std::result::Result::ok).count())
            .unwrap_or(0)
    }
}

/// Wait for the next engine start, failing the test after a generous timeout
pub async fn next_start(rx: &mut mpsc::UnboundedReceiver<ExecutionContext>) -> ExecutionContext {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("engine never started")
        .expect("engine channel closed")
}

/// Poll `check` until it holds, failing the test after a generous timeout
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
