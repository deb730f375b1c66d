//! The coordinator: classifies each request and drives it to completion.
//!
//! ```text
//! CLASSIFYING ──▶ DIRECT ───┐
//!      ▲     ├──▶ ISOLATED ─┼──▶ RUNNING ──▶ CLEANING_UP ──▶ DONE
//!      │     └──▶ DEFERRED  │
//!      └──────────────┘     └─ (any early exit also goes to CLEANING_UP)
//! ```
//!
//! - **DIRECT**: the branch lock was free. Runs in the primary working copy.
//! - **ISOLATED**: the branch is locked by another run, so a fresh worktree
//!   is created on its own work branch. The work branch is locked too, so
//!   every live run shows up as a lock holder.
//! - **DEFERRED**: the branch is locked and isolation is unavailable or
//!   failed. The request is queued and reclassified from scratch after each
//!   wait.
//!
//! Locks, instances and the queue are all filesystem state, so coordinators
//! in unrelated processes cooperate without sharing memory.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod classification;
mod state;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info, warn};

pub use self::{
    classification::{Classification, ClassificationObserver, RunReport},
    state::RunState,
};
use crate::{
    cleanup::CleanupSupervisor,
    config::{Config, WaitPolicy},
    engine::{ExecutionContext, ExecutionEngine},
    isolation::{BranchNaming, Instance, IsolationProvider},
    lifecycle::LifecycleState,
    lock::{Acquisition, LockRegistry},
    queue::QueueManager,
    request::{OwnerId, Request},
    shutdown::{ShutdownCoordinator, ShutdownListener},
    status::{self, StaleFinding, StatusReport},
    vcs::{GitCli, VersionControl},
    Error, Result,
};

/// One classification attempt
enum Attempt {
    Direct,
    Isolated(Instance),
    /// Carries the recoverable error that forced the deferral
    Deferred(Error),
}

/// Where an admitted run executes
struct Admission {
    classification: Classification,
    workdir: PathBuf,
    branch: String,
}

/// Drives requests against one repository
pub struct Coordinator {
    repo_root: PathBuf,
    config: Config,
    vcs: Arc<dyn VersionControl>,
    locks: LockRegistry,
    isolation: IsolationProvider,
    queue: QueueManager,
    shutdown: ShutdownCoordinator,
    observer: Option<Arc<dyn ClassificationObserver>>,
}

impl Coordinator {
    /// Coordinator for the repository at `repo_root` using the configured
    /// git binary.
    pub fn open(repo_root: &Path, config: Config) -> Result<Self> {
        let vcs = Arc::new(GitCli::new(config.vcs_binary.clone(), repo_root));
        Self::with_vcs(repo_root, config, vcs)
    }

    /// Coordinator over an explicit version-control implementation
    pub fn with_vcs(
        repo_root: &Path,
        config: Config,
        vcs: Arc<dyn VersionControl>,
    ) -> Result<Self> {
        config.validate()?;
        let repo_root = fs::canonicalize(repo_root).map_err(|e| Error::io(repo_root, &e))?;
        let state_dir = config.state_path(&repo_root);

        let locks = LockRegistry::open(state_dir.join("locks"))?;
        let queue = QueueManager::open(state_dir.join("queue.json"));
        let isolation = IsolationProvider::new(
            Arc::clone(&vcs),
            config.worktree_path(&repo_root),
            state_dir.join("instances.json"),
        );

        debug!(repo = %repo_root.display(), state = %state_dir.display(), "coordinator opened");
        Ok(Self {
            repo_root,
            config,
            vcs,
            locks,
            isolation,
            queue,
            shutdown: ShutdownCoordinator::new(),
            observer: None,
        })
    }

    /// Receive every classification as it happens
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ClassificationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the work-branch naming scheme for isolated runs
    #[must_use]
    pub fn with_naming(mut self, naming: Arc<dyn BranchNaming>) -> Self {
        self.isolation = self.isolation.with_naming(naming);
        self
    }

    /// Share an existing shutdown coordinator (e.g. one fed by signals)
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownCoordinator) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle for terminating in-flight runs
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub const fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub const fn isolation(&self) -> &IsolationProvider {
        &self.isolation
    }

    /// Classify the request for `branch` and run it to completion.
    ///
    /// Blocks while deferred. Returns the classification the run executed
    /// under; engine failures come back unchanged after cleanup.
    pub async fn classify_and_run(
        &self,
        descriptor: impl Into<PathBuf> + Send,
        branch: impl Into<String> + Send,
        engine: &dyn ExecutionEngine,
    ) -> Result<RunReport> {
        let request = Request::new(descriptor, branch)?;
        self.run(&request, engine).await
    }

    /// Run an already validated request.
    ///
    /// Whatever happens, no lock, instance or queue entry of this run
    /// survives the call.
    pub async fn run(&self, request: &Request, engine: &dyn ExecutionEngine) -> Result<RunReport> {
        let owner = OwnerId::generate();
        let mut tracker = RunTracker::new(&owner, request.branch());
        info!(
            branch = request.branch(),
            owner = %owner,
            descriptor = %request.descriptor().display(),
            "run started"
        );

        let supervisor = CleanupSupervisor::new(self.locks.clone(), self.isolation.clone());
        let mut shutdown = self.shutdown.subscribe();

        let result = self
            .drive(request, &owner, engine, &supervisor, &mut shutdown, &mut tracker)
            .await;

        tracker.advance(RunState::CleaningUp);
        let released = supervisor.finalize();
        if released.queue_entry_removed {
            debug!(owner = %owner, "left queue during cleanup");
        }
        tracker.advance(RunState::Done);

        match &result {
            Ok(report) => info!(owner = %owner, outcome = %report.classification, "run finished"),
            Err(e) => info!(owner = %owner, error = %e, "run ended with error"),
        }
        result
    }

    async fn drive(
        &self,
        request: &Request,
        owner: &OwnerId,
        engine: &dyn ExecutionEngine,
        supervisor: &CleanupSupervisor,
        shutdown: &mut ShutdownListener,
        tracker: &mut RunTracker<'_>,
    ) -> Result<RunReport> {
        self.ensure_branch_exists(request.branch())?;

        let mut deferrals = Vec::new();
        let mut stale_reported = false;

        let admission = loop {
            match self.classify(request, owner, supervisor, &mut stale_reported)? {
                Attempt::Direct => {
                    tracker.advance(RunState::Direct);
                    break Admission {
                        classification: Classification::NoConflict,
                        workdir: self.repo_root.clone(),
                        branch: request.branch().to_string(),
                    };
                }
                Attempt::Isolated(instance) => {
                    tracker.advance(RunState::Isolated);
                    break Admission {
                        classification: Classification::Worktree(instance.path.clone()),
                        workdir: instance.path,
                        branch: instance.work_branch,
                    };
                }
                Attempt::Deferred(reason) => {
                    tracker.advance(RunState::Deferred);
                    let position = self.queue.enqueue(request, owner)?;
                    supervisor.register_queue_entry(self.queue.clone(), owner.clone());
                    if deferrals.last() == Some(&position) {
                        debug!(owner = %owner, position, reason = %reason, "still deferred");
                    } else {
                        info!(
                            branch = request.branch(),
                            owner = %owner,
                            position,
                            reason = %reason,
                            "request deferred"
                        );
                        deferrals.push(position);
                        self.notify(owner, &Classification::Queued(position));
                    }

                    self.wait_turn(owner, shutdown).await?;
                    tracker.advance(RunState::Classifying);
                }
            }
        };

        if !deferrals.is_empty() {
            self.leave_queue(owner, supervisor)?;
        }
        self.notify(owner, &admission.classification);

        tracker.advance(RunState::Running);
        let ctx = ExecutionContext {
            request: request.clone(),
            owner_id: owner.clone(),
            workdir: admission.workdir,
            branch: admission.branch,
            classification: admission.classification.clone(),
        };

        tokio::select! {
            biased;
            signal = shutdown.triggered() => {
                warn!(owner = %owner, ?signal, "run terminated while running");
                return Err(Error::Terminated);
            }
            result = engine.execute(&ctx) => result?,
        }

        Ok(RunReport {
            owner_id: owner.clone(),
            classification: admission.classification,
            deferrals,
        })
    }

    /// Decide how the request may proceed right now. Recoverable failures
    /// become `Deferred`; anything acquired is handed to `supervisor`.
    fn classify(
        &self,
        request: &Request,
        owner: &OwnerId,
        supervisor: &CleanupSupervisor,
        stale_reported: &mut bool,
    ) -> Result<Attempt> {
        let branch = request.branch();

        let holder = match self.locks.try_acquire(branch, owner)? {
            Acquisition::Acquired(handle) => {
                supervisor.register_lock(handle);
                return Ok(Attempt::Direct);
            }
            Acquisition::Busy { holder } => holder,
        };

        if let Some(stale) = holder.as_ref().filter(|h| h.is_stale()) {
            if !*stale_reported {
                let report = Error::StaleLockDetected {
                    branch: branch.to_string(),
                    owner_id: stale.owner_id.to_string(),
                    pid: stale.pid,
                };
                warn!(branch, "{report}");
                *stale_reported = true;
            }
        }

        let busy = Error::LockBusy {
            branch: branch.to_string(),
            holder: holder.map_or_else(|| "another run".to_string(), |h| h.owner_id.to_string()),
        };
        debug!(owner = %owner, "{busy}");

        if !self.isolation.capabilities_available() {
            return Ok(Attempt::Deferred(Error::IsolationUnavailable {
                reason: busy.to_string(),
            }));
        }

        let instance = match self.isolation.create(branch, owner) {
            Ok(instance) => instance,
            Err(e) if e.is_recoverable() => return Ok(Attempt::Deferred(e)),
            Err(e) => return Err(e),
        };
        supervisor.register_instance(instance.clone());

        match self.locks.try_acquire(&instance.work_branch, owner)? {
            Acquisition::Acquired(handle) => supervisor.register_lock(handle),
            Acquisition::Busy { .. } => {
                supervisor.abandon_attempt();
                return Ok(Attempt::Deferred(Error::IsolationCreationFailed {
                    branch: branch.to_string(),
                    reason: format!("work branch '{}' is already locked", instance.work_branch),
                }));
            }
        }

        Ok(Attempt::Isolated(instance))
    }

    /// Sleep until this deferred request should reclassify.
    async fn wait_turn(&self, owner: &OwnerId, shutdown: &mut ShutdownListener) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                signal = shutdown.triggered() => {
                    info!(owner = %owner, ?signal, "run terminated while queued");
                    return Err(Error::Terminated);
                }
                () = tokio::time::sleep(self.config.poll_interval()) => {}
            }

            match self.config.wait_policy {
                WaitPolicy::Repoll => return Ok(()),
                WaitPolicy::Front => {
                    if self.queue.position_of(owner)?.is_none() || self.queue.is_front(owner)? {
                        return Ok(());
                    }
                    debug!(owner = %owner, queued = self.queue.size()?, "waiting for front of queue");
                }
            }
        }
    }

    /// Drop this run's queue entry once it has been admitted.
    fn leave_queue(&self, owner: &OwnerId, supervisor: &CleanupSupervisor) -> Result<()> {
        if self.config.wait_policy == WaitPolicy::Front && self.queue.position_of(owner)? == Some(1) {
            if let Some(entry) = self.queue.dequeue_next()? {
                debug!(owner = %entry.owner_id, "dequeued front entry");
            }
        }
        supervisor.leave_queue().map(|_| ())
    }

    fn ensure_branch_exists(&self, branch: &str) -> Result<()> {
        match self.vcs.branch_exists(branch) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::BranchNotFound(branch.to_string())),
            Err(Error::VcsCommand {
                is_not_found: true,
                ..
            }) => {
                warn!(branch, "version-control tool not found, skipping branch check");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn notify(&self, owner: &OwnerId, classification: &Classification) {
        if let Some(observer) = &self.observer {
            observer.on_classified(owner, classification);
        }
    }

    /// Queue, lock holders and isolation instances as currently on disk
    pub fn status(&self) -> Result<StatusReport> {
        status::collect(&self.locks, &self.queue, &self.isolation)
    }

    /// Report state left behind by dead processes.
    ///
    /// Nothing is reclaimed; stale locks need `convoy unlock`.
    pub fn recover(&self) -> Result<Vec<StaleFinding>> {
        let findings = self.status()?.stale_findings();
        for finding in &findings {
            warn!("{finding}");
        }
        if findings.is_empty() {
            debug!("recovery scan found no stale state");
        }
        Ok(findings)
    }
}

/// Tracks and logs one run's lifecycle transitions
struct RunTracker<'a> {
    owner: &'a OwnerId,
    branch: &'a str,
    state: RunState,
}

impl<'a> RunTracker<'a> {
    const fn new(owner: &'a OwnerId, branch: &'a str) -> Self {
        Self {
            owner,
            branch,
            state: RunState::Classifying,
        }
    }

    fn advance(&mut self, next: RunState) {
        if self.state.can_transition_to(next) {
            info!(owner = %self.owner, branch = self.branch, from = %self.state, to = %next, "run state");
        } else {
            warn!(owner = %self.owner, branch = self.branch, from = %self.state, to = %next, "unexpected run state transition");
        }
        self.state = next;
    }
}
