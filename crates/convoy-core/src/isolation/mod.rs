//! Isolation provider: extra working copies for parallel runs.
//!
//! Each instance is a git worktree on its own work branch, forked from the
//! requested branch, at `<worktree_dir>/<sanitized-branch>-<token>`. Every
//! instance is recorded in the shared index before its directory exists,
//! so a crash at any point leaves a trace the recovery scan can report.
//!
//! # Guarantees
//!
//! - **Disjoint Paths**: live instance paths are pairwise distinct
//! - **Partial-safe Destroy**: `destroy` handles instances whose checkout
//!   never completed
//! - **Idempotent Destroy**: destroying twice is a no-op the second time
//! - **No Lost Work**: a work branch carrying commits outlives its instance

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod index;

use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use self::index::InstanceIndex;
use crate::{
    lock::{current_hostname, is_owner_stale, sanitize_branch},
    request::OwnerId,
    vcs::VersionControl,
    Error, Result,
};

/// A materialized, independent working copy bound to one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Uniqueness token, also used in the directory and work-branch names
    pub id: String,
    /// Branch the run asked for
    pub branch: String,
    /// Branch actually checked out in the instance
    pub work_branch: String,
    /// Absolute checkout path
    pub path: PathBuf,
    pub owner_id: OwnerId,
    pub pid: u32,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Whether the creating process is known to be dead
    #[must_use]
    pub fn is_stale(&self) -> bool {
        is_owner_stale(&self.hostname, self.pid)
    }
}

/// Naming scheme for the branch an isolated run works on.
///
/// git refuses to check the same branch out twice, so an isolated run
/// always gets its own branch forked from the requested one.
pub trait BranchNaming: Send + Sync + Debug {
    fn work_branch(&self, branch: &str, token: &str) -> String;
}

/// `<branch>-convoy-<token>`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuffixNaming;

impl BranchNaming for SuffixNaming {
    fn work_branch(&self, branch: &str, token: &str) -> String {
        format!("{branch}-convoy-{token}")
    }
}

/// Creates and destroys isolation instances
#[derive(Debug, Clone)]
pub struct IsolationProvider {
    vcs: Arc<dyn VersionControl>,
    naming: Arc<dyn BranchNaming>,
    root: PathBuf,
    index: InstanceIndex,
    capability: Arc<OnceLock<bool>>,
}

impl IsolationProvider {
    /// Provider placing checkouts under `root` and tracking them in
    /// `index_path`.
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        root: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vcs,
            naming: Arc::new(SuffixNaming),
            root: root.into(),
            index: InstanceIndex::open(index_path),
            capability: Arc::new(OnceLock::new()),
        }
    }

    /// Replace the default work-branch naming scheme
    #[must_use]
    pub fn with_naming(mut self, naming: Arc<dyn BranchNaming>) -> Self {
        self.naming = naming;
        self
    }

    /// Parent directory of every checkout
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the installed tool supports multiple checkouts.
    ///
    /// Checked once per provider; a missing tool counts as unsupported.
    pub fn capabilities_available(&self) -> bool {
        *self.capability.get_or_init(|| match self.vcs.version() {
            Ok(version) => {
                let supported = version.supports_isolation();
                debug!(%version, supported, "isolation capability checked");
                supported
            }
            Err(e) => {
                debug!(error = %e, "isolation capability check failed");
                false
            }
        })
    }

    /// Materialize a new instance for `branch` owned by `owner`.
    ///
    /// Every failure after the capability check is reported as
    /// `IsolationCreationFailed` with any partial state already torn down.
    pub fn create(&self, branch: &str, owner: &OwnerId) -> Result<Instance> {
        if !self.capabilities_available() {
            return Err(Error::IsolationUnavailable {
                reason: "version-control tool does not support worktrees".to_string(),
            });
        }

        let creation_failed = |reason: String| Error::IsolationCreationFailed {
            branch: branch.to_string(),
            reason,
        };

        match self.vcs.branch_exists(branch) {
            Ok(true) => {}
            Ok(false) => return Err(creation_failed(format!("branch '{branch}' does not exist"))),
            Err(e) => return Err(creation_failed(e.to_string())),
        }

        fs::create_dir_all(&self.root)
            .map_err(|e| creation_failed(format!("{}: {e}", self.root.display())))?;
        let root = fs::canonicalize(&self.root)
            .map_err(|e| creation_failed(format!("{}: {e}", self.root.display())))?;

        let token = new_token();
        let path = root.join(format!("{}-{token}", sanitize_branch(branch)));
        if path.exists() {
            return Err(creation_failed(format!(
                "target path {} already exists",
                path.display()
            )));
        }

        let instance = Instance {
            work_branch: self.naming.work_branch(branch, &token),
            id: token,
            branch: branch.to_string(),
            path,
            owner_id: owner.clone(),
            pid: std::process::id(),
            hostname: current_hostname(),
            created_at: Utc::now(),
        };

        self.index.insert(&instance)?;

        if let Err(e) =
            self.vcs
                .add_worktree(&instance.path, &instance.work_branch, &instance.branch)
        {
            warn!(branch, path = %instance.path.display(), error = %e, "worktree creation failed");
            if let Err(cleanup) = self.destroy(&instance) {
                warn!(id = %instance.id, error = %cleanup, "partial instance cleanup failed");
            }
            return Err(creation_failed(e.to_string()));
        }

        info!(
            branch,
            work_branch = %instance.work_branch,
            path = %instance.path.display(),
            owner = %owner,
            "isolation instance created"
        );
        Ok(instance)
    }

    /// Tear an instance down. Returns whether it was still registered.
    ///
    /// Each step tolerates state that is already gone; only index I/O
    /// failures are returned.
    pub fn destroy(&self, instance: &Instance) -> Result<bool> {
        let path = &instance.path;

        if path.exists() {
            if let Err(e) = self.vcs.remove_worktree(path) {
                debug!(path = %path.display(), error = %e, "worktree remove failed");
            }
        }

        if let Err(e) = self.vcs.prune_worktrees() {
            debug!(error = %e, "worktree prune failed");
        }

        if path.exists() {
            if let Err(e) = fs::remove_dir_all(path) {
                warn!(path = %path.display(), error = %e, "could not remove instance directory");
            }
        }

        self.discard_unused_work_branch(instance);

        let was_live = self.index.remove(&instance.id)?;
        if was_live {
            info!(id = %instance.id, path = %path.display(), "isolation instance destroyed");
        }
        Ok(was_live)
    }

    /// Delete the work branch only when it adds nothing to the requested
    /// branch. A branch the run committed to is left for merging.
    fn discard_unused_work_branch(&self, instance: &Instance) {
        let work_branch = &instance.work_branch;
        match self.vcs.branch_exists(work_branch) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                debug!(work_branch = %work_branch, error = %e, "work branch check failed");
                return;
            }
        }

        match self.vcs.has_commits_beyond(work_branch, &instance.branch) {
            Ok(false) => {
                if let Err(e) = self.vcs.delete_branch(work_branch) {
                    warn!(work_branch = %work_branch, error = %e, "could not delete work branch");
                }
            }
            Ok(true) => info!(
                work_branch = %work_branch,
                branch = %instance.branch,
                "work branch has new commits, kept for merging"
            ),
            Err(e) => warn!(
                work_branch = %work_branch,
                error = %e,
                "could not compare work branch, kept it"
            ),
        }
    }

    /// Every registered instance, including ones left by dead processes
    pub fn instances(&self) -> Result<Vec<Instance>> {
        self.index.list()
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::vcs::VcsVersion;

    /// Directory-creating stand-in for git
    #[derive(Debug, Default)]
    struct DirVcs {
        too_old: bool,
        fail_add: bool,
        branches: Mutex<HashSet<String>>,
        committed: Mutex<HashSet<String>>,
    }

    impl DirVcs {
        fn with_branch(branch: &str) -> Self {
            let vcs = Self::default();
            vcs.branches.lock().unwrap().insert(branch.to_string());
            vcs
        }
    }

    impl VersionControl for DirVcs {
        fn version(&self) -> Result<VcsVersion> {
            VcsVersion::parse(if self.too_old { "git version 2.4.0" } else { "git version 2.43.0" })
        }

        fn branch_exists(&self, branch: &str) -> Result<bool> {
            Ok(self.branches.lock().unwrap().contains(branch))
        }

        fn add_worktree(&self, path: &Path, work_branch: &str, _base: &str) -> Result<()> {
            fs::create_dir_all(path).map_err(|e| Error::io(path, &e))?;
            if self.fail_add {
                return Err(Error::vcs_command("add worktree", "already checked out", false));
            }
            self.branches.lock().unwrap().insert(work_branch.to_string());
            Ok(())
        }

        fn remove_worktree(&self, path: &Path) -> Result<()> {
            fs::remove_dir_all(path).map_err(|e| Error::io(path, &e))
        }

        fn prune_worktrees(&self) -> Result<()> {
            Ok(())
        }

        fn has_commits_beyond(&self, branch: &str, _base: &str) -> Result<bool> {
            Ok(self.committed.lock().unwrap().contains(branch))
        }

        fn delete_branch(&self, branch: &str) -> Result<()> {
            self.branches.lock().unwrap().remove(branch);
            Ok(())
        }
    }

    fn provider(dir: &TempDir, vcs: DirVcs) -> (Arc<DirVcs>, IsolationProvider) {
        let vcs = Arc::new(vcs);
        let provider = IsolationProvider::new(
            Arc::clone(&vcs) as Arc<dyn VersionControl>,
            dir.path().join("worktrees"),
            dir.path().join("instances.json"),
        );
        (vcs, provider)
    }

    #[test]
    fn test_create_and_destroy() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (vcs, provider) = provider(&dir, DirVcs::with_branch("feature/x"));

        let instance = provider.create("feature/x", &OwnerId::new("run-a"))?;
        assert!(instance.path.is_absolute());
        assert!(instance.path.exists());
        assert!(instance.work_branch.starts_with("feature/x-convoy-"));
        assert_eq!(provider.instances()?, vec![instance.clone()]);

        assert!(provider.destroy(&instance)?);
        assert!(!instance.path.exists());
        assert!(!vcs.branch_exists(&instance.work_branch)?);
        assert!(provider.instances()?.is_empty());

        assert!(!provider.destroy(&instance)?);
        Ok(())
    }

    #[test]
    fn test_destroy_keeps_work_branch_with_commits() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (vcs, provider) = provider(&dir, DirVcs::with_branch("main"));

        let instance = provider.create("main", &OwnerId::new("run-a"))?;
        vcs.committed
            .lock()
            .unwrap()
            .insert(instance.work_branch.clone());

        assert!(provider.destroy(&instance)?);
        assert!(!instance.path.exists());
        assert!(provider.instances()?.is_empty());
        assert!(vcs.branch_exists(&instance.work_branch)?);
        Ok(())
    }

    #[test]
    fn test_instance_paths_are_distinct() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (_vcs, provider) = provider(&dir, DirVcs::with_branch("main"));

        let paths: HashSet<_> = (0..5)
            .map(|i| provider.create("main", &OwnerId::new(format!("run-{i}"))))
            .map(|r| r.map(|instance| instance.path))
            .collect::<Result<_>>()?;
        assert_eq!(paths.len(), 5);
        Ok(())
    }

    #[test]
    fn test_old_tool_reports_unavailable() {
        let dir = TempDir::new().unwrap();
        let vcs = DirVcs {
            too_old: true,
            ..DirVcs::with_branch("main")
        };
        let (_vcs, provider) = provider(&dir, vcs);

        assert!(!provider.capabilities_available());
        assert!(matches!(
            provider.create("main", &OwnerId::new("run-a")),
            Err(Error::IsolationUnavailable { .. })
        ));
    }

    #[test]
    fn test_missing_branch_fails_creation() {
        let dir = TempDir::new().unwrap();
        let (_vcs, provider) = provider(&dir, DirVcs::default());

        assert!(matches!(
            provider.create("ghost", &OwnerId::new("run-a")),
            Err(Error::IsolationCreationFailed { .. })
        ));
    }

    #[test]
    fn test_failed_checkout_leaves_nothing_behind() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let vcs = DirVcs {
            fail_add: true,
            ..DirVcs::with_branch("main")
        };
        let (_vcs, provider) = provider(&dir, vcs);

        let err = provider.create("main", &OwnerId::new("run-a"));
        assert!(matches!(err, Err(Error::IsolationCreationFailed { .. })));
        assert!(provider.instances()?.is_empty());
        let leftovers = fs::read_dir(dir.path().join("worktrees")).unwrap().count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn test_custom_naming() -> Result<()> {
        #[derive(Debug)]
        struct Prefixed;
        impl BranchNaming for Prefixed {
            fn work_branch(&self, branch: &str, token: &str) -> String {
                format!("parallel/{token}/{branch}")
            }
        }

        let dir = TempDir::new().unwrap();
        let (_vcs, provider) = provider(&dir, DirVcs::with_branch("main"));
        let provider = provider.with_naming(Arc::new(Prefixed));

        let instance = provider.create("main", &OwnerId::new("run-a"))?;
        assert_eq!(instance.work_branch, format!("parallel/{}/main", instance.id));
        Ok(())
    }
}
