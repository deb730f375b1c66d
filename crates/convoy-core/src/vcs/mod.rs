//! Version-control seam.
//!
//! The coordinator only needs a handful of operations from the underlying
//! tool; [`VersionControl`] names them so tests can substitute a fake and the
//! coordinator never depends on tool internals.

use std::path::Path;

use crate::Result;

pub mod git;
pub mod version;

pub use git::GitCli;
pub use version::VcsVersion;

/// Operations the coordinator needs from the version-control tool
pub trait VersionControl: Send + Sync + std::fmt::Debug {
    /// Installed tool version; `VcsCommand { is_not_found: true }` when absent
    fn version(&self) -> Result<VcsVersion>;

    /// Whether a local branch exists
    fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Materialize a new checkout at `path` on a new `work_branch` forked
    /// from `base_branch`
    fn add_worktree(&self, path: &Path, work_branch: &str, base_branch: &str) -> Result<()>;

    /// Remove the checkout at `path` (tolerates partially created ones)
    fn remove_worktree(&self, path: &Path) -> Result<()>;

    /// Drop bookkeeping for checkouts whose directories are gone
    fn prune_worktrees(&self) -> Result<()>;

    /// Whether `branch` has commits that `base` does not
    fn has_commits_beyond(&self, branch: &str, base: &str) -> Result<bool>;

    /// Delete a local branch
    fn delete_branch(&self, branch: &str) -> Result<()>;
}
