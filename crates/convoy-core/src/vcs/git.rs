//! `git` command-line adapter

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use tracing::debug;

use super::{VcsVersion, VersionControl};
use crate::{Error, Result};

/// Runs `git -C <repo_root> ...` for every operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    binary: String,
    repo_root: PathBuf,
}

impl GitCli {
    /// Adapter for the repository at `repo_root` using `binary` (usually `git`)
    #[must_use]
    pub fn new(binary: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            repo_root: repo_root.into(),
        }
    }

    /// Repository this adapter operates on
    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Whether the binary can be found on `PATH`
    #[must_use]
    pub fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    fn run(&self, operation: &str, args: &[&std::ffi::OsStr]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "running git");
        Command::new(&self.binary)
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(|e| {
                Error::vcs_command(operation, e.to_string(), e.kind() == ErrorKind::NotFound)
            })
    }

    fn run_checked(&self, operation: &str, args: &[&std::ffi::OsStr]) -> Result<Output> {
        let output = self.run(operation, args)?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::vcs_command(operation, stderr.trim(), false))
        }
    }
}

fn os(s: &str) -> &std::ffi::OsStr {
    std::ffi::OsStr::new(s)
}

impl VersionControl for GitCli {
    fn version(&self) -> Result<VcsVersion> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|e| {
                Error::vcs_command(
                    "read git version",
                    e.to_string(),
                    e.kind() == ErrorKind::NotFound,
                )
            })?;

        if !output.status.success() {
            return Err(Error::vcs_command(
                "read git version",
                "git returned non-zero exit code",
                false,
            ));
        }

        VcsVersion::parse(&String::from_utf8_lossy(&output.stdout))
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let output = self.run(
            "verify branch",
            &[os("rev-parse"), os("--verify"), os("--quiet"), os(&reference)],
        )?;
        Ok(output.status.success())
    }

    fn add_worktree(&self, path: &Path, work_branch: &str, base_branch: &str) -> Result<()> {
        self.run_checked(
            "add worktree",
            &[
                os("worktree"),
                os("add"),
                os("-b"),
                os(work_branch),
                path.as_os_str(),
                os(base_branch),
            ],
        )
        .map(|_| ())
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        self.run_checked(
            "remove worktree",
            &[os("worktree"), os("remove"), os("--force"), path.as_os_str()],
        )
        .map(|_| ())
    }

    fn prune_worktrees(&self) -> Result<()> {
        self.run_checked("prune worktrees", &[os("worktree"), os("prune")])
            .map(|_| ())
    }

    fn has_commits_beyond(&self, branch: &str, base: &str) -> Result<bool> {
        let range = format!("refs/heads/{base}..refs/heads/{branch}");
        let output = self.run_checked(
            "count branch commits",
            &[os("rev-list"), os("--count"), os(&range)],
        )?;
        let count = String::from_utf8_lossy(&output.stdout);
        count
            .trim()
            .parse::<u64>()
            .map(|n| n > 0)
            .map_err(|e| Error::Parse(format!("git rev-list --count returned '{}': {e}", count.trim())))
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run_checked("delete branch", &[os("branch"), os("-D"), os(branch)])
            .map(|_| ())
    }
}
