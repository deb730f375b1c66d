//! Request and owner identity types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identity of one coordinator run, recorded in every artifact it owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner ID from an existing value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, globally unique owner ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("run-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of work: a work-item descriptor and the branch it targets.
///
/// Immutable once built; the coordinator only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    descriptor: PathBuf,
    branch: String,
}

impl Request {
    /// Build a request, rejecting branch names git would refuse.
    pub fn new(descriptor: impl Into<PathBuf>, branch: impl Into<String>) -> Result<Self> {
        let branch = branch.into();
        validate_branch_name(&branch)?;
        Ok(Self {
            descriptor: descriptor.into(),
            branch,
        })
    }

    /// Path of the work-item descriptor
    #[must_use]
    pub fn descriptor(&self) -> &Path {
        &self.descriptor
    }

    /// Target branch
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

/// Subset of `git check-ref-format` rules that matter for file and worktree naming.
fn validate_branch_name(branch: &str) -> Result<()> {
    if branch.trim().is_empty() {
        return Err(Error::InvalidRequest(
            "branch name cannot be empty".to_string(),
        ));
    }

    if branch.starts_with('-') || branch.starts_with('/') || branch.ends_with('/') {
        return Err(Error::InvalidRequest(format!(
            "branch name '{branch}' has an invalid leading or trailing character"
        )));
    }

    if branch.contains("..")
        || branch.ends_with(".lock")
        || branch
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
    {
        return Err(Error::InvalidRequest(format!(
            "branch name '{branch}' is not a valid git ref name"
        )));
    }

    Ok(())
}
