//! Classification results and their string encoding.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{request::OwnerId, Error, Result};

/// Outcome of one classification attempt
///
/// Encoded for callers as `NO_CONFLICT`, `WORKTREE:<absolute_path>` or
/// `QUEUED:<position>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Classification {
    /// Lock was free; runs in the primary working copy
    NoConflict,
    /// Branch busy; runs in a fresh isolation instance at this path
    Worktree(PathBuf),
    /// Branch busy and no isolation; waiting at this queue position
    Queued(usize),
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConflict => write!(f, "NO_CONFLICT"),
            Self::Worktree(path) => write!(f, "WORKTREE:{}", path.display()),
            Self::Queued(position) => write!(f, "QUEUED:{position}"),
        }
    }
}

impl FromStr for Classification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "NO_CONFLICT" {
            return Ok(Self::NoConflict);
        }
        if let Some(path) = s.strip_prefix("WORKTREE:").filter(|p| !p.is_empty()) {
            return Ok(Self::Worktree(PathBuf::from(path)));
        }
        if let Some(position) = s.strip_prefix("QUEUED:") {
            return position
                .parse()
                .map(Self::Queued)
                .map_err(|e| Error::Parse(format!("invalid queue position '{position}': {e}")));
        }
        Err(Error::Parse(format!("unknown classification '{s}'")))
    }
}

/// Notified of each classification as it happens. A `Queued` result is
/// reported before the run blocks, and again only if the position changes.
pub trait ClassificationObserver: Send + Sync {
    fn on_classified(&self, owner: &OwnerId, classification: &Classification);
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub owner_id: OwnerId,
    /// Classification the run finally executed under
    pub classification: Classification,
    /// Distinct queue positions reported while deferred, in order
    pub deferrals: Vec<usize>,
}

impl RunReport {
    /// String-tagged outcome for the caller
    pub fn outcome(&self) -> String {
        self.classification.to_string()
    }

    pub fn was_deferred(&self) -> bool {
        !self.deferrals.is_empty()
    }
}
