//! Git version parsing and isolation capability checking

use crate::{Error, Result};

/// Semantic version of the installed version-control tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VcsVersion {
    /// Major version number
    pub major: u32,
    /// Minor version number
    pub minor: u32,
    /// Patch version number
    pub patch: u32,
}

impl VcsVersion {
    /// First git release shipping `git worktree` (2.5.0)
    pub const MIN_ISOLATION: Self = Self {
        major: 2,
        minor: 5,
        patch: 0,
    };

    /// Parse version from `git --version` output.
    ///
    /// Accepted shapes:
    /// - `git version 2.43.0`
    /// - `git version 2.39.2.windows.1`
    /// - `git version 2.37.1 (Apple Git-137.1)`
    /// - `git version 2.40` (missing patch reads as 0)
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .trim()
            .strip_prefix("git version ")
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or_else(|| Error::Parse(format!("Invalid git version format: {version_str}")))?;

        let mut numbers = version_part.split('.').map(str::parse::<u32>);

        let mut next = |label: &str, required: bool| -> Result<u32> {
            match numbers.next() {
                Some(Ok(n)) => Ok(n),
                Some(Err(e)) if required => {
                    Err(Error::Parse(format!("Invalid {label} version: {e}")))
                }
                None if required => Err(Error::Parse(format!(
                    "Invalid git version format (expected X.Y[.Z]): {version_str}"
                ))),
                _ => Ok(0),
            }
        };

        let major = next("major", true)?;
        let minor = next("minor", true)?;
        let patch = next("patch", false)?;

        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// Whether this version can materialize extra checkouts
    pub fn supports_isolation(&self) -> bool {
        self >= &Self::MIN_ISOLATION
    }
}

impl std::fmt::Display for VcsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
