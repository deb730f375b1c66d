//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/convoy/config.toml
//! 3. Project config: <repo>/.convoy/config.toml
//! 4. Environment variables: CONVOY_*
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! worktree_dir = "../{repo}__convoy"
//! poll_interval_ms = 500
//! wait_policy = "front"
//!
//! [engine]
//! command = "runner"
//! args = ["--non-interactive"]
//! ```

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a deferred request decides when to reclassify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WaitPolicy {
    /// Every waiter reclassifies on every poll; first successful acquire wins
    #[default]
    Repoll,
    /// Only the entry at the front of the queue reclassifies
    Front,
}

impl<'de> Deserialize<'de> for WaitPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl FromStr for WaitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "repoll" | "poll" => Ok(Self::Repoll),
            "front" | "fifo" => Ok(Self::Front),
            _ => Err(Error::InvalidConfig(format!(
                "Invalid wait policy: {s}. Must be one of: repoll, front"
            ))),
        }
    }
}

impl std::fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repoll => write!(f, "repoll"),
            Self::Front => write!(f, "front"),
        }
    }
}

const DEFAULT_STATE_DIR: &str = ".convoy";
const DEFAULT_WORKTREE_DIR: &str = "../{repo}__convoy";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Coordination state directory, relative to the repository root
    pub state_dir: String,
    /// Parent directory for isolated checkouts; `{repo}` is substituted
    pub worktree_dir: String,
    /// Sleep between queue polls while deferred
    pub poll_interval_ms: u64,
    pub wait_policy: WaitPolicy,
    /// Version-control binary
    pub vcs_binary: String,
    pub engine: EngineConfig,
}

/// External execution engine invoked for each run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: DEFAULT_STATE_DIR.to_string(),
            worktree_dir: DEFAULT_WORKTREE_DIR.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_policy: WaitPolicy::default(),
            vcs_binary: "git".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

/// A config file layer; absent keys leave lower layers untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    state_dir: Option<String>,
    worktree_dir: Option<String>,
    poll_interval_ms: Option<u64>,
    wait_policy: Option<WaitPolicy>,
    vcs_binary: Option<String>,
    engine: Option<PartialEngineConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialEngineConfig {
    command: Option<String>,
    args: Option<Vec<String>>,
}

impl Config {
    fn merge(&mut self, layer: PartialConfig) {
        if let Some(v) = layer.state_dir {
            self.state_dir = v;
        }
        if let Some(v) = layer.worktree_dir {
            self.worktree_dir = v;
        }
        if let Some(v) = layer.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = layer.wait_policy {
            self.wait_policy = v;
        }
        if let Some(v) = layer.vcs_binary {
            self.vcs_binary = v;
        }
        if let Some(engine) = layer.engine {
            if let Some(v) = engine.command {
                self.engine.command = v;
            }
            if let Some(v) = engine.args {
                self.engine.args = v;
            }
        }
    }

    /// Apply `CONVOY_*` environment overrides
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("CONVOY_STATE_DIR") {
            self.state_dir = value;
        }
        if let Ok(value) = std::env::var("CONVOY_WORKTREE_DIR") {
            self.worktree_dir = value;
        }
        if let Ok(value) = std::env::var("CONVOY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = value.parse().map_err(|e| {
                Error::InvalidConfig(format!("Invalid CONVOY_POLL_INTERVAL_MS value: {e}"))
            })?;
        }
        if let Ok(value) = std::env::var("CONVOY_WAIT_POLICY") {
            self.wait_policy = value.parse()?;
        }
        if let Ok(value) = std::env::var("CONVOY_VCS_BINARY") {
            self.vcs_binary = value;
        }
        if let Ok(value) = std::env::var("CONVOY_ENGINE_COMMAND") {
            self.engine.command = value;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(Error::InvalidConfig(format!(
                "poll_interval_ms must be 1-{MAX_POLL_INTERVAL_MS}"
            )));
        }
        if self.state_dir.trim().is_empty() {
            return Err(Error::InvalidConfig("state_dir cannot be empty".into()));
        }
        if self.worktree_dir.trim().is_empty() {
            return Err(Error::InvalidConfig("worktree_dir cannot be empty".into()));
        }
        if self.vcs_binary.trim().is_empty() {
            return Err(Error::InvalidConfig("vcs_binary cannot be empty".into()));
        }
        Ok(())
    }

    /// Poll interval as a `Duration`
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Absolute state directory for the repository at `repo_root`
    #[must_use]
    pub fn state_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.state_dir)
    }

    /// Absolute parent directory for isolated checkouts
    #[must_use]
    pub fn worktree_path(&self, repo_root: &Path) -> PathBuf {
        let repo_name = repo_root
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("repo");
        repo_root.join(self.worktree_dir.replace("{repo}", repo_name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Where each config layer is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSources {
    pub global: Option<PathBuf>,
    pub project: PathBuf,
}

impl ConfigSources {
    /// Standard locations for the repository at `repo_root`
    #[must_use]
    pub fn for_repo(repo_root: &Path) -> Self {
        Self {
            global: global_config_path(),
            project: repo_root.join(DEFAULT_STATE_DIR).join("config.toml"),
        }
    }

    /// Load defaults, then each existing layer, then the environment.
    pub async fn load(&self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(global) = &self.global {
            if let Some(layer) = load_toml_file(global).await? {
                config.merge(layer);
            }
        }

        if let Some(layer) = load_toml_file(&self.project).await? {
            config.merge(layer);
        }

        config.apply_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Load the layered configuration for the repository at `repo_root`.
pub async fn load_config(repo_root: &Path) -> Result<Config> {
    ConfigSources::for_repo(repo_root).load().await
}

fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "convoy")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `Ok(None)` when the file does not exist.
async fn load_toml_file(path: &Path) -> Result<Option<PartialConfig>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => toml::from_str(&content).map(Some).map_err(|e| {
            Error::Parse(format!("Failed to parse config {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, &e)),
    }
}
