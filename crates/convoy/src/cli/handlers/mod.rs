//! CLI command handlers that bridge between `clap` and `convoy_core`
//!
//! - `run`: classify and execute one request
//! - `status`: queue, lock holders, instances
//! - `check`: version-control tool and isolation capability
//! - `unlock`: operator clearing of stale locks

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use convoy_core::{load_config, Config, Coordinator, ShutdownCoordinator};

use crate::cli::build_cli;

pub mod check;
pub mod run;
pub mod status;
pub mod unlock;

pub use self::{check::handle_check, run::handle_run, status::handle_status, unlock::handle_unlock};

/// Parse the process arguments and run the selected command
pub async fn run_cli(shutdown: ShutdownCoordinator) -> Result<()> {
    let matches = build_cli().get_matches();
    dispatch(&matches, shutdown).await
}

pub async fn dispatch(matches: &ArgMatches, shutdown: ShutdownCoordinator) -> Result<()> {
    match matches.subcommand() {
        Some(("run", sub_m)) => handle_run(sub_m, shutdown).await,
        Some(("status", sub_m)) => handle_status(sub_m).await,
        Some(("check", sub_m)) => handle_check(sub_m).await,
        Some(("unlock", sub_m)) => handle_unlock(sub_m).await,
        _ => anyhow::bail!("Unknown command. Run 'convoy --help' for usage."),
    }
}

/// Repository root from `--repo`, or the current directory
pub(crate) fn repo_root(sub_m: &ArgMatches) -> Result<PathBuf> {
    match sub_m.get_one::<String>("repo") {
        Some(repo) => Ok(PathBuf::from(repo)),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

/// Selected repository and its layered configuration
pub(crate) async fn load(sub_m: &ArgMatches) -> Result<(PathBuf, Config)> {
    let repo = repo_root(sub_m)?;
    let config = load_config(&repo).await?;
    Ok((repo, config))
}

/// Coordinator for `repo`, after logging anything left by dead runs
pub(crate) fn coordinator(repo: &Path, config: Config) -> Result<Coordinator> {
    let coordinator = Coordinator::open(repo, config)?;
    coordinator.recover()?;
    Ok(coordinator)
}

/// Render an error with its cause chain
pub fn format_error(err: &anyhow::Error) -> String {
    let mut message = err.to_string();
    for cause in err.chain().skip(1) {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
    }
    message
}
