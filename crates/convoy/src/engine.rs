//! Execution engine that runs an external command per request

use std::process::Stdio;

use async_trait::async_trait;
use convoy_core::{config::EngineConfig, Error, ExecutionContext, ExecutionEngine, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Runs `command args... <descriptor>` inside the classified working copy.
///
/// The child inherits stdio and sees the run through `CONVOY_*`
/// environment variables. `CONVOY_BRANCH` is the branch the run targets,
/// or the work branch for isolated runs; `CONVOY_TARGET_BRANCH` is always
/// the requested branch. The child is killed if the run future is dropped.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    command: String,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Build from the `[engine]` config table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when no command is configured.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "no execution engine configured; set [engine] command in \
                 .convoy/config.toml or CONVOY_ENGINE_COMMAND"
                    .to_string(),
            ));
        }
        Ok(Self::new(config.command.clone(), config.args.clone()))
    }

    fn command_for(&self, ctx: &ExecutionContext) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(ctx.request.descriptor())
            .current_dir(&ctx.workdir)
            .env("CONVOY_BRANCH", &ctx.branch)
            .env("CONVOY_TARGET_BRANCH", ctx.request.branch())
            .env("CONVOY_WORKDIR", &ctx.workdir)
            .env("CONVOY_DESCRIPTOR", ctx.request.descriptor())
            .env("CONVOY_CLASSIFICATION", ctx.classification.to_string())
            .env("CONVOY_OWNER_ID", ctx.owner_id.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        debug!(
            command = %self.command,
            workdir = %ctx.workdir.display(),
            "Spawning execution engine"
        );
        let mut child = self.command_for(ctx).spawn().map_err(|e| {
            Error::execution_failed(format!("failed to start '{}': {e}", self.command), None)
        })?;

        let status = child.wait().await.map_err(|e| {
            Error::execution_failed(format!("failed to wait for '{}': {e}", self.command), None)
        })?;

        if status.success() {
            info!(owner = %ctx.owner_id, branch = %ctx.branch, "Execution finished");
            Ok(())
        } else {
            Err(Error::execution_failed(
                format!("{} exited with {status}", self.command),
                status.code(),
            ))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use convoy_core::{Classification, OwnerId, Request};
    use tempfile::TempDir;

    use super::*;

    fn context(dir: &Path) -> ExecutionContext {
        ExecutionContext {
            request: Request::new(dir.join("job.toml"), "main").unwrap(),
            owner_id: OwnerId::new("owner-1"),
            workdir: dir.to_path_buf(),
            branch: "main".to_string(),
            classification: Classification::NoConflict,
        }
    }

    fn shell(script: &str) -> ProcessEngine {
        ProcessEngine::new("sh", vec!["-c".to_string(), script.to_string(), "sh".to_string()])
    }

    #[test]
    fn test_from_config_requires_command() {
        let err = ProcessEngine::from_config(&EngineConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("CONVOY_ENGINE_COMMAND"));
    }

    #[tokio::test]
    async fn test_success_runs_in_workdir_with_env() {
        let dir = TempDir::new().unwrap();
        let engine = shell(r#"pwd > seen && printf '%s %s %s' "$CONVOY_BRANCH" "$CONVOY_CLASSIFICATION" "$1" > env"#);

        engine.execute(&context(dir.path())).await.unwrap();

        let seen = std::fs::read_to_string(dir.path().join("seen")).unwrap();
        assert_eq!(
            Path::new(seen.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        let env = std::fs::read_to_string(dir.path().join("env")).unwrap();
        assert!(env.starts_with("main NO_CONFLICT "));
        assert!(env.ends_with("job.toml"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_forwarded() {
        let dir = TempDir::new().unwrap();
        let err = shell("exit 9")
            .execute(&context(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 9);
        assert!(matches!(err, Error::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let engine = ProcessEngine::new("convoy-no-such-engine-binary", vec![]);
        let err = engine.execute(&context(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { exit_code: None, .. }));
    }
}
