//! Docker CLI runtime: one `docker run --rm` per verification.
//!
//! Talks to the daemon through the CLI binary, so any CLI with a compatible
//! `run` / `rm -f` surface (`podman`, `nerdctl`) works as well. Containers get
//! a unique name so a timed-out run can be force-removed by name.

use super::{CommandOutput, ContainerInvocation, ContainerRuntime, SandboxError};
use crate::config::SandboxConfig;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

const CONTAINER_NAME_PREFIX: &str = "vulnfix-verify-";

/// Upper bound on the cleanup `rm -f` after a timeout.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct DockerCliRuntime {
    cli: String,
}

impl DockerCliRuntime {
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.container_cli.clone())
    }

    /// Arguments for `docker run` (without the binary itself).
    pub fn build_args(name: &str, invocation: &ContainerInvocation) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-v".to_string(),
            format!(
                "{}:{}",
                invocation.mount_source.display(),
                invocation.mount_target
            ),
            "-w".to_string(),
            invocation.mount_target.clone(),
            invocation.image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            invocation.command.clone(),
        ]
    }

    async fn force_remove(&self, cli: &Path, name: &str) {
        let removal = Command::new(cli)
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match tokio::time::timeout(REMOVE_TIMEOUT, removal).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(container = name, "Removed timed-out container");
            }
            Ok(Ok(status)) => {
                tracing::debug!(container = name, %status, "Container already gone");
            }
            Ok(Err(e)) => {
                tracing::warn!(container = name, error = %e, "Failed to remove timed-out container");
            }
            Err(_) => {
                tracing::warn!(container = name, "Timed out removing container");
            }
        }
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    fn name(&self) -> &str {
        &self.cli
    }

    async fn run(&self, invocation: &ContainerInvocation) -> Result<CommandOutput, SandboxError> {
        let cli = which::which(&self.cli).map_err(|e| {
            SandboxError::Launch(format!("container CLI '{}' not found: {e}", self.cli))
        })?;
        let name = format!("{CONTAINER_NAME_PREFIX}{}", Uuid::new_v4());

        let child = Command::new(&cli)
            .args(Self::build_args(&name, invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Launch(format!("failed to start '{}': {e}", self.cli)))?;

        match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().map_or(-1, i64::from),
            }),
            Ok(Err(e)) => Err(SandboxError::Launch(format!(
                "'{}' run failed: {e}",
                self.cli
            ))),
            Err(_) => {
                tracing::warn!(
                    container = %name,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Verification container timed out"
                );
                self.force_remove(&cli, &name).await;
                Err(SandboxError::TimedOut(invocation.timeout))
            }
        }
    }
}
