//! Sandbox layer: verifies one fix inside a throwaway container.
//!
//! Defines the [`ContainerRuntime`] trait the executor launches containers
//! through, and the [`CommandOutput`] every runtime returns. One runtime ships:
//!
//! - [`docker::DockerCliRuntime`] drives the `docker` CLI (or any CLI with a
//!   compatible `run` subcommand, such as `podman`).
//!
//! [`SandboxExecutor`] owns the per-fix lifecycle: allocate a workspace,
//! materialize the fix, pick the command, launch, record, clean up.

pub mod docker;
pub mod executor;
pub mod manifest;
pub mod workspace;

pub use docker::DockerCliRuntime;
pub use executor::{ExecutorSettings, SandboxExecutor, NO_VERIFICATION_COMMAND};
pub use workspace::{HostAlias, SandboxWorkspace};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// In-container directory the workspace is bind-mounted at.
pub const CONTAINER_MOUNT_POINT: &str = "/check";

/// Hard wall-clock limit for one verification container.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(120);

/// Output from a finished container process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Diagnostic recorded on a failed fix: stderr, a newline, then stdout,
    /// verbatim. Empty when the process printed nothing at all.
    pub fn diagnostic(&self) -> String {
        if self.stderr.is_empty() && self.stdout.is_empty() {
            return String::new();
        }
        format!("{}\n{}", self.stderr, self.stdout)
    }
}

/// One ephemeral container launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInvocation {
    pub image: String,
    /// Directory the container runtime's daemon can resolve.
    pub mount_source: PathBuf,
    pub mount_target: String,
    /// Executed with `sh -c` inside the container.
    pub command: String,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The workspace could not be prepared. The fix is skipped.
    #[error("sandbox setup failed ({context}): {source}")]
    Setup {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime could not start the container or collect its output.
    #[error("{0}")]
    Launch(String),

    #[error("Verification timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl SandboxError {
    pub(crate) fn setup(context: impl Into<String>, source: std::io::Error) -> Self {
        SandboxError::Setup {
            context: context.into(),
            source,
        }
    }
}

/// Launches ephemeral containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short runtime name for logs (`docker`, `podman`, ...).
    fn name(&self) -> &str;

    /// Run one container to completion or timeout. A non-zero exit is an
    /// `Ok` output; only launch problems and timeouts are errors.
    async fn run(&self, invocation: &ContainerInvocation) -> Result<CommandOutput, SandboxError>;
}
