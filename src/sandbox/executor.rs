//! Verifies one fix inside an ephemeral container.

use super::manifest::{self, Materialized};
use super::{
    ContainerInvocation, ContainerRuntime, HostAlias, SandboxError, SandboxWorkspace,
    CONTAINER_MOUNT_POINT, DEFAULT_VERIFY_TIMEOUT,
};
use crate::config::SandboxConfig;
use crate::ecosystem::SandboxSpec;
use crate::fix::Fix;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Diagnostic for fixes whose recipe has neither a test nor a syntax command.
pub const NO_VERIFICATION_COMMAND: &str = "No verification command available";

const TEST_FILE_PREFIX: &str = "test_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub mount_point: String,
    pub timeout: Duration,
    /// Where workspaces are created. `None` uses the system temp dir.
    pub work_root: Option<PathBuf>,
    pub host_alias: Option<HostAlias>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            mount_point: CONTAINER_MOUNT_POINT.to_string(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
            work_root: None,
            host_alias: None,
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &SandboxConfig) -> Self {
        let host_alias = match (&config.work_root, &config.host_work_dir) {
            (Some(local), Some(host)) => Some(HostAlias::new(local, host)),
            _ => None,
        };
        Self {
            mount_point: config.mount_point.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            work_root: config.work_root.clone(),
            host_alias,
        }
    }
}

pub struct SandboxExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    settings: ExecutorSettings,
}

impl SandboxExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: ExecutorSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Verify `fix` with `spec`, recording the outcome on the fix.
    ///
    /// Execution problems (non-zero exit, timeout, launch failure) are
    /// recorded on the fix and return `Ok`. An `Err` means the workspace
    /// could not be prepared and the fix was left untouched. The workspace is
    /// removed before this returns in every case.
    pub async fn verify(
        &self,
        fix: &mut Fix,
        spec: &SandboxSpec,
        repo_root: &Path,
    ) -> Result<(), SandboxError> {
        let workspace = SandboxWorkspace::allocate(
            self.settings.work_root.as_deref(),
            self.settings.host_alias.as_ref(),
        )?;

        let result = self.verify_in(&workspace, fix, spec, repo_root).await;

        let local = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!(path = %local.display(), error = %e, "Failed to remove verification workspace");
        }
        result
    }

    async fn verify_in(
        &self,
        workspace: &SandboxWorkspace,
        fix: &mut Fix,
        spec: &SandboxSpec,
        repo_root: &Path,
    ) -> Result<(), SandboxError> {
        let file_name = fix.file_name().ok_or_else(|| {
            SandboxError::setup(
                "fix path",
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("'{}' has no file name", fix.path),
                ),
            )
        })?;
        workspace.write_file(&file_name, &fix.fix_code)?;

        let install = match spec.install_cmd() {
            Some(cmd) => {
                let sources = [Some(fix.fix_code.as_str()), fix.test_source()];
                let materialized = manifest::materialize(
                    workspace,
                    repo_root,
                    &spec.language,
                    &file_name,
                    sources.into_iter().flatten(),
                )?;
                if materialized == Materialized::Skipped {
                    debug!(path = %fix.path, language = %spec.language, "No dependency manifest, skipping install");
                }
                materialized.has_manifest().then_some(cmd)
            }
            None => None,
        };

        let (check, tokens, target) = match fix.test_source() {
            Some(test) if !spec.test_cmd.is_empty() => {
                let test_name = format!("{TEST_FILE_PREFIX}{file_name}");
                workspace.write_file(&test_name, test)?;
                ("test", &spec.test_cmd, test_name)
            }
            _ if !spec.syntax_cmd.is_empty() => ("syntax", &spec.syntax_cmd, file_name),
            _ => {
                info!(path = %fix.path, "No syntax or test command, leaving fix unverified");
                fix.mark_unverified(NO_VERIFICATION_COMMAND);
                return Ok(());
            }
        };

        let invocation = ContainerInvocation {
            image: spec.image_ref.clone(),
            mount_source: workspace.mount_path().to_path_buf(),
            mount_target: self.settings.mount_point.clone(),
            command: compose_command(install, tokens, &self.settings.mount_point, &target),
            timeout: self.settings.timeout,
        };

        info!(
            path = %fix.path,
            image = %invocation.image,
            check,
            runtime = self.runtime.name(),
            "Running verification"
        );
        debug!(command = %invocation.command, mount = %invocation.mount_source.display(), "Container invocation");

        match self.runtime.run(&invocation).await {
            Ok(output) if output.success() => {
                info!(path = %fix.path, check, "Fix verified");
                fix.mark_verified();
            }
            Ok(output) => {
                info!(path = %fix.path, exit_code = output.exit_code, "Fix failed verification");
                fix.mark_unverified(output.diagnostic());
            }
            Err(e) => {
                warn!(path = %fix.path, error = %e, "Verification container did not complete");
                fix.mark_unverified(e.to_string());
            }
        }
        Ok(())
    }
}

/// `<install, stderr discarded> && <check tokens> <mount>/<target>`.
pub fn compose_command(
    install: Option<&str>,
    tokens: &[String],
    mount_point: &str,
    target: &str,
) -> String {
    let target_path = format!("{}/{target}", mount_point.trim_end_matches('/'));
    let run = format!("{} {}", tokens.join(" "), shell_quote(&target_path));
    match install {
        Some(install) => format!("({install}) 2>/dev/null && {run}"),
        None => run,
    }
}

/// Single-quote `arg` for `sh` unless it only holds safe characters.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CommandOutput;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    type Responder = Box<dyn Fn() -> Result<CommandOutput, SandboxError> + Send + Sync>;

    /// Records each invocation together with the workspace contents at launch.
    struct FakeRuntime {
        respond: Responder,
        seen: Mutex<Vec<(ContainerInvocation, BTreeMap<String, String>)>>,
    }

    impl FakeRuntime {
        fn new(respond: impl Fn() -> Result<CommandOutput, SandboxError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                respond: Box::new(respond),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn exit(code: i64, stdout: &str, stderr: &str) -> Arc<Self> {
            let output = CommandOutput {
                stdout: stdout.into(),
                stderr: stderr.into(),
                exit_code: code,
            };
            Self::new(move || Ok(output.clone()))
        }

        fn invocations(&self) -> Vec<ContainerInvocation> {
            self.seen.lock().iter().map(|(inv, _)| inv.clone()).collect()
        }

        fn files(&self, call: usize) -> BTreeMap<String, String> {
            self.seen.lock()[call].1.clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        fn name(&self) -> &str {
            "fake"
        }

        async fn run(&self, invocation: &ContainerInvocation) -> Result<CommandOutput, SandboxError> {
            let files = std::fs::read_dir(&invocation.mount_source)
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .map(|e| {
                            let name = e.file_name().to_string_lossy().into_owned();
                            let body = std::fs::read_to_string(e.path()).unwrap_or_default();
                            (name, body)
                        })
                        .collect()
                })
                .unwrap_or_default();
            self.seen.lock().push((invocation.clone(), files));
            (self.respond)()
        }
    }

    fn python_spec() -> SandboxSpec {
        SandboxSpec {
            language: "python".into(),
            image_ref: "python:3.11-alpine".into(),
            dep_install_cmd: "pip install -r requirements.txt -q".into(),
            syntax_cmd: vec!["python".into(), "-m".into(), "py_compile".into()],
            test_cmd: vec!["python".into()],
        }
    }

    fn executor(runtime: Arc<FakeRuntime>, work_root: &Path) -> SandboxExecutor {
        SandboxExecutor::new(
            runtime,
            ExecutorSettings {
                work_root: Some(work_root.to_path_buf()),
                ..ExecutorSettings::default()
            },
        )
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn syntax_check_when_fix_has_no_test() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new("app/db.py", "old", "import os\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert!(fix.verified);
        assert!(fix.error.is_none());
        let calls = runtime.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "python -m py_compile /check/db.py");
        assert_eq!(calls[0].image, "python:3.11-alpine");
        assert_eq!(calls[0].mount_target, "/check");
        let files = runtime.files(0);
        assert_eq!(files.keys().collect::<Vec<_>>(), ["db.py"]);
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn test_file_is_written_and_targeted() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("requirements.txt"), "flask\n").unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "ok", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new(
            "app/db.py",
            "old",
            "import flask\n",
            Some("from db import run\nassert run()\n".into()),
            1,
        );

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert!(fix.verified);
        let calls = runtime.invocations();
        assert_eq!(
            calls[0].command,
            "(pip install -r requirements.txt -q) 2>/dev/null && python /check/test_db.py"
        );
        let files = runtime.files(0);
        assert_eq!(files["requirements.txt"], "flask\n");
        assert_eq!(files["test_db.py"], "from db import run\nassert run()\n");
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn synthesized_manifest_enables_install() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new("svc.py", "", "import requests\nimport os\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        let calls = runtime.invocations();
        assert!(calls[0].command.starts_with("(pip install"));
        assert_eq!(runtime.files(0)["requirements.txt"], "requests");
    }

    #[tokio::test]
    async fn install_is_dropped_without_manifest() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new("svc.py", "", "import os\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert_eq!(runtime.invocations()[0].command, "python -m py_compile /check/svc.py");
    }

    #[tokio::test]
    async fn repository_manifest_never_replaces_the_fix() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("setup.py"), "ORIGINAL_VULNERABLE\n").unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new("setup.py", "old", "FIXED_CODE\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert!(fix.verified);
        assert_eq!(runtime.files(0)["setup.py"], "FIXED_CODE\n");
        assert!(runtime.invocations()[0].command.ends_with("py_compile /check/setup.py"));
    }

    #[tokio::test]
    async fn non_zero_exit_records_stderr_then_stdout() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(1, "1 failed", "AssertionError");
        let exec = executor(runtime, work.path());
        let mut fix = Fix::new("db.py", "", "x = 1\n", Some("assert False\n".into()), 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert!(!fix.verified);
        assert_eq!(fix.error.as_deref(), Some("AssertionError\n1 failed"));
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn timeout_is_recorded_on_fix() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new(|| Err(SandboxError::TimedOut(Duration::from_secs(120))));
        let exec = executor(runtime, work.path());
        let mut fix = Fix::new("db.py", "", "while True: pass\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert!(!fix.verified);
        assert_eq!(fix.error.as_deref(), Some("Verification timed out after 120s"));
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn launch_failure_is_recorded_on_fix() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new(|| Err(SandboxError::Launch("image pull failed".into())));
        let exec = executor(runtime, work.path());
        let mut fix = Fix::new("db.py", "", "x = 1\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        assert!(!fix.verified);
        assert_eq!(fix.error.as_deref(), Some("image pull failed"));
    }

    #[tokio::test]
    async fn no_command_marks_unverifiable_without_launching() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new(".env", "", "DEBUG=0\n", Some("test".into()), 1);

        exec.verify(&mut fix, &SandboxSpec::generic(), repo.path()).await.unwrap();

        assert!(runtime.invocations().is_empty());
        assert!(!fix.verified);
        assert_eq!(fix.error.as_deref(), Some(NO_VERIFICATION_COMMAND));
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn test_without_test_command_falls_back_to_syntax() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut spec = python_spec();
        spec.test_cmd.clear();
        spec.dep_install_cmd.clear();
        let mut fix = Fix::new("db.py", "", "x = 1\n", Some("assert True\n".into()), 1);

        exec.verify(&mut fix, &spec, repo.path()).await.unwrap();

        assert_eq!(runtime.invocations()[0].command, "python -m py_compile /check/db.py");
        assert!(!runtime.files(0).contains_key("test_db.py"));
    }

    #[tokio::test]
    async fn setup_failure_is_returned_and_workspace_removed() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = executor(runtime.clone(), work.path());
        let mut fix = Fix::new("", "", "x = 1\n", None, 1);

        let err = exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap_err();

        assert!(matches!(err, SandboxError::Setup { .. }));
        assert!(!fix.is_settled());
        assert!(runtime.invocations().is_empty());
        assert!(is_empty_dir(work.path()));
    }

    #[tokio::test]
    async fn host_alias_rewrites_mount_source() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::exit(0, "", "");
        let exec = SandboxExecutor::new(
            runtime.clone(),
            ExecutorSettings {
                work_root: Some(work.path().to_path_buf()),
                host_alias: Some(HostAlias::new(work.path(), "/srv/host-work")),
                ..ExecutorSettings::default()
            },
        );
        let mut fix = Fix::new("db.py", "", "x = 1\n", None, 1);

        exec.verify(&mut fix, &python_spec(), repo.path()).await.unwrap();

        let mount = &runtime.invocations()[0].mount_source;
        assert!(mount.starts_with("/srv/host-work"));
        let name = mount.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("verify-"));
    }

    #[test]
    fn quoting_only_when_needed() {
        assert_eq!(shell_quote("/check/db.py"), "/check/db.py");
        assert_eq!(shell_quote("/check/my file.py"), "'/check/my file.py'");
        assert_eq!(shell_quote("it's.py"), r"'it'\''s.py'");
        assert_eq!(
            compose_command(None, &["npx".into(), "jest".into()], "/check/", "test_a b.tsx"),
            "npx jest '/check/test_a b.tsx'"
        );
    }

    #[test]
    fn settings_from_config_build_alias() {
        let config = SandboxConfig {
            work_root: Some(PathBuf::from("/app")),
            host_work_dir: Some(PathBuf::from("/srv/work")),
            timeout_secs: 30,
            ..SandboxConfig::default()
        };
        let settings = ExecutorSettings::from_config(&config);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.host_alias, Some(HostAlias::new("/app", "/srv/work")));
        assert!(ExecutorSettings::from_config(&SandboxConfig::default()).host_alias.is_none());
    }
}
