//! Per-fix working directories.

use super::SandboxError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const WORKSPACE_PREFIX: &str = "verify-";

/// Maps this process's view of the work root onto the path the container
/// daemon sees, for workers that launch sibling containers through a
/// mounted daemon socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAlias {
    pub local_root: PathBuf,
    pub host_root: PathBuf,
}

impl HostAlias {
    pub fn new(local_root: impl Into<PathBuf>, host_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            host_root: host_root.into(),
        }
    }

    /// Host-side path for `local`. Paths outside `local_root` keep only
    /// their final component.
    pub fn rebase(&self, local: &Path) -> PathBuf {
        match local.strip_prefix(&self.local_root) {
            Ok(relative) => self.host_root.join(relative),
            Err(_) => match local.file_name() {
                Some(name) => self.host_root.join(name),
                None => self.host_root.clone(),
            },
        }
    }
}

/// Ephemeral directory owned by exactly one verification.
///
/// Removed by [`SandboxWorkspace::close`], or on drop if the verification
/// unwinds before reaching it.
#[derive(Debug)]
pub struct SandboxWorkspace {
    dir: TempDir,
    mount_path: PathBuf,
}

impl SandboxWorkspace {
    /// Create a fresh directory under `base` (or the system temp dir).
    pub fn allocate(base: Option<&Path>, alias: Option<&HostAlias>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match base {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| SandboxError::setup("create workspace", e))?;

        let mount_path = match alias {
            Some(alias) => alias.rebase(dir.path()),
            None => dir.path().to_path_buf(),
        };

        tracing::debug!(
            local = %dir.path().display(),
            mount = %mount_path.display(),
            "Allocated verification workspace"
        );
        Ok(Self { dir, mount_path })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path handed to the container runtime as the bind-mount source.
    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    pub fn write_file(&self, name: &str, content: &str) -> Result<PathBuf, SandboxError> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content)
            .map_err(|e| SandboxError::setup(format!("write {name}"), e))?;
        Ok(path)
    }

    /// Copy `source` into the workspace under `name`.
    pub fn copy_in(&self, source: &Path, name: &str) -> Result<PathBuf, SandboxError> {
        let dest = self.dir.path().join(name);
        std::fs::copy(source, &dest)
            .map_err(|e| SandboxError::setup(format!("copy {}", source.display()), e))?;
        Ok(dest)
    }

    /// Remove the directory and everything in it.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_inside_and_outside_local_root() {
        let alias = HostAlias::new("/app", "/srv/work");
        assert_eq!(
            alias.rebase(Path::new("/app/verify-abc")),
            PathBuf::from("/srv/work/verify-abc")
        );
        assert_eq!(
            alias.rebase(Path::new("/tmp/verify-xyz")),
            PathBuf::from("/srv/work/verify-xyz")
        );
    }

    #[test]
    fn allocate_under_base_with_alias() {
        let base = tempfile::tempdir().unwrap();
        let alias = HostAlias::new(base.path(), "/srv/work");

        let ws = SandboxWorkspace::allocate(Some(base.path()), Some(&alias)).unwrap();
        let name = ws.path().file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("verify-"));
        assert!(ws.path().starts_with(base.path()));
        assert_eq!(ws.mount_path(), Path::new("/srv/work").join(&name));
    }

    #[test]
    fn close_removes_directory() {
        let ws = SandboxWorkspace::allocate(None, None).unwrap();
        ws.write_file("app.py", "print('hi')\n").unwrap();
        let path = ws.path().to_path_buf();
        assert_eq!(ws.mount_path(), path.as_path());

        ws.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_directory() {
        let path = {
            let ws = SandboxWorkspace::allocate(None, None).unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn copy_missing_source_is_setup_error() {
        let ws = SandboxWorkspace::allocate(None, None).unwrap();
        let err = ws
            .copy_in(Path::new("/definitely/not/here.txt"), "requirements.txt")
            .unwrap_err();
        assert!(matches!(err, SandboxError::Setup { .. }));
    }
}
