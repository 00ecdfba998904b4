//! Worker configuration.
//!
//! Loaded from `config.toml` in the platform config directory (or an explicit
//! path), then overridden from the environment. Every section has defaults,
//! so a missing file is not an error.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::oracle::gemini::{DEFAULT_MODEL, GEMINI_API_BASE};

pub const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_DB_FILE: &str = "vulnfix.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oracle: OracleConfig,
    pub remediation: RemediationConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
    pub github: GitHubConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Gemini API key. Usually supplied through `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Retry passes after the first remediation pass.
    pub max_retries: u32,
    /// Distinct files remediated per pass.
    pub max_files: usize,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_files: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container CLI used to launch verification containers.
    pub container_cli: String,
    pub timeout_secs: u64,
    /// In-container path the sandbox directory is mounted at.
    pub mount_point: String,
    /// Directory sandboxes are created under. Defaults to the system temp dir.
    pub work_root: Option<PathBuf>,
    /// Host-side path of `work_root`, for workers that run inside a container
    /// and launch sibling containers through the host daemon.
    pub host_work_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            container_cli: "docker".to_string(),
            timeout_secs: 120,
            mount_point: "/check".to_string(),
            work_root: None,
            host_work_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. `~` and `$VAR` are expanded.
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub api_base: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: crate::github::GITHUB_API_BASE.to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "vulnfix", "vulnfix")
}

impl Config {
    /// Default config file location, if the platform exposes one.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from `path` (or the default location), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config '{}'", path.display()))
    }

    /// Apply overrides from a variable lookup (normally the process
    /// environment). Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("GEMINI_API_KEY") {
            self.oracle.api_key = Some(key);
        }
        if let Some(model) = non_empty("VULNFIX_MODEL") {
            self.oracle.model = model;
        }
        if let Some(raw) = non_empty("MAX_RETRIES") {
            match raw.trim().parse() {
                Ok(n) => self.remediation.max_retries = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable MAX_RETRIES"),
            }
        }
        if let Some(raw) = non_empty("MAX_FILES") {
            match raw.trim().parse() {
                Ok(n) => self.remediation.max_files = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparseable MAX_FILES"),
            }
        }
        if let Some(dir) = non_empty("HOST_WORK_DIR") {
            self.sandbox.host_work_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = non_empty("VULNFIX_WORK_ROOT") {
            self.sandbox.work_root = Some(PathBuf::from(dir));
        }
        if let Some(db) = non_empty("VULNFIX_DB_PATH") {
            self.store.db_path = Some(db);
        }
        if let Some(token) = non_empty("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.remediation.max_files > 0,
            "remediation.max_files must be at least 1"
        );
        anyhow::ensure!(
            self.sandbox.timeout_secs > 0,
            "sandbox.timeout_secs must be at least 1"
        );
        anyhow::ensure!(
            self.sandbox.mount_point.starts_with('/'),
            "sandbox.mount_point must be an absolute container path, got '{}'",
            self.sandbox.mount_point
        );
        anyhow::ensure!(
            self.sandbox.host_work_dir.is_none() || self.sandbox.work_root.is_some(),
            "sandbox.host_work_dir requires sandbox.work_root (the same directory as seen by this process)"
        );
        Ok(())
    }

    /// Resolved database path with `~`/`$VAR` expanded.
    pub fn db_path(&self) -> Result<PathBuf> {
        match self.store.db_path.as_deref() {
            Some(raw) => {
                let expanded = shellexpand::full(raw)
                    .with_context(|| format!("Failed to expand db_path '{raw}'"))?;
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => Ok(project_dirs()
                .map(|dirs| dirs.data_dir().join(DEFAULT_DB_FILE))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))),
        }
    }
}
