//! Ecosystem resolution: which container recipe checks which file type.
//!
//! The profile is computed once per scan by [`EcosystemResolver`] and then
//! shared read-only by every verification in that scan.

pub mod parse;
pub mod resolver;
pub mod summary;

pub use resolver::{EcosystemResolver, Resolution};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extension the no-evidence fallback profile is keyed by.
pub const FALLBACK_EXTENSION: &str = ".txt";

/// Minimal image that is available everywhere.
pub const FALLBACK_IMAGE: &str = "alpine:latest";

/// Recipe for checking one file type inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSpec {
    pub language: String,
    #[serde(rename = "docker_image")]
    pub image_ref: String,
    /// Shell command installing dependencies; empty when none are needed.
    pub dep_install_cmd: String,
    pub syntax_cmd: Vec<String>,
    pub test_cmd: Vec<String>,
}

impl SandboxSpec {
    /// Generic recipe: minimal image, nothing to install, nothing to run.
    pub fn generic() -> Self {
        Self {
            language: "generic".to_string(),
            image_ref: FALLBACK_IMAGE.to_string(),
            dep_install_cmd: String::new(),
            syntax_cmd: Vec::new(),
            test_cmd: Vec::new(),
        }
    }

    pub fn install_cmd(&self) -> Option<&str> {
        let cmd = self.dep_install_cmd.trim();
        (!cmd.is_empty()).then_some(cmd)
    }
}

/// Extension-keyed sandbox recipes, in the order they were resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcosystemProfile {
    specs: IndexMap<String, SandboxSpec>,
    fallback: SandboxSpec,
}

impl EcosystemProfile {
    /// Build a profile, normalizing every extension key. Later duplicates of
    /// the same normalized key replace earlier ones in place.
    pub fn new(specs: impl IntoIterator<Item = (String, SandboxSpec)>) -> Self {
        let specs = specs
            .into_iter()
            .map(|(ext, spec)| (normalize_extension(&ext), spec))
            .collect();
        Self {
            specs,
            fallback: SandboxSpec::generic(),
        }
    }

    /// Profile used when the scan produced no dependency evidence.
    pub fn fallback_only() -> Self {
        Self::new([(FALLBACK_EXTENSION.to_string(), SandboxSpec::generic())])
    }

    pub fn fallback(&self) -> &SandboxSpec {
        &self.fallback
    }

    pub fn get(&self, extension: &str) -> Option<&SandboxSpec> {
        self.specs.get(&normalize_extension(extension))
    }

    /// Recipe for `path`, falling back to the generic entry.
    pub fn spec_for_path(&self, path: &str) -> &SandboxSpec {
        Path::new(path)
            .extension()
            .and_then(|ext| self.get(&ext.to_string_lossy()))
            .unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SandboxSpec)> {
        self.specs.iter().map(|(ext, spec)| (ext.as_str(), spec))
    }
}

/// `"PY"`, `".py"` and `" .Py "` all normalize to `".py"`.
pub fn normalize_extension(raw: &str) -> String {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{trimmed}")
    }
}
