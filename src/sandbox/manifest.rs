//! Dependency manifests for the install step.
//!
//! A recognized manifest at the repository root is copied verbatim. Python
//! fixes without one get a `requirements.txt` synthesized from their imports.

use super::{SandboxError, SandboxWorkspace};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

/// Modules that ship with Python and must not be installed.
pub const PYTHON_STDLIB: &[&str] = &[
    "os", "sys", "json", "re", "math", "datetime", "time", "random", "collections", "functools",
    "itertools", "pathlib", "subprocess", "threading", "logging", "unittest", "io", "hashlib",
    "hmac", "base64", "http", "urllib", "typing", "abc", "copy", "shutil", "tempfile", "glob",
    "secrets", "string", "textwrap", "csv",
];

const SYNTHESIZED_MANIFEST: &str = "requirements.txt";

static PYTHON_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:import|from)\s+([a-zA-Z_]\w*)").expect("valid import regex")
});

/// Manifest file names recognized for `language`, in preference order.
pub fn manifest_candidates(language: &str) -> &'static [&'static str] {
    match language.trim().to_ascii_lowercase().as_str() {
        "python" => &["requirements.txt", "setup.py", "pyproject.toml"],
        "javascript" | "typescript" => &["package.json"],
        "java" => &["pom.xml", "build.gradle"],
        "go" => &["go.mod"],
        "ruby" => &["Gemfile"],
        _ => &[],
    }
}

pub fn supports_import_synthesis(language: &str) -> bool {
    language.trim().eq_ignore_ascii_case("python")
}

/// Third-party top-level module names imported by `sources`, sorted and
/// de-duplicated.
pub fn python_imports<'a>(sources: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    sources
        .into_iter()
        .flat_map(|src| PYTHON_IMPORT.captures_iter(src))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| !PYTHON_STDLIB.contains(name))
        .map(str::to_string)
        .collect()
}

/// What the install step has to work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Copied(String),
    /// The fix itself is a manifest for its language and is used as is.
    Provided(String),
    Synthesized(Vec<String>),
    /// Nothing found or synthesizable; the install step is dropped.
    Skipped,
}

impl Materialized {
    pub fn has_manifest(&self) -> bool {
        !matches!(self, Materialized::Skipped)
    }
}

/// Put a dependency manifest into `workspace` for `language`.
///
/// `fix_file` is the name the fix was written under; a manifest of the same
/// name is never copied over it. `sources` is the fix and test content used
/// for import synthesis.
pub fn materialize<'a>(
    workspace: &SandboxWorkspace,
    repo_root: &Path,
    language: &str,
    fix_file: &str,
    sources: impl IntoIterator<Item = &'a str>,
) -> Result<Materialized, SandboxError> {
    for name in manifest_candidates(language) {
        if *name == fix_file {
            return Ok(Materialized::Provided((*name).to_string()));
        }
        let candidate = repo_root.join(name);
        if candidate.is_file() {
            workspace.copy_in(&candidate, name)?;
            tracing::debug!(manifest = name, "Copied dependency manifest from repository");
            return Ok(Materialized::Copied((*name).to_string()));
        }
    }

    if supports_import_synthesis(language) && fix_file != SYNTHESIZED_MANIFEST {
        let imports: Vec<String> = python_imports(sources).into_iter().collect();
        if !imports.is_empty() {
            workspace.write_file(SYNTHESIZED_MANIFEST, &imports.join("\n"))?;
            tracing::debug!(packages = ?imports, "Synthesized requirements.txt from imports");
            return Ok(Materialized::Synthesized(imports));
        }
    }

    Ok(Materialized::Skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_language_table() {
        assert_eq!(
            manifest_candidates("python"),
            ["requirements.txt", "setup.py", "pyproject.toml"]
        );
        assert_eq!(manifest_candidates("TypeScript"), ["package.json"]);
        assert!(manifest_candidates("text").is_empty());
    }

    #[test]
    fn imports_skip_stdlib_and_dedupe() {
        let fix = "import os\nimport requests\nfrom flask import Flask\n";
        let test = "import unittest\nfrom requests import get\n  import indented\n";
        let names: Vec<_> = python_imports([fix, test]).into_iter().collect();
        assert_eq!(names, ["flask", "requests"]);
    }

    #[test]
    fn copies_first_matching_manifest() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("pyproject.toml"), "[project]\n").unwrap();
        std::fs::write(repo.path().join("requirements.txt"), "flask==3.0\n").unwrap();
        let ws = SandboxWorkspace::allocate(None, None).unwrap();

        let result = materialize(&ws, repo.path(), "python", "app.py", ["import yaml"]).unwrap();

        assert_eq!(result, Materialized::Copied("requirements.txt".into()));
        let copied = std::fs::read_to_string(ws.path().join("requirements.txt")).unwrap();
        assert_eq!(copied, "flask==3.0\n");
    }

    #[test]
    fn synthesizes_requirements_for_python() {
        let repo = tempfile::tempdir().unwrap();
        let ws = SandboxWorkspace::allocate(None, None).unwrap();

        let result = materialize(
            &ws,
            repo.path(),
            "python",
            "app.py",
            ["import yaml\nimport json\n", "from requests import get\n"],
        )
        .unwrap();

        assert_eq!(
            result,
            Materialized::Synthesized(vec!["requests".into(), "yaml".into()])
        );
        let written = std::fs::read_to_string(ws.path().join("requirements.txt")).unwrap();
        assert_eq!(written, "requests\nyaml");
    }

    #[test]
    fn skips_when_nothing_applies() {
        let repo = tempfile::tempdir().unwrap();
        let ws = SandboxWorkspace::allocate(None, None).unwrap();

        let python_stdlib_only = materialize(&ws, repo.path(), "python", "app.py", ["import os"]).unwrap();
        assert_eq!(python_stdlib_only, Materialized::Skipped);

        let go = materialize(&ws, repo.path(), "go", "main.go", ["import \"fmt\""]).unwrap();
        assert_eq!(go, Materialized::Skipped);
        assert!(!go.has_manifest());
    }

    #[test]
    fn fix_named_like_a_manifest_is_not_overwritten() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("setup.py"), "ORIGINAL\n").unwrap();
        let ws = SandboxWorkspace::allocate(None, None).unwrap();
        ws.write_file("setup.py", "FIXED\n").unwrap();

        let result = materialize(&ws, repo.path(), "python", "setup.py", ["import yaml"]).unwrap();

        assert_eq!(result, Materialized::Provided("setup.py".into()));
        assert!(result.has_manifest());
        let kept = std::fs::read_to_string(ws.path().join("setup.py")).unwrap();
        assert_eq!(kept, "FIXED\n");
    }

    #[test]
    fn requirements_fix_is_not_replaced_by_synthesis() {
        let repo = tempfile::tempdir().unwrap();
        let ws = SandboxWorkspace::allocate(None, None).unwrap();
        ws.write_file("requirements.txt", "flask==3.0.3\n").unwrap();

        let result =
            materialize(&ws, repo.path(), "python", "requirements.txt", ["import yaml"]).unwrap();

        assert_eq!(result, Materialized::Provided("requirements.txt".into()));
        let kept = std::fs::read_to_string(ws.path().join("requirements.txt")).unwrap();
        assert_eq!(kept, "flask==3.0.3\n");
    }
}
