//! Findings coming out of the static scan and the fixes proposed for them.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One static-analysis finding, attached to a repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub path: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(alias = "msg")]
    pub message: String,
}

/// A proposed replacement for one source file, plus optional generated test.
///
/// `verified` and `error` are only written by the sandbox executor. Once a fix
/// has been through verification, `verified == true` means `error` is `None`
/// and `verified == false` means `error` holds a non-empty diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub path: String,
    pub original_code: String,
    pub fix_code: String,
    pub test_code: Option<String>,
    pub verified: bool,
    pub error: Option<String>,
    pub attempt_number: u32,
}

impl Fix {
    pub fn new(
        path: impl Into<String>,
        original_code: impl Into<String>,
        fix_code: impl Into<String>,
        test_code: Option<String>,
        attempt_number: u32,
    ) -> Self {
        Self {
            path: path.into(),
            original_code: original_code.into(),
            fix_code: fix_code.into(),
            test_code,
            verified: false,
            error: None,
            attempt_number,
        }
    }

    /// Base name of the fixed file (`src/app/db.py` -> `db.py`).
    pub fn file_name(&self) -> Option<String> {
        Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    /// Generated test content, ignoring whitespace-only tests.
    pub fn test_source(&self) -> Option<&str> {
        self.test_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
    }

    pub(crate) fn mark_verified(&mut self) {
        self.verified = true;
        self.error = None;
    }

    pub(crate) fn mark_unverified(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.verified = false;
        self.error = Some(if error.is_empty() {
            "Verification failed without output".to_string()
        } else {
            error
        });
    }

    /// Whether the fix has been through verification.
    pub fn is_settled(&self) -> bool {
        self.verified || self.error.is_some()
    }
}
