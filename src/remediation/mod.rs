//! Remediation: asking for fixes and looping them through verification.

pub mod oracle_fixer;
pub mod retry;

pub use oracle_fixer::OracleFixGenerator;
pub use retry::{LoopOutcome, RetryOrchestrator, RetryPolicy};

use crate::fix::Finding;
use crate::oracle::{OracleError, TokenUsage};
use async_trait::async_trait;
use indexmap::IndexMap;

/// Everything the generator gets for one file.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub path: &'a str,
    pub findings: &'a [Finding],
    pub content: &'a str,
    /// Most recent verification error for this path, on retry passes only.
    pub previous_error: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixProposal {
    pub fix_code: String,
    pub test_code: Option<String>,
    pub usage: TokenUsage,
}

/// Produces a corrected file (and optionally a test) for a set of findings.
#[async_trait]
pub trait FixGenerator: Send + Sync {
    /// Recorded on remediation log entries.
    fn model_name(&self) -> Option<&str> {
        None
    }

    async fn propose(&self, request: &FixRequest<'_>) -> Result<FixProposal, OracleError>;
}

/// Group findings by path, keeping the order paths were first seen.
pub fn group_by_path(findings: &[Finding]) -> IndexMap<String, Vec<Finding>> {
    let mut groups: IndexMap<String, Vec<Finding>> = IndexMap::new();
    for finding in findings {
        groups
            .entry(finding.path.clone())
            .or_default()
            .push(finding.clone());
    }
    groups
}
