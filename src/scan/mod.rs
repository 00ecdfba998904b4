//! Scan lifecycle: the state threaded through every stage, the checkpoint
//! recorder that persists it, and the pipeline that drives the stages.

pub mod checkpoint;
pub mod pipeline;
pub mod snapshot;

pub use checkpoint::CheckpointRecorder;
pub use pipeline::ScanPipeline;
pub use snapshot::ScanSnapshot;

use crate::ecosystem::EcosystemProfile;
use crate::error::PipelineError;
use crate::fix::{Finding, Fix};
use crate::oracle::TokenUsage;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const STEP_ECOSYSTEM: &str = "Ecosystem Detection";
pub const STEP_REMEDIATION: &str = "Remediation";
pub const STEP_VERIFICATION: &str = "Verification";

/// Persisted scan status. `finished`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Finished => "finished",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Finished | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown scan status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ScanStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "finished" => Ok(ScanStatus::Finished),
            "failed" => Ok(ScanStatus::Failed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One progress record, flushed to the store by the checkpoint recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub model_name: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            tokens_input: 0,
            tokens_output: 0,
            model_name: None,
            message: message.into(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage, model_name: Option<&str>) -> Self {
        self.tokens_input = usage.input;
        self.tokens_output = usage.output;
        self.model_name = model_name.map(str::to_string);
        self
    }
}

/// Work unit handed to the worker by the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    #[serde(default)]
    pub repo_url: String,
    /// Local checkout the findings refer to.
    pub repo_path: PathBuf,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    /// `owner/name`, used for commit statuses.
    #[serde(default)]
    pub repo_full_name: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Raw dependency-scanner report.
    #[serde(default)]
    pub dependency_report: Value,
    /// Language to imported library names.
    #[serde(default)]
    pub detected_libraries: IndexMap<String, Vec<String>>,
}

/// Returned to whoever submitted the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub status: ScanStatus,
    /// Why the scan failed, for `failed` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanOutcome {
    pub fn new(scan_id: impl Into<String>, status: ScanStatus) -> Self {
        Self {
            scan_id: scan_id.into(),
            status,
            error: None,
        }
    }
}

/// State threaded through the stages of one scan.
///
/// The resolver fills `ecosystem`; the retry orchestrator owns
/// `remediation_plan`, `verification` and `retry_count`; the checkpoint
/// recorder tracks how many of `logs` it has flushed.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub scan_id: String,
    pub repo_path: PathBuf,
    pub findings: Vec<Finding>,
    pub ecosystem: Option<EcosystemProfile>,
    /// Fixes produced by the latest remediation pass.
    pub remediation_plan: Vec<Fix>,
    /// Latest verified or failed fix per path, in first-seen order.
    pub verification: IndexMap<String, Fix>,
    pub retry_count: u32,
    pub max_retries: u32,
    logs: Vec<LogEntry>,
}

impl ScanContext {
    pub fn new(scan_id: impl Into<String>, job: &ScanJob, max_retries: u32) -> Self {
        Self {
            scan_id: scan_id.into(),
            repo_path: job.repo_path.clone(),
            findings: job.findings.clone(),
            ecosystem: None,
            remediation_plan: Vec::new(),
            verification: IndexMap::new(),
            retry_count: 0,
            max_retries,
            logs: Vec::new(),
        }
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        tracing::info!(scan_id = %self.scan_id, step = %entry.step, "{}", entry.message);
        self.logs.push(entry);
    }

    /// Logs in the order they were produced. Append-only.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Paths whose latest fix is verified.
    pub fn verified_count(&self) -> usize {
        self.verification.values().filter(|fix| fix.verified).count()
    }
}

/// Notified after every completed stage. Returning an error stops the scan.
pub trait StageObserver: Send {
    fn stage_completed(&mut self, ctx: &ScanContext) -> Result<(), PipelineError>;
}
