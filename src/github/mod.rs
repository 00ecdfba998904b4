//! Commit status reporting.
//!
//! Statuses are a courtesy to the pull request author: failures to post are
//! logged by the caller and never change the outcome of a scan.

use crate::config::GitHubConfig;
use crate::scan::ScanJob;
use crate::util::truncate_chars;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Base URL for the GitHub REST API.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Context name the statuses are posted under.
pub const STATUS_CONTEXT: &str = "vulnfix";

const MAX_DESCRIPTION_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// Repository and commit a status is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTarget {
    /// `owner/name`.
    pub repo_full_name: String,
    pub sha: String,
}

impl CommitTarget {
    /// `None` unless the job names a repository and a concrete commit.
    pub fn from_job(job: &ScanJob) -> Option<Self> {
        let repo = job.repo_full_name.as_deref()?.trim();
        let sha = job.commit_sha.as_deref()?.trim();
        if repo.is_empty() || sha.is_empty() || sha == "HEAD" {
            return None;
        }
        Some(Self {
            repo_full_name: repo.to_string(),
            sha: sha.to_string(),
        })
    }
}

#[async_trait]
pub trait CommitStatusReporter: Send + Sync {
    async fn report(
        &self,
        target: &CommitTarget,
        state: CommitState,
        description: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    state: CommitState,
    description: String,
    context: &'a str,
}

/// Posts statuses through `POST /repos/{owner}/{repo}/statuses/{sha}`.
pub struct GitHubStatusReporter {
    token: String,
    api_base: String,
    http: reqwest::Client,
}

impl GitHubStatusReporter {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("vulnfix/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(Self {
            token: token.into(),
            api_base: api_base.into(),
            http,
        })
    }

    /// `Ok(None)` when no token is configured.
    pub fn from_config(config: &GitHubConfig) -> anyhow::Result<Option<Self>> {
        match config.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => {
                Self::new(token, config.api_base.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl CommitStatusReporter for GitHubStatusReporter {
    async fn report(
        &self,
        target: &CommitTarget,
        state: CommitState,
        description: &str,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{}/repos/{}/statuses/{}",
            self.api_base.trim_end_matches('/'),
            target.repo_full_name,
            target.sha
        );
        let body = StatusBody {
            state,
            description: truncate_chars(description, MAX_DESCRIPTION_CHARS),
            context: STATUS_CONTEXT,
        };

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("GitHub API request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<unreadable>".to_string());
            anyhow::bail!("GitHub API returned {status}: {text}");
        }

        tracing::debug!(repo = %target.repo_full_name, sha = %target.sha, ?state, "Posted commit status");
        Ok(())
    }
}
