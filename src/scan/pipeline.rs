//! Drives one scan through its stages and settles it in a terminal state.

use super::{
    CheckpointRecorder, LogEntry, ScanContext, ScanJob, ScanOutcome, ScanStatus, STEP_ECOSYSTEM,
};
use crate::ecosystem::EcosystemResolver;
use crate::error::PipelineError;
use crate::github::{CommitState, CommitStatusReporter, CommitTarget};
use crate::remediation::RetryOrchestrator;
use crate::store::{NewScan, ScanStore};
use crate::util::truncate_chars;
use std::sync::Arc;
use tracing::{error, info, warn};

const MAX_FAILURE_MESSAGE_CHARS: usize = 100;

pub struct ScanPipeline {
    resolver: EcosystemResolver,
    orchestrator: RetryOrchestrator,
    store: Arc<dyn ScanStore>,
    reporter: Option<Arc<dyn CommitStatusReporter>>,
}

impl ScanPipeline {
    pub fn new(
        resolver: EcosystemResolver,
        orchestrator: RetryOrchestrator,
        store: Arc<dyn ScanStore>,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            store,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn CommitStatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Create a scan row for `job` and run it.
    ///
    /// Only a failure to create the row is an `Err`; everything after that
    /// settles into the returned outcome.
    pub async fn run(&self, job: &ScanJob) -> Result<ScanOutcome, PipelineError> {
        let scan_id = self.store.create_scan(&NewScan {
            repo_url: job.repo_url.clone(),
            commit_sha: job.commit_sha.clone(),
            pr_number: job.pr_number,
            max_retries: self.orchestrator.policy().max_retries,
        })?;
        Ok(self.run_scan(&scan_id, job).await)
    }

    /// Run the stages for an existing scan row.
    pub async fn run_scan(&self, scan_id: &str, job: &ScanJob) -> ScanOutcome {
        let target = CommitTarget::from_job(job);
        info!(scan_id, repo = %job.repo_url, findings = job.findings.len(), "Starting scan");
        self.report(target.as_ref(), CommitState::Pending, "Security scan in progress...")
            .await;

        let mut ctx = ScanContext::new(scan_id, job, self.orchestrator.policy().max_retries);
        let mut recorder = CheckpointRecorder::new(self.store.clone(), scan_id);

        let settled = match self.run_stages(&mut ctx, &mut recorder, job).await {
            Ok(()) => self
                .store
                .finalize_status(scan_id, ScanStatus::Finished)
                .map_err(PipelineError::from),
            Err(e) => Err(e),
        };

        match settled {
            Ok(true) => {
                info!(scan_id, verified = ctx.verified_count(), "Scan finished");
                let found = job.findings.len();
                if found > 0 {
                    let description = format!("Found {found} vulnerabilities");
                    self.report(target.as_ref(), CommitState::Failure, &description)
                        .await;
                } else {
                    self.report(target.as_ref(), CommitState::Success, "No vulnerabilities found")
                        .await;
                }
                ScanOutcome::new(scan_id, ScanStatus::Finished)
            }
            Ok(false) | Err(PipelineError::Cancelled) => self.cancelled(scan_id, target.as_ref()).await,
            Err(err) => self.fail(&ctx, &mut recorder, err, target.as_ref()).await,
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut ScanContext,
        recorder: &mut CheckpointRecorder,
        job: &ScanJob,
    ) -> Result<(), PipelineError> {
        let resolution = self
            .resolver
            .resolve(&job.dependency_report, &job.detected_libraries)
            .await?;
        ctx.push_log(
            LogEntry::new(
                STEP_ECOSYSTEM,
                format!("Resolved {} sandbox recipes", resolution.profile.len()),
            )
            .with_usage(resolution.usage, resolution.model.as_deref()),
        );
        ctx.ecosystem = Some(resolution.profile);
        recorder.checkpoint(ctx)?;

        let outcome = self.orchestrator.run(ctx, recorder).await?;
        info!(scan_id = %ctx.scan_id, ?outcome, retries = ctx.retry_count, "Remediation loop ended");

        recorder.checkpoint(ctx)
    }

    async fn cancelled(&self, scan_id: &str, target: Option<&CommitTarget>) -> ScanOutcome {
        info!(scan_id, "Scan cancelled, leaving status untouched");
        self.report(target, CommitState::Error, "Scan cancelled").await;
        ScanOutcome::new(scan_id, ScanStatus::Cancelled)
    }

    /// One best-effort checkpoint, then `failed` unless someone cancelled.
    async fn fail(
        &self,
        ctx: &ScanContext,
        recorder: &mut CheckpointRecorder,
        err: PipelineError,
        target: Option<&CommitTarget>,
    ) -> ScanOutcome {
        let scan_id = ctx.scan_id.as_str();
        error!(scan_id, error = %err, "Scan failed");

        if matches!(self.store.load_status(scan_id), Ok(ScanStatus::Cancelled)) {
            return self.cancelled(scan_id, target).await;
        }

        if let Err(e) = recorder.flush(ctx) {
            warn!(scan_id, error = %e, "Final checkpoint failed");
        }
        match self.store.finalize_status(scan_id, ScanStatus::Failed) {
            Ok(true) => {}
            Ok(false) => return self.cancelled(scan_id, target).await,
            Err(e) => warn!(scan_id, error = %e, "Failed to mark scan as failed"),
        }

        let message = err.to_string();
        let description = format!(
            "Scan failed: {}",
            truncate_chars(&message, MAX_FAILURE_MESSAGE_CHARS)
        );
        self.report(target, CommitState::Error, &description).await;

        ScanOutcome {
            error: Some(message),
            ..ScanOutcome::new(scan_id, ScanStatus::Failed)
        }
    }

    async fn report(&self, target: Option<&CommitTarget>, state: CommitState, description: &str) {
        let (Some(reporter), Some(target)) = (self.reporter.as_ref(), target) else {
            return;
        };
        if let Err(e) = reporter.report(target, state, description).await {
            warn!(repo = %target.repo_full_name, error = %e, "Failed to post commit status");
        }
    }
}
