//! The bounded remediation / verification loop.

use super::{group_by_path, FixGenerator, FixRequest};
use crate::config::RemediationConfig;
use crate::ecosystem::EcosystemProfile;
use crate::error::PipelineError;
use crate::fix::{Finding, Fix};
use crate::oracle::TokenUsage;
use crate::sandbox::SandboxExecutor;
use crate::scan::{LogEntry, ScanContext, StageObserver, STEP_REMEDIATION, STEP_VERIFICATION};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Error context passed on retries when a file has no recorded error.
pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry passes after the first one.
    pub max_retries: u32,
    /// Files remediated per pass; the rest wait.
    pub max_files: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_files: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemediationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_files: config.max_files,
        }
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The last pass left no unverified fixes.
    Converged,
    /// Retries ran out with unverified fixes left.
    GaveUp,
    /// A pass produced no fixes.
    NothingToVerify,
}

pub struct RetryOrchestrator {
    generator: Arc<dyn FixGenerator>,
    executor: SandboxExecutor,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(generator: Arc<dyn FixGenerator>, executor: SandboxExecutor, policy: RetryPolicy) -> Self {
        Self {
            generator,
            executor,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run remediation and verification passes until every fix verifies,
    /// nothing is produced, or retries are exhausted.
    ///
    /// `observer` is told after each remediation and each verification pass;
    /// an error from it (cancellation) stops the loop immediately.
    pub async fn run(
        &self,
        ctx: &mut ScanContext,
        observer: &mut dyn StageObserver,
    ) -> Result<LoopOutcome, PipelineError> {
        let profile = ctx
            .ecosystem
            .clone()
            .unwrap_or_else(EcosystemProfile::fallback_only);
        let groups = group_by_path(&ctx.findings);
        let mut last_errors: HashMap<String, String> = HashMap::new();

        ctx.max_retries = self.policy.max_retries;
        ctx.retry_count = 0;

        loop {
            let retrying = ctx.retry_count > 0;
            let targets = self.targets(&groups, ctx);
            if retrying {
                info!(
                    scan_id = %ctx.scan_id,
                    retry = ctx.retry_count,
                    max = self.policy.max_retries,
                    files = targets.len(),
                    "Retrying remediation"
                );
            }

            let (fixes, usage) = self
                .remediate(ctx, &targets, retrying.then_some(&last_errors))
                .await?;
            let produced = fixes.len();
            ctx.remediation_plan = fixes;
            ctx.push_log(
                LogEntry::new(STEP_REMEDIATION, format!("Generated {produced} fixes"))
                    .with_usage(usage, self.generator.model_name()),
            );
            observer.stage_completed(ctx)?;

            if produced == 0 {
                ctx.push_log(LogEntry::new(STEP_VERIFICATION, "No fixes to verify"));
                observer.stage_completed(ctx)?;
                return Ok(LoopOutcome::NothingToVerify);
            }

            self.verify_plan(ctx, &profile, &mut last_errors).await;
            let verified = ctx.remediation_plan.iter().filter(|f| f.verified).count();
            ctx.push_log(LogEntry::new(
                STEP_VERIFICATION,
                format!("Verified {verified}/{produced} fixes"),
            ));
            observer.stage_completed(ctx)?;

            if verified == produced {
                return Ok(LoopOutcome::Converged);
            }
            if ctx.retry_count >= self.policy.max_retries {
                warn!(
                    scan_id = %ctx.scan_id,
                    unverified = produced - verified,
                    "Max retries ({}) reached, giving up",
                    self.policy.max_retries
                );
                ctx.remediation_plan.clear();
                return Ok(LoopOutcome::GaveUp);
            }
            ctx.retry_count += 1;
        }
    }

    /// Paths to remediate this pass, in discovery order, capped at `max_files`.
    /// Paths whose latest fix verified are done; every other path, including
    /// ones skipped or deferred earlier, is eligible again.
    fn targets<'g>(
        &self,
        groups: &'g IndexMap<String, Vec<Finding>>,
        ctx: &ScanContext,
    ) -> Vec<(&'g str, &'g [Finding])> {
        groups
            .iter()
            .filter(|(path, _)| {
                !ctx
                    .verification
                    .get(path.as_str())
                    .is_some_and(|fix| fix.verified)
            })
            .take(self.policy.max_files)
            .map(|(path, findings)| (path.as_str(), findings.as_slice()))
            .collect()
    }

    async fn remediate(
        &self,
        ctx: &ScanContext,
        targets: &[(&str, &[Finding])],
        last_errors: Option<&HashMap<String, String>>,
    ) -> Result<(Vec<Fix>, TokenUsage), PipelineError> {
        let attempt = ctx.retry_count + 1;
        let mut usage = TokenUsage::default();
        let mut fixes = Vec::with_capacity(targets.len());

        for &(path, findings) in targets {
            let full_path = ctx.repo_path.join(path);
            let content = match tokio::fs::read_to_string(&full_path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path, error = %e, "Could not read source file, skipping");
                    continue;
                }
            };

            let previous_error = last_errors.map(|errors| {
                errors
                    .get(path)
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_ERROR)
            });
            let request = FixRequest {
                path,
                findings,
                content: &content,
                previous_error,
            };

            info!(path, issues = findings.len(), attempt, "Generating fix");
            match self.generator.propose(&request).await {
                Ok(proposal) => {
                    usage += proposal.usage;
                    fixes.push(Fix::new(
                        path,
                        content,
                        proposal.fix_code,
                        proposal.test_code,
                        attempt,
                    ));
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!(path, error = %e, "Fix generation failed, skipping file"),
            }
        }
        Ok((fixes, usage))
    }

    /// Verify each fix of the current plan in order. Never fails: every fix
    /// leaves settled.
    async fn verify_plan(
        &self,
        ctx: &mut ScanContext,
        profile: &EcosystemProfile,
        last_errors: &mut HashMap<String, String>,
    ) {
        for fix in ctx.remediation_plan.iter_mut() {
            let spec = profile.spec_for_path(&fix.path);
            if let Err(e) = self.executor.verify(fix, spec, &ctx.repo_path).await {
                warn!(path = %fix.path, error = %e, "Sandbox setup failed, skipping verification");
                fix.mark_unverified(e.to_string());
            }
            if let Some(error) = &fix.error {
                last_errors.insert(fix.path.clone(), error.clone());
            }
            ctx.verification.insert(fix.path.clone(), fix.clone());
        }
    }
}
