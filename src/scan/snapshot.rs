//! Cumulative, size-bounded view of a scan written at every checkpoint.

use super::{LogEntry, ScanContext};
use crate::ecosystem::SandboxSpec;
use crate::fix::Fix;
use crate::util::truncate_chars;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const MAX_CODE_CHARS: usize = 3000;
const MAX_TEST_CHARS: usize = 2000;
const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub path: String,
    pub verified: bool,
    pub error: Option<String>,
    pub attempt_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub path: String,
    pub original_code: String,
    pub fix_code: String,
    pub test_code: Option<String>,
    pub attempt_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    /// Extension to recipe, empty until the ecosystem stage completes.
    pub ecosystem_profile: IndexMap<String, SandboxSpec>,
    pub findings_count: usize,
    pub remediation: Vec<PlanRecord>,
    pub verification: Vec<VerificationRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub logs: Vec<LogEntry>,
}

impl ScanSnapshot {
    pub fn capture(ctx: &ScanContext) -> Self {
        let ecosystem_profile = ctx
            .ecosystem
            .as_ref()
            .map(|profile| {
                profile
                    .iter()
                    .map(|(ext, spec)| (ext.to_string(), spec.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            ecosystem_profile,
            findings_count: ctx.findings.len(),
            remediation: ctx.remediation_plan.iter().map(plan_record).collect(),
            verification: ctx.verification.values().map(verification_record).collect(),
            retry_count: ctx.retry_count,
            max_retries: ctx.max_retries,
            logs: ctx.logs().to_vec(),
        }
    }
}

fn plan_record(fix: &Fix) -> PlanRecord {
    PlanRecord {
        path: fix.path.clone(),
        original_code: truncate_chars(&fix.original_code, MAX_CODE_CHARS),
        fix_code: truncate_chars(&fix.fix_code, MAX_CODE_CHARS),
        test_code: fix
            .test_code
            .as_deref()
            .map(|test| truncate_chars(test, MAX_TEST_CHARS)),
        attempt_number: fix.attempt_number,
    }
}

fn verification_record(fix: &Fix) -> VerificationRecord {
    VerificationRecord {
        path: fix.path.clone(),
        verified: fix.verified,
        error: fix
            .error
            .as_deref()
            .map(|error| truncate_chars(error, MAX_ERROR_CHARS)),
        attempt_number: fix.attempt_number,
    }
}
