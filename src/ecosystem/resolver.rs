//! Oracle-backed ecosystem resolution with bounded retries.

use super::parse::parse_profile_response;
use super::summary::{dependency_summary, library_summary};
use super::EcosystemProfile;
use crate::oracle::{Oracle, OracleError, TokenUsage};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_ORACLE_ATTEMPTS: u32 = 3;

/// Wait before retry `n` is `n * BACKOFF_STEP`.
const BACKOFF_STEP: Duration = Duration::from_secs(2);

const PROMPT_TEMPLATE: &str = r#"You configure sandboxes that check proposed code fixes. From the scan evidence below, decide which container environment can check each file type in this project.

## Dependency files (dependency scanner)
{dependency_summary}

## Libraries imported by the source code
{library_summary}

## Output
Return ONLY a JSON object. Each KEY is a file extension (".py", ".js", ".tsx", ".env", ...). Each VALUE is an object with exactly these keys:
- "language": language of files with that extension ("python", "javascript", "typescript", "text", ...)
- "docker_image": the smallest official image able to run it ("python:3.11-alpine", "node:20-alpine", "alpine:latest")
- "dep_install_cmd": shell command installing dependencies from the project root mounted at /check, with quiet flags and stderr sent to /dev/null; "" when nothing needs installing
- "syntax_cmd": array of command tokens that checks syntax of one file, e.g. ["python", "-m", "py_compile"]
- "test_cmd": array of command tokens that runs one test file, e.g. ["python"]

Example:
{
  ".py": {"language": "python", "docker_image": "python:3.11-alpine", "dep_install_cmd": "pip install -r requirements.txt -q", "syntax_cmd": ["python", "-m", "py_compile"], "test_cmd": ["python"]},
  ".tsx": {"language": "typescript", "docker_image": "node:20-alpine", "dep_install_cmd": "npm install --no-audit --no-fund --ignore-scripts --silent", "syntax_cmd": ["npx", "tsc", "--noEmit"], "test_cmd": ["npx", "jest"]},
  ".env": {"language": "text", "docker_image": "alpine:latest", "dep_install_cmd": "", "syntax_cmd": [], "test_cmd": []}
}

## Rules
- Cover every extension the evidence suggests is present.
- Configuration files (YAML, JSON, ENV) get the generic alpine recipe with empty commands.
- No markdown, no commentary: the JSON object only.
"#;

/// Result of resolving a scan's ecosystem.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub profile: EcosystemProfile,
    pub usage: TokenUsage,
    /// `None` when the fallback profile was used without asking the oracle.
    pub model: Option<String>,
}

pub struct EcosystemResolver {
    oracle: Arc<dyn Oracle>,
    max_attempts: u32,
}

impl EcosystemResolver {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            max_attempts: MAX_ORACLE_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Resolve the per-extension recipes for one scan.
    ///
    /// With no evidence at all the generic fallback profile is returned and
    /// the oracle is never contacted.
    pub async fn resolve(
        &self,
        dependency_report: &Value,
        detected_libraries: &IndexMap<String, Vec<String>>,
    ) -> Result<Resolution, OracleError> {
        let dependencies = dependency_summary(dependency_report);
        let libraries = library_summary(detected_libraries);

        if dependencies.trim().is_empty() && libraries.trim().is_empty() {
            info!("No dependency evidence found, using the generic fallback sandbox");
            return Ok(Resolution {
                profile: EcosystemProfile::fallback_only(),
                usage: TokenUsage::default(),
                model: None,
            });
        }

        let prompt = render_prompt(&dependencies, &libraries);
        let (specs, usage) = self.ask_with_retry(&prompt).await?;
        let profile = EcosystemProfile::new(specs);
        info!(extensions = profile.len(), "Resolved sandbox recipes");

        Ok(Resolution {
            profile,
            usage,
            model: Some(self.oracle.model_name().to_string()),
        })
    }

    async fn ask_with_retry(
        &self,
        prompt: &str,
    ) -> Result<(IndexMap<String, super::SandboxSpec>, TokenUsage), OracleError> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            debug!(attempt, max = self.max_attempts, "Asking oracle for sandbox recipes");
            match self.ask_once(prompt).await {
                Ok(resolved) => return Ok(resolved),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, error = %e, "Ecosystem oracle attempt failed");
                    if attempt < self.max_attempts {
                        let wait = BACKOFF_STEP * attempt;
                        debug!(wait_secs = wait.as_secs(), "Retrying ecosystem resolution");
                        tokio::time::sleep(wait).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(OracleError::Exhausted {
            attempts: self.max_attempts,
            last: Box::new(last_error.unwrap_or(OracleError::EmptyResponse)),
        })
    }

    async fn ask_once(
        &self,
        prompt: &str,
    ) -> Result<(IndexMap<String, super::SandboxSpec>, TokenUsage), OracleError> {
        let reply = self.oracle.complete(prompt).await?;
        let specs = parse_profile_response(&reply.text)?;
        Ok((specs, reply.usage))
    }
}

fn render_prompt(dependencies: &str, libraries: &str) -> String {
    let dependencies = if dependencies.trim().is_empty() {
        "No dependency scan data available."
    } else {
        dependencies
    };
    let libraries = if libraries.trim().is_empty() {
        "No libraries detected from source."
    } else {
        libraries
    };
    PROMPT_TEMPLATE
        .replace("{dependency_summary}", dependencies)
        .replace("{library_summary}", libraries)
}
