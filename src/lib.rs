//! vulnfix: sandboxed verification of generated vulnerability fixes.
//!
//! A scan moves through three stages:
//!
//! 1. [`ecosystem`] resolves, from dependency evidence, which container image
//!    and commands can check each file type.
//! 2. [`remediation`] asks a fix generator for a corrected file (plus a test)
//!    per affected path and hands every proposal to the [`sandbox`] executor.
//!    Failed verifications feed back into a bounded number of retry passes.
//! 3. [`scan`] checkpoints progress after every stage, observes external
//!    cancellation and settles the scan in exactly one terminal state.

pub mod config;
pub mod ecosystem;
pub mod error;
pub mod fix;
pub mod github;
pub mod oracle;
pub mod remediation;
pub mod sandbox;
pub mod scan;
pub mod store;
pub mod util;

pub use config::Config;
pub use ecosystem::{EcosystemProfile, EcosystemResolver, SandboxSpec};
pub use error::PipelineError;
pub use fix::{Finding, Fix};
pub use remediation::{RetryOrchestrator, RetryPolicy};
pub use sandbox::{ContainerRuntime, DockerCliRuntime, SandboxExecutor};
pub use scan::{ScanContext, ScanJob, ScanOutcome, ScanPipeline, ScanStatus};
pub use store::{ScanStore, SqliteScanStore};
