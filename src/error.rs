//! Pipeline-level error taxonomy.
//!
//! Each layer owns its own error type ([`OracleError`], [`StoreError`]);
//! [`PipelineError`] is what escapes a stage and decides how the scan settles.
//! Sandbox errors never get this far: they are recorded on the fix.

use crate::oracle::OracleError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing credentials or unusable settings. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Oracle(OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The persisted scan status was flipped to `cancelled` by someone else.
    #[error("scan was cancelled externally")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<OracleError> for PipelineError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::MissingCredentials(msg) => PipelineError::Configuration(msg),
            other => PipelineError::Oracle(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_become_configuration_errors() {
        let err: PipelineError = OracleError::MissingCredentials("GEMINI_API_KEY".into()).into();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn other_oracle_errors_stay_oracle_errors() {
        let err: PipelineError = OracleError::EmptyResponse.into();
        assert!(matches!(err, PipelineError::Oracle(_)));
        assert!(!err.is_cancelled());
        assert!(PipelineError::Cancelled.is_cancelled());
    }
}
