//! Language-model oracle boundary.
//!
//! The resolver and the fix generator only see the [`Oracle`] trait; the
//! shipped provider is [`gemini::GeminiOracle`].

pub mod gemini;

pub use gemini::GeminiOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Token counts reported for one or more oracle calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
    }
}

/// Text returned by a single oracle call.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("missing oracle credentials: {0}")]
    MissingCredentials(String),

    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle returned no text")]
    EmptyResponse,

    #[error("failed to decode oracle response: {0}")]
    Decode(String),

    /// The response decoded but violates the expected shape.
    #[error("invalid sandbox profile: {0}")]
    InvalidProfile(String),

    #[error("oracle failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<OracleError>,
    },
}

impl OracleError {
    /// Fatal errors abort the retry loop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OracleError::MissingCredentials(_)
                | OracleError::InvalidProfile(_)
                | OracleError::Exhausted { .. }
        )
    }
}

/// A remote model that turns a prompt into text.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Model identifier recorded in scan logs.
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<OracleReply, OracleError>;
}
