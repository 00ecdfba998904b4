//! Gemini provider: HTTP client for the `generateContent` REST endpoint.

use super::{Oracle, OracleError, OracleReply, TokenUsage};
use crate::config::OracleConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Base URL for the Gemini REST API.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub struct GeminiOracle {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiOracle {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
            http,
        })
    }

    pub fn from_config(config: &OracleConfig) -> anyhow::Result<Self> {
        let oracle = Self::new(
            config.api_key.clone().unwrap_or_default(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(oracle.with_base_url(&config.base_url))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<OracleReply, OracleError> {
        if self.api_key.trim().is_empty() {
            return Err(OracleError::MissingCredentials(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }

        let body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
        });

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());

        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body_text)
            .map_err(|e| OracleError::Decode(format!("{e}\nBody: {body_text}")))?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(OracleError::EmptyResponse);
        }

        let usage = parsed
            .usage_metadata
            .map(|meta| TokenUsage {
                input: meta.prompt_token_count,
                output: meta.candidates_token_count,
            })
            .unwrap_or_default();

        tracing::debug!(
            model = %self.model,
            input_tokens = usage.input,
            output_tokens = usage.output,
            "Gemini call completed"
        );

        Ok(OracleReply {
            text: text.to_string(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle(server: &MockServer, key: &str) -> GeminiOracle {
        GeminiOracle::new(key, DEFAULT_MODEL, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn complete_joins_parts_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "hello " }, { "text": "world" }] }
                }],
                "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 4 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = oracle(&server, "secret").complete("hi").await.unwrap();
        assert_eq!(reply.text, "hello world");
        assert_eq!(reply.usage, TokenUsage { input: 12, output: 4 });
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = oracle(&server, "  ").complete("hi").await.unwrap_err();
        assert!(matches!(err, OracleError::MissingCredentials(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn server_errors_are_retryable_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = oracle(&server, "k").complete("hi").await.unwrap_err();
        match &err {
            OracleError::Status { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn empty_candidates_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&server)
            .await;

        let err = oracle(&server, "k").complete("hi").await.unwrap_err();
        assert!(matches!(err, OracleError::EmptyResponse));
    }
}
