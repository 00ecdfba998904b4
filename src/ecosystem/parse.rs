//! Strict decoding of the oracle's ecosystem response.
//!
//! The response must be a JSON object mapping extensions to recipes. Every
//! recipe must carry all five fields; command fields are accepted either as a
//! shell-style string or as a token list and always leave here as tokens.

use super::{normalize_extension, SandboxSpec};
use crate::oracle::OracleError;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?(.*?)```").expect("valid fence regex"));

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandField {
    Line(String),
    Tokens(Vec<String>),
}

impl From<CommandField> for Vec<String> {
    fn from(field: CommandField) -> Self {
        match field {
            CommandField::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandField::Tokens(tokens) => tokens,
        }
    }
}

/// Wire shape of one recipe. No field has a default: a missing key fails.
#[derive(Debug, Deserialize)]
struct RawSpec {
    language: String,
    docker_image: String,
    dep_install_cmd: String,
    syntax_cmd: CommandField,
    test_cmd: CommandField,
}

impl From<RawSpec> for SandboxSpec {
    fn from(raw: RawSpec) -> Self {
        Self {
            language: raw.language.trim().to_lowercase(),
            image_ref: raw.docker_image.trim().to_string(),
            dep_install_cmd: raw.dep_install_cmd.trim().to_string(),
            syntax_cmd: raw.syntax_cmd.into(),
            test_cmd: raw.test_cmd.into(),
        }
    }
}

/// Strip an optional Markdown code fence around the JSON body.
pub fn extract_json_body(raw: &str) -> &str {
    let text = raw.trim();
    if let Some(body) = FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        return body.as_str().trim();
    }

    let mut text = text;
    if text.starts_with("```") {
        text = text.split_once('\n').map_or(&text[3..], |(_, rest)| rest);
    }
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Decode an ecosystem response into normalized recipes, in response order.
///
/// Malformed JSON is a [`OracleError::Decode`] (worth another attempt); a
/// well-formed response with a missing or mistyped field is a fatal
/// [`OracleError::InvalidProfile`].
pub fn parse_profile_response(raw: &str) -> Result<IndexMap<String, SandboxSpec>, OracleError> {
    let body = extract_json_body(raw);
    let entries: IndexMap<String, serde_json::Value> = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        OracleError::Decode(format!("{e}: {preview}"))
    })?;

    let mut specs = IndexMap::with_capacity(entries.len());
    for (ext, value) in entries {
        let raw: RawSpec = serde_json::from_value(value)
            .map_err(|e| OracleError::InvalidProfile(format!("entry for '{ext}': {e}")))?;
        specs.insert(normalize_extension(&ext), raw.into());
    }
    Ok(specs)
}
