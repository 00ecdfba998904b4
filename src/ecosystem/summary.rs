//! Plain-text summaries of scan evidence, embedded in the ecosystem prompt.

use indexmap::IndexMap;
use serde_json::Value;

/// Packages listed per dependency file.
pub const MAX_PACKAGES_PER_TARGET: usize = 20;

/// Summarize a dependency-scanner report (`Results[]` with `Target`, `Type`
/// and `Packages[].Name`). Returns an empty string when there is nothing to
/// report.
pub fn dependency_summary(report: &Value) -> String {
    let Some(results) = report.get("Results").and_then(Value::as_array) else {
        return String::new();
    };

    results
        .iter()
        .map(|result| {
            let target = result
                .get("Target")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let kind = result
                .get("Type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let names: Vec<&str> = result
                .get("Packages")
                .and_then(Value::as_array)
                .map(|pkgs| {
                    pkgs.iter()
                        .take(MAX_PACKAGES_PER_TARGET)
                        .map(|p| p.get("Name").and_then(Value::as_str).unwrap_or(""))
                        .collect()
                })
                .unwrap_or_default();
            let packages = if names.is_empty() {
                "no packages listed".to_string()
            } else {
                names.join(", ")
            };
            format!("- File: {target} | Type: {kind} | Packages: {packages}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarize libraries detected from source imports, one line per language.
pub fn library_summary(libraries: &IndexMap<String, Vec<String>>) -> String {
    libraries
        .iter()
        .map(|(lang, libs)| format!("- {lang}: {}", libs.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}
