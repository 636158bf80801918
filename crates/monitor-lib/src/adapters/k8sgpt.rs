//! Analyzer adapter backed by the `k8sgpt` binary

use super::{async_trait, bounded, AnalyzerAdapter};
use crate::cancel::CancelToken;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{Diagnostic, Severity};
use serde_json::Value;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::process::Command;

pub struct K8sgptAnalyzer {
    binary_path: String,
    call_timeout: Duration,
}

impl K8sgptAnalyzer {
    pub fn new(binary_path: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            call_timeout,
        }
    }
}

#[async_trait]
impl AnalyzerAdapter for K8sgptAnalyzer {
    async fn scan(
        &self,
        cancel: &CancelToken,
        namespace: Option<&str>,
    ) -> AdapterResult<Vec<Diagnostic>> {
        let path = self.binary_path.clone();
        let namespace = namespace.map(str::to_string);

        let stdout = bounded(self.call_timeout, cancel, async move {
            let mut cmd = Command::new(&path);
            cmd.args(["analyze", "--output", "json"]);
            if let Some(ns) = &namespace {
                cmd.args(["--namespace", ns]);
            }

            let output = cmd.kill_on_drop(true).output().await.map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    AdapterError::ToolMissing(path.clone())
                } else {
                    AdapterError::Unavailable(format!("k8sgpt: {e}"))
                }
            })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AdapterError::Unavailable(
                    stderr.trim().chars().take(300).collect(),
                ));
            }

            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
        .await?;

        let value: Value = serde_json::from_str(&stdout)
            .map_err(|e| AdapterError::Malformed(format!("k8sgpt json: {e}")))?;
        Ok(parse_results(&value))
    }
}

/// Convert the k8sgpt result list into diagnostics.
///
/// Output shape: `{"results": [{"kind", "name", "error": [{"Text": …}], …}]}`
fn parse_results(value: &Value) -> Vec<Diagnostic> {
    value
        .get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|result| {
                    let kind = result.get("kind").and_then(Value::as_str).unwrap_or("Resource");
                    let name = result.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    let description = result
                        .get("error")
                        .and_then(Value::as_array)
                        .map(|errors| {
                            errors
                                .iter()
                                .filter_map(|e| e.get("Text").and_then(Value::as_str))
                                .collect::<Vec<_>>()
                                .join("; ")
                        })
                        .unwrap_or_default();

                    Diagnostic {
                        title: format!("{kind} {name} flagged by analyzer"),
                        description,
                        severity: Severity::Medium,
                        resource: Some(name.to_string()),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_results() {
        let value = json!({"results": [{
            "kind": "Pod",
            "name": "frontend/broken-image-app-x",
            "error": [
                {"Text": "Back-off pulling image nginx:nonexistent-tag"},
                {"Text": "image pull failed"}
            ]
        }]});

        let diagnostics = parse_results(&value);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].title.contains("Pod"));
        assert!(diagnostics[0].description.contains("nginx:nonexistent-tag"));
        assert_eq!(
            diagnostics[0].resource.as_deref(),
            Some("frontend/broken-image-app-x")
        );
    }

    #[test]
    fn test_parse_results_empty() {
        assert!(parse_results(&json!({})).is_empty());
        assert!(parse_results(&json!({"results": []})).is_empty());
    }
}
