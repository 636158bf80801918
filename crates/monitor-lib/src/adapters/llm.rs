//! LLM adapter over an Anthropic-style messages endpoint
//!
//! The integration is deliberately narrow: prompt in, text out, bounded by a
//! per-call timeout. `safeMode` swaps in [`DisabledLlm`] so no network call
//! can ever be made.

use super::{async_trait, bounded, LlmAdapter};
use crate::cancel::CancelToken;
use crate::error::{AdapterError, AdapterResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const MAX_TOKENS: u32 = 2048;

/// Investigations need reproducible output, so temperature is clamped low.
const MAX_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub call_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: MAX_TEMPERATURE,
            call_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

pub struct HttpLlm {
    client: Client,
    api_key: Option<String>,
    config: LlmConfig,
}

impl HttpLlm {
    pub fn new(api_key: Option<String>, config: LlmConfig) -> Self {
        let config = LlmConfig {
            temperature: config.temperature.min(MAX_TEMPERATURE),
            ..config
        };
        Self {
            client: Client::new(),
            api_key,
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("MONITOR_LLM_API_KEY").ok(), LlmConfig::default())
    }
}

#[async_trait]
impl LlmAdapter for HttpLlm {
    fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, cancel: &CancelToken, prompt: &str) -> AdapterResult<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AdapterError::Unavailable("llm api key not configured".to_string()))?;

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: self.config.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        bounded(self.config.call_timeout, cancel, async {
            let response = self
                .client
                .post(&self.config.api_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", API_VERSION)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| AdapterError::Unavailable(format!("llm request: {e}")))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AdapterError::RateLimited);
            }

            let body = response
                .text()
                .await
                .map_err(|e| AdapterError::Unavailable(format!("llm body: {e}")))?;

            if !status.is_success() {
                return Err(AdapterError::Unavailable(format!(
                    "llm api error ({status}): {}",
                    body.chars().take(300).collect::<String>()
                )));
            }

            let parsed: MessagesResponse = serde_json::from_str(&body)
                .map_err(|e| AdapterError::Malformed(format!("llm response: {e}")))?;

            let text: String = parsed
                .content
                .iter()
                .filter(|block| block.block_type == "text")
                .map(|block| block.text.as_str())
                .collect();

            if text.is_empty() {
                return Err(AdapterError::Malformed("empty completion".to_string()));
            }
            Ok(text)
        })
        .await
    }
}

/// Stand-in used when `safeMode` is on; every call fails fast.
pub struct DisabledLlm;

#[async_trait]
impl LlmAdapter for DisabledLlm {
    fn enabled(&self) -> bool {
        false
    }

    async fn complete(&self, _cancel: &CancelToken, _prompt: &str) -> AdapterResult<String> {
        Err(AdapterError::Unavailable("llm disabled by safe mode".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_is_clamped() {
        let llm = HttpLlm::new(
            Some("key".to_string()),
            LlmConfig {
                temperature: 0.9,
                ..LlmConfig::default()
            },
        );
        assert!(llm.config.temperature <= MAX_TEMPERATURE);
    }

    #[test]
    fn test_enabled_requires_key() {
        assert!(HttpLlm::new(Some("key".to_string()), LlmConfig::default()).enabled());
        assert!(!HttpLlm::new(None, LlmConfig::default()).enabled());
        assert!(!DisabledLlm.enabled());
    }

    #[tokio::test]
    async fn test_disabled_llm_rejects_calls() {
        let result = DisabledLlm
            .complete(&CancelToken::never(), "prompt")
            .await;
        assert!(matches!(result, Err(AdapterError::Unavailable(_))));
    }
}
