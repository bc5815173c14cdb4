//! LLM completion client abstraction and implementations.
//!
//! Mirrors [`crate::embedding`]'s provider-dispatch shape: a small trait
//! ([`crate::storage::LlmClient`]) plus a `"disabled"` implementation that
//! always fails with [`crate::error::ErrorKind::UpstreamUnavailable`] (driving
//! every caller down the rule-based fallback path by construction) and an
//! `"openai"` chat-completions implementation with the same retry/backoff
//! shape as [`crate::embedding::embed_openai`].

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{CoreError, CoreResult};
use crate::storage::LlmClient;

/// Client for a `provider = "disabled"` configuration. Every call fails,
/// which is exactly what routes the summarizer and extractor down their
/// rule-based / seed-graph fallback paths.
pub struct DisabledLlmClient;

#[async_trait]
impl LlmClient for DisabledLlmClient {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> CoreResult<String> {
        Err(CoreError::UpstreamUnavailable(
            "LLM provider is disabled".to_string(),
        ))
    }
}

/// Client calling the OpenAI chat completions API. Used for document
/// summarization and entity/relationship extraction prompts.
pub struct OpenAiLlmClient {
    model: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiLlmClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            anyhow::bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> CoreResult<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CoreError::UpstreamUnavailable("OPENAI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| CoreError::UpstreamUnavailable(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.0,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| CoreError::ContentMalformed(e.to_string()))?;
                        return parse_chat_response(&json);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(CoreError::UpstreamUnavailable(format!(
                            "OpenAI API error {}: {}",
                            status, text
                        )));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(CoreError::UpstreamUnavailable(format!(
                        "OpenAI API error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(CoreError::UpstreamUnavailable(e.to_string()));
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::UpstreamUnavailable("LLM call failed after retries".to_string())))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> CoreResult<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CoreError::ContentMalformed("missing choices[0].message.content".to_string()))
}

/// Construct the configured [`LlmClient`]. `"disabled"` is always available;
/// `"openai"` requires `llm.model` and `OPENAI_API_KEY`.
pub fn create_llm_client(config: &LlmConfig) -> anyhow::Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledLlmClient)),
        "openai" => Ok(Box::new(OpenAiLlmClient::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

/// Strips a leading/trailing Markdown code fence (` ```json ... ``` ` or
/// ` ``` ... ``` `) that LLMs commonly wrap structured JSON in, so callers
/// can feed the result straight to `serde_json::from_str`.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let wrapped = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(wrapped), "{\"a\": 1}");
    }

    #[test]
    fn strips_plain_fence() {
        let wrapped = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(wrapped), "{\"a\": 1}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
    }
}
