use anyhow::{anyhow, Result};
use async_trait::async_trait;

use strata_core::extract::{parse_extraction, ExtractionProvider, ExtractionRequest, RawExtraction};

use super::prompt;
use crate::config::ExtractionConfig;
use crate::http;

/// OpenAI-compatible chat completions with `response_format: json_object`.
///
/// Requires `OPENAI_API_KEY`; `extraction.url` may point at any compatible
/// base URL.
pub struct OpenAIExtractor {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: http::api_key("OPENAI_API_KEY")?,
            max_retries: config.max_retries,
            client: http::client(config.timeout())?,
        })
    }
}

#[async_trait]
impl ExtractionProvider for OpenAIExtractor {
    fn name(&self) -> &str {
        "openai"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction> {
        let endpoint = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": prompt::system_prompt() },
                { "role": "user", "content": prompt::user_prompt(request) },
            ],
        });
        let json = http::post_json_with_retry("OpenAI extraction", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_extraction(message_content(&json)?)
    }
}

/// `choices[0].message.content`.
fn message_content(json: &serde_json::Value) -> Result<&str> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"entities\":[]}" } }]
        });
        assert_eq!(message_content(&json).unwrap(), "{\"entities\":[]}");
        assert!(message_content(&serde_json::json!({ "choices": [] })).is_err());
    }
}
