use anyhow::{anyhow, Result};
use async_trait::async_trait;

use strata_core::extract::{parse_extraction, ExtractionProvider, ExtractionRequest, RawExtraction};

use super::prompt;
use crate::config::ExtractionConfig;
use crate::http;

const API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Anthropic Messages API. Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicExtractor {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl AnthropicExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("extraction.model required for Anthropic provider"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            api_key: http::api_key("ANTHROPIC_API_KEY")?,
            max_retries: config.max_retries,
            client: http::client(config.timeout())?,
        })
    }
}

#[async_trait]
impl ExtractionProvider for AnthropicExtractor {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction> {
        let endpoint = format!("{}/messages", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "temperature": 0,
            "system": prompt::system_prompt(),
            "messages": [
                { "role": "user", "content": prompt::user_prompt(request) },
            ],
        });
        let json = http::post_json_with_retry("Anthropic extraction", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
        })
        .await?;
        parse_extraction(&response_text(&json)?)
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn response_text(json: &serde_json::Value) -> Result<String> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid Anthropic response: missing content array"))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(anyhow!("Invalid Anthropic response: no text content"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_joins_text_blocks() {
        let json = serde_json::json!({
            "content": [
                { "type": "text", "text": "{\"entities\":" },
                { "type": "text", "text": "[]}" }
            ]
        });
        assert_eq!(response_text(&json).unwrap(), "{\"entities\":[]}");
        assert!(response_text(&serde_json::json!({ "content": [] })).is_err());
    }
}
