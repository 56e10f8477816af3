use anyhow::{anyhow, Result};
use async_trait::async_trait;

use strata_core::extract::{parse_extraction, ExtractionProvider, ExtractionRequest, RawExtraction};

use super::prompt;
use crate::config::ExtractionConfig;
use crate::http;

/// Local Ollama `/api/generate` in JSON mode. No API key.
pub struct OllamaExtractor {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone().unwrap_or_else(|| "llama3.1".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout())?,
        })
    }

    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[async_trait]
impl ExtractionProvider for OllamaExtractor {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let probe = self.client.get(format!("{}/api/tags", self.base())).send().await;
        matches!(probe, Ok(r) if r.status().is_success())
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction> {
        let endpoint = format!("{}/api/generate", self.base());
        let body = serde_json::json!({
            "model": self.model,
            "system": prompt::system_prompt(),
            "prompt": prompt::user_prompt(request),
            "stream": false,
            "format": "json",
            "options": { "temperature": 0 },
        });
        let json = http::post_json_with_retry("Ollama extraction", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))?;
        parse_extraction(text)
    }
}
