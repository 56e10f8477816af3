//! The extraction provider contract and tolerant parsing of model output.
//!
//! Providers return [`RawExtraction`]: whatever the model said, loosely
//! typed. Nothing here is trusted until [`crate::validate`] has checked,
//! normalized, and assigned IDs to it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Input to a provider call.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    /// Sanitized chunk text.
    pub content: String,
    pub title: Option<String>,
    pub max_entities: usize,
    pub max_relations: usize,
    pub confidence_threshold: f64,
}

/// An entity as the model reported it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type", alias = "entity_type", alias = "category")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// A relation as the model reported it; endpoints are entity names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRelation {
    #[serde(default, alias = "source", alias = "from", alias = "head")]
    pub subject: String,
    #[serde(default, alias = "relation", alias = "type", alias = "relationship")]
    pub predicate: String,
    #[serde(default, alias = "target", alias = "to", alias = "tail")]
    pub object: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// The full, unvalidated output of one provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default, alias = "nodes")]
    pub entities: Vec<RawEntity>,
    #[serde(default, alias = "edges", alias = "relationships")]
    pub relations: Vec<RawRelation>,
}

fn default_confidence() -> f64 {
    0.0
}

/// A pluggable entity/relation extractor, typically an LLM behind HTTP.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Short name for logs and status output, e.g. `"ollama"`.
    fn name(&self) -> &str;

    /// Cheap readiness probe; `false` means skip extraction for now.
    async fn is_available(&self) -> bool;

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction>;
}

/// Parse model output into a [`RawExtraction`].
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or JSON embedded
/// in surrounding prose (the outermost `{…}` is used).
pub fn parse_extraction(output: &str) -> Result<RawExtraction> {
    let trimmed = strip_code_fence(output.trim());
    if let Ok(parsed) = serde_json::from_str::<RawExtraction>(trimmed) {
        return Ok(parsed);
    }
    let start = trimmed
        .find('{')
        .ok_or_else(|| anyhow!("extraction output contains no JSON object"))?;
    let end = trimmed
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| anyhow!("extraction output has an unterminated JSON object"))?;
    serde_json::from_str::<RawExtraction>(&trimmed[start..=end])
        .map_err(|e| anyhow!("extraction output is not valid JSON: {}", e))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_json() {
        let out = r#"{"entities":[{"name":"Rust","type":"language","confidence":0.9}],"relations":[]}"#;
        let parsed = parse_extraction(out).unwrap();
        assert_eq!(parsed.entities.len(), 1);
        assert_eq!(parsed.entities[0].kind, "language");
    }

    #[test]
    fn test_parse_fenced_and_aliased() {
        let out = "```json\n{\"nodes\":[{\"name\":\"A\"}],\"edges\":[{\"source\":\"A\",\"relation\":\"uses\",\"target\":\"B\",\"confidence\":0.7}]}\n```";
        let parsed = parse_extraction(out).unwrap();
        assert_eq!(parsed.entities[0].name, "A");
        assert_eq!(parsed.entities[0].confidence, 0.0);
        assert_eq!(parsed.relations[0].subject, "A");
        assert_eq!(parsed.relations[0].predicate, "uses");
        assert_eq!(parsed.relations[0].object, "B");
    }

    #[test]
    fn test_parse_json_in_prose() {
        let out = "Sure! Here you go: {\"entities\": []} Hope that helps.";
        assert!(parse_extraction(out).unwrap().entities.is_empty());
    }

    #[test]
    fn test_parse_garbage_errors() {
        assert!(parse_extraction("no json here").is_err());
        assert!(parse_extraction("{ broken").is_err());
    }
}
