//! Tools exposed to remote callers.
//!
//! A [`Tool`] is a named operation with a JSON Schema for its parameters.
//! The same registry backs both the JSON endpoints (`GET /tools/list`,
//! `POST /tools/{name}`) and the MCP endpoint, so a tool behaves the same
//! way whichever transport calls it.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │               ToolRegistry                │
//! │  search · kag_search · extraction_status  │
//! └──────────────┬──────────────┬─────────────┘
//!                ▼              ▼
//!        POST /tools/{name}    /mcp (rmcp)
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

use strata_core::kag::KagRequest;
use strata_core::search::{SearchMode, SearchRequest};

use crate::backends::Backends;
use crate::engine::SearchEngine;
use crate::error::EngineError;
use crate::kag::KagSearcher;

/// Why a tool call failed. [`code`](ToolError::code) is what callers see.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::InvalidParams(_) => "invalid_request",
            ToolError::Engine(e) => e.code(),
            ToolError::Internal(_) => "internal_error",
        }
    }
}

/// A callable operation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`) and MCP tool name.
    fn name(&self) -> &str;

    /// One-line description for tool discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned value is wrapped in `{ "result": ... }`
    /// by the HTTP endpoint.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// What tools can reach while executing. Shared by every request.
#[derive(Clone)]
pub struct ToolContext {
    pub engine: Arc<SearchEngine>,
    pub kag: Arc<KagSearcher>,
    pub backends: Backends,
}

impl ToolContext {
    pub fn new(engine: Arc<SearchEngine>, kag: Arc<KagSearcher>, backends: Backends) -> Self {
        Self {
            engine,
            kag,
            backends,
        }
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, ToolError> {
    // Callers that send no body at all get the same treatment as `{}`.
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    mode: Option<String>,
    limit: Option<usize>,
    min_score: Option<f64>,
    semantic_weight: Option<f64>,
    mmr_lambda: Option<f64>,
    mmr: Option<bool>,
    rerank: Option<bool>,
    source: Option<String>,
    #[serde(default)]
    explain: bool,
}

impl SearchParams {
    fn into_request(self) -> Result<SearchRequest, ToolError> {
        let mode = match self.mode.as_deref() {
            Some(m) => m
                .parse::<SearchMode>()
                .map_err(|e| ToolError::InvalidParams(e.to_string()))?,
            None => SearchMode::Auto,
        };
        Ok(SearchRequest {
            query: self.query,
            mode,
            limit: self.limit,
            min_score: self.min_score,
            semantic_weight: self.semantic_weight,
            mmr_lambda: self.mmr_lambda,
            mmr: self.mmr,
            rerank: self.rerank,
            source: self.source,
            explain: self.explain,
        })
    }
}

/// Hybrid retrieval over indexed chunks.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search indexed documents with adaptive lexical, semantic and entity retrieval"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "mode": {
                    "type": "string",
                    "enum": ["auto", "hybrid", "semantic", "fts"],
                    "default": "auto"
                },
                "limit": { "type": "integer", "minimum": 1, "description": "Max results" },
                "min_score": { "type": "number", "minimum": 0, "maximum": 1 },
                "semantic_weight": {
                    "type": "number", "minimum": 0, "maximum": 1,
                    "description": "Override the semantic weight; lexical becomes 1 - w"
                },
                "mmr_lambda": { "type": "number", "minimum": 0, "maximum": 1 },
                "mmr": { "type": "boolean", "description": "Diversify results" },
                "rerank": { "type": "boolean", "description": "Rerank by query similarity" },
                "source": { "type": "string", "description": "Restrict to one source" },
                "explain": { "type": "boolean", "default": false }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let request = parse_params::<SearchParams>(params)?.into_request()?;
        let response = ctx.engine.search(&request).await?;
        Ok(serde_json::to_value(&response).map_err(anyhow::Error::from)?)
    }
}

/// Entity and relation lookup over the knowledge graph.
pub struct KagSearchTool;

#[async_trait]
impl Tool for KagSearchTool {
    fn name(&self) -> &str {
        "kag_search"
    }

    fn description(&self) -> &str {
        "Find entities and the relations around them, with a compact text summary"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Free-text query" },
                "entity_hints": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Entity names already known to be relevant"
                },
                "max_hops": { "type": "integer", "minimum": 0, "maximum": 3 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                "source": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let request: KagRequest = parse_params(params)?;
        let response = ctx.kag.search(&request).await?;
        Ok(serde_json::to_value(&response).map_err(anyhow::Error::from)?)
    }
}

/// Extraction backlog and knowledge-graph size.
pub struct ExtractionStatusTool;

#[async_trait]
impl Tool for ExtractionStatusTool {
    fn name(&self) -> &str {
        "extraction_status"
    }

    fn description(&self) -> &str {
        "Report how many chunks are pending, extracting, completed or failed"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let backlog = ctx.backends.metadata.extraction_backlog().await?;
        let entities = ctx.backends.knowledge.entity_count().await?;
        Ok(json!({
            "backlog": backlog,
            "total_chunks": backlog.total(),
            "entities": entities,
        }))
    }
}

/// Registered tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// `search`, `kag_search` and `extraction_status`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(KagSearchTool));
        registry.register(Box::new(ExtractionStatusTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 3);
        assert!(registry.find("kag_search").is_some());
        assert!(registry.find("get").is_none());
        for tool in registry.tools() {
            assert_eq!(tool.parameters_schema()["type"], "object");
        }
    }

    #[test]
    fn test_search_params_accept_keyword_alias() {
        let params: SearchParams = parse_params(json!({ "query": "deploy", "mode": "keyword" })).unwrap();
        let request = params.into_request().unwrap();
        assert_eq!(request.mode, SearchMode::Fts);
        assert!(!request.explain);
    }

    #[test]
    fn test_missing_query_is_invalid() {
        let err = parse_params::<SearchParams>(json!({ "limit": 3 })).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_unknown_mode_is_invalid() {
        let params: SearchParams = parse_params(json!({ "query": "x", "mode": "fuzzy" })).unwrap();
        assert!(matches!(params.into_request(), Err(ToolError::InvalidParams(_))));
    }
}
