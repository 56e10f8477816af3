//! Configuration loading and validation.
//!
//! Strata reads one TOML file (default `./config/strata.toml`). Only `[db]`
//! and `[chunking]` are required; every other section falls back to the
//! defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/strata.sqlite"
//!
//! [chunking]
//! max_tokens = 700
//!
//! [retrieval]
//! final_limit = 10
//! mmr_lambda = 0.7
//!
//! [timeouts]
//! semantic_ms = 2500
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [extraction]
//! provider = "ollama"
//! model = "llama3.1"
//!
//! [connectors.filesystem]
//! root = "./docs"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strata_core::fusion::FusionParams;
use strata_core::search::RetrievalParams;
use strata_core::validate::ValidatorConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub kag: KagConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub candidate_k: usize,
    pub final_limit: usize,
    pub rrf_k: f64,
    pub agreement_bonus_max: f64,
    pub proper_noun_boost: f64,
    pub relaxed_weight_factor: f64,
    pub entity_weight_factor: f64,
    pub similarity_floor: f64,
    pub fallback_floor_factor: f64,
    pub min_score: f64,
    pub mmr_enabled: bool,
    pub mmr_lambda: f64,
    pub rerank_enabled: bool,
    pub rerank_top_n: usize,
    pub rerank_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let p = RetrievalParams::default();
        Self {
            candidate_k: p.candidate_k,
            final_limit: p.limit,
            rrf_k: p.fusion.rrf_k,
            agreement_bonus_max: p.fusion.agreement_bonus_max,
            proper_noun_boost: p.fusion.proper_noun_boost,
            relaxed_weight_factor: p.fusion.relaxed_weight_factor,
            entity_weight_factor: p.fusion.entity_weight_factor,
            similarity_floor: p.similarity_floor,
            fallback_floor_factor: p.fallback_floor_factor,
            min_score: p.min_score,
            mmr_enabled: p.mmr_enabled,
            mmr_lambda: p.mmr_lambda,
            rerank_enabled: p.rerank_enabled,
            rerank_top_n: p.rerank_top_n,
            rerank_weight: p.rerank_weight,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            candidate_k: self.candidate_k,
            limit: self.final_limit,
            fusion: FusionParams {
                rrf_k: self.rrf_k,
                agreement_bonus_max: self.agreement_bonus_max,
                proper_noun_boost: self.proper_noun_boost,
                relaxed_weight_factor: self.relaxed_weight_factor,
                entity_weight_factor: self.entity_weight_factor,
            },
            similarity_floor: self.similarity_floor,
            fallback_floor_factor: self.fallback_floor_factor,
            min_score: self.min_score,
            mmr_enabled: self.mmr_enabled,
            mmr_lambda: self.mmr_lambda,
            rerank_enabled: self.rerank_enabled,
            rerank_top_n: self.rerank_top_n,
            rerank_weight: self.rerank_weight,
        }
    }
}

/// Per-strategy budgets and the overall query deadline, in milliseconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub lexical_ms: u64,
    pub semantic_ms: u64,
    pub entity_ms: u64,
    pub query_deadline_ms: u64,
    pub rerank_ms: u64,
    /// Every graph-store call: traversal, upserts, deletes.
    pub graph_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lexical_ms: 75,
            semantic_ms: 2500,
            entity_ms: 250,
            query_deadline_ms: 4000,
            rerank_ms: 1500,
            graph_ms: 1000,
        }
    }
}

impl TimeoutConfig {
    pub fn lexical(&self) -> Duration {
        Duration::from_millis(self.lexical_ms)
    }
    pub fn semantic(&self) -> Duration {
        Duration::from_millis(self.semantic_ms)
    }
    pub fn entity(&self) -> Duration {
        Duration::from_millis(self.entity_ms)
    }
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.query_deadline_ms)
    }
    pub fn rerank(&self) -> Duration {
        Duration::from_millis(self.rerank_ms)
    }
    pub fn graph(&self) -> Duration {
        Duration::from_millis(self.graph_ms)
    }
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama or an OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Extraction ============

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    #[serde(default = "default_max_relations")]
    pub max_relations: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
    /// Attempts after which a failed chunk is no longer reset by `extract retry`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,
    /// Queue new chunks for extraction as part of `sync`.
    #[serde(default = "default_true")]
    pub enqueue_on_sync: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_entities: default_max_entities(),
            max_relations: default_max_relations(),
            confidence_threshold: default_confidence_threshold(),
            max_name_len: default_max_name_len(),
            max_description_len: default_max_description_len(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_extraction_timeout_secs(),
            max_retries: default_extraction_retries(),
            enqueue_on_sync: default_true(),
        }
    }
}

impl ExtractionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn validator(&self) -> ValidatorConfig {
        ValidatorConfig {
            confidence_threshold: self.confidence_threshold,
            max_name_len: self.max_name_len,
            max_description_len: self.max_description_len,
            max_entities: self.max_entities,
            max_relations: self.max_relations,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_entities() -> usize {
    20
}
fn default_max_relations() -> usize {
    30
}
fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_max_name_len() -> usize {
    100
}
fn default_max_description_len() -> usize {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_extraction_timeout_secs() -> u64 {
    60
}
fn default_extraction_retries() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

// ============ KAG and graph ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KagConfig {
    pub enabled: bool,
    /// Capped at [`strata_core::kag::MAX_HOPS_CAP`].
    pub max_hops: usize,
    /// Capped at [`strata_core::kag::LIMIT_CAP`].
    pub limit: usize,
    pub render_entities: usize,
    pub render_relations: usize,
}

impl Default for KagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hops: 2,
            limit: 25,
            render_entities: strata_core::kag::RENDER_ENTITIES,
            render_relations: strata_core::kag::RENDER_RELATIONS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    /// `"none"` (relational traversal) or `"memory"`.
    pub backend: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: "none".to_string(),
        }
    }
}

// ============ Server and connectors ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7331".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    let r = &config.retrieval;
    if r.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if r.candidate_k < r.final_limit {
        bail!("retrieval.candidate_k must be >= retrieval.final_limit");
    }
    if r.rrf_k.is_nan() || r.rrf_k < 0.0 {
        bail!("retrieval.rrf_k must be >= 0");
    }
    for (name, value) in [
        ("mmr_lambda", r.mmr_lambda),
        ("rerank_weight", r.rerank_weight),
        ("similarity_floor", r.similarity_floor),
        ("fallback_floor_factor", r.fallback_floor_factor),
        ("min_score", r.min_score),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }

    if config.timeouts.query_deadline_ms == 0 {
        bail!("timeouts.query_deadline_ms must be > 0");
    }
    if config.timeouts.graph_ms == 0 {
        bail!("timeouts.graph_ms must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    let x = &config.extraction;
    match x.provider.as_str() {
        "disabled" | "ollama" | "openai" | "anthropic" => {}
        other => bail!(
            "Unknown extraction provider: '{}'. Must be disabled, ollama, openai, or anthropic.",
            other
        ),
    }
    if x.is_enabled() {
        if x.workers == 0 {
            bail!("extraction.workers must be > 0");
        }
        if x.queue_capacity == 0 {
            bail!("extraction.queue_capacity must be > 0");
        }
    }
    if !(0.0..=1.0).contains(&x.confidence_threshold) {
        bail!("extraction.confidence_threshold must be in [0.0, 1.0]");
    }

    if config.kag.max_hops > strata_core::kag::MAX_HOPS_CAP {
        bail!(
            "kag.max_hops must be <= {}",
            strata_core::kag::MAX_HOPS_CAP
        );
    }
    if config.kag.limit == 0 || config.kag.limit > strata_core::kag::LIMIT_CAP {
        bail!("kag.limit must be in 1..={}", strata_core::kag::LIMIT_CAP);
    }

    match config.graph.backend.as_str() {
        "none" | "memory" => {}
        other => bail!("Unknown graph backend: '{}'. Must be none or memory.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[db]\npath = \"/tmp/x.sqlite\"\n\n[chunking]\nmax_tokens = 700\n";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.retrieval.final_limit, 10);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.timeouts.semantic_ms, 2500);
        assert_eq!(config.timeouts.graph_ms, 1000);
        assert!(!config.embedding.is_enabled());
        assert!(!config.extraction.is_enabled());
        assert_eq!(config.kag.max_hops, 2);
        assert_eq!(config.graph.backend, "none");
    }

    #[test]
    fn test_rejects_bad_lambda() {
        let text = format!("{}\n[retrieval]\nmmr_lambda = 1.5\n", MINIMAL);
        let err = parse_config(&text).unwrap_err().to_string();
        assert!(err.contains("mmr_lambda"), "{}", err);
    }

    #[test]
    fn test_rejects_unknown_providers() {
        let text = format!("{}\n[extraction]\nprovider = \"gpt-magic\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
        let text = format!("{}\n[graph]\nbackend = \"neo4j\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let text = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
        let text = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
            MINIMAL
        );
        assert!(parse_config(&text).is_ok());
    }

    #[test]
    fn test_retrieval_params_round_trip() {
        let config = parse_config(MINIMAL).unwrap();
        let params = config.retrieval.params();
        assert_eq!(params.limit, 10);
        assert_eq!(params.fusion.proper_noun_boost, 0.5);
    }
}
