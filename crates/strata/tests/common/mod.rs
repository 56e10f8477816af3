//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use strata::config::{parse_config, Config, TimeoutConfig};
use strata::engine::SearchEngine;
use strata::extraction::pipeline::ChunkProcessor;
use strata::ingest::{ingest_items, ExtractionHandoff};
use strata::Backends;
use strata_core::embedding::EmbeddingProvider;
use strata_core::extract::{ExtractionProvider, ExtractionRequest, RawEntity, RawExtraction, RawRelation};
use strata_core::graph::Subgraph;
use strata_core::models::{Entity, Relation, SourceItem};
use strata_core::search::{RankedChunk, RetrievalParams};
use strata_core::store::{GraphStore, LexicalIndex, LexicalQuery};
use strata_core::text::tokenize;
use strata_core::validate::ValidatorConfig;

pub const DIMS: usize = 64;

/// Bag-of-words hashing embedder: texts sharing tokens point the same way.
pub struct HashEmbedder;

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in tokenize(text) {
        let h = token
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Answers correctly, but only after `delay`.
pub struct SlowEmbedder {
    pub delay: Duration,
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(anyhow!("connection refused"))
    }
}

pub struct FailingLexical;

#[async_trait]
impl LexicalIndex for FailingLexical {
    async fn search(&self, _query: &LexicalQuery, _limit: usize, _source: Option<&str>) -> Result<Vec<RankedChunk>> {
        Err(anyhow!("database is locked"))
    }
}

/// A lexical index that answers only after `delay`.
pub struct SlowLexical {
    pub delay: Duration,
}

#[async_trait]
impl LexicalIndex for SlowLexical {
    async fn search(&self, _query: &LexicalQuery, _limit: usize, _source: Option<&str>) -> Result<Vec<RankedChunk>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

/// A graph store whose every call hangs.
pub struct StalledGraph;

const STALL: Duration = Duration::from_secs(3600);

#[async_trait]
impl GraphStore for StalledGraph {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn upsert_node(&self, _entity: &Entity) -> Result<()> {
        tokio::time::sleep(STALL).await;
        Ok(())
    }

    async fn upsert_edge(&self, _relation: &Relation) -> Result<()> {
        tokio::time::sleep(STALL).await;
        Ok(())
    }

    async fn traverse(&self, _start_ids: &[String], _max_hops: usize) -> Result<Subgraph> {
        tokio::time::sleep(STALL).await;
        Ok(Subgraph::default())
    }

    async fn delete_documents(&self, _document_ids: &[String]) -> Result<u64> {
        tokio::time::sleep(STALL).await;
        Ok(0)
    }
}

/// Returns the same extraction for every chunk and records what it was sent.
#[derive(Default)]
pub struct ScriptedExtractor {
    pub output: RawExtraction,
    pub seen: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
}

impl ScriptedExtractor {
    pub fn new(output: RawExtraction) -> Self {
        ScriptedExtractor {
            output,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionProvider for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction> {
        self.seen.lock().unwrap().push(request.content.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.output.clone())
    }
}

pub fn entity(name: &str, kind: &str, description: &str, confidence: f64) -> RawEntity {
    RawEntity {
        name: name.to_string(),
        kind: kind.to_string(),
        description: description.to_string(),
        confidence,
    }
}

pub fn relation(subject: &str, predicate: &str, object: &str, confidence: f64) -> RawRelation {
    RawRelation {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object: object.to_string(),
        confidence,
    }
}

pub fn validator() -> ValidatorConfig {
    ValidatorConfig {
        confidence_threshold: 0.5,
        max_name_len: 100,
        max_description_len: 500,
        max_entities: 20,
        max_relations: 30,
    }
}

pub fn processor(backends: &Backends, provider: Arc<dyn ExtractionProvider>) -> ChunkProcessor {
    ChunkProcessor::new(backends, provider, validator(), Duration::from_secs(5))
}

pub fn item(source_id: &str, body: &str) -> SourceItem {
    SourceItem {
        source: "filesystem".to_string(),
        source_id: source_id.to_string(),
        source_url: None,
        title: Some(source_id.to_string()),
        content_type: "text/markdown".to_string(),
        body: body.to_string(),
        updated_at: Utc::now(),
    }
}

/// Ingest `(path, body)` pairs, marking every chunk pending for extraction.
pub async fn ingest(backends: &Backends, docs: &[(&str, &str)]) {
    let items: Vec<SourceItem> = docs.iter().map(|(path, body)| item(path, body)).collect();
    ingest_items(backends, &items, 200, ExtractionHandoff::MarkPending)
        .await
        .unwrap();
}

/// Budgets loose enough for a loaded CI machine, except where a test
/// overrides them on purpose.
pub fn timeouts() -> TimeoutConfig {
    TimeoutConfig {
        lexical_ms: 1_000,
        semantic_ms: 1_000,
        entity_ms: 1_000,
        query_deadline_ms: 3_000,
        rerank_ms: 1_000,
        graph_ms: 1_000,
    }
}

pub fn engine(backends: Backends) -> SearchEngine {
    SearchEngine::with_settings(backends, RetrievalParams::default(), timeouts(), true)
}

pub fn test_config() -> Config {
    parse_config("[db]\npath = \"unused.sqlite\"\n\n[chunking]\nmax_tokens = 200\n").unwrap()
}
