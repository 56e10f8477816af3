//! Storage abstractions for Strata.
//!
//! Retrieval and extraction talk to storage only through these traits, so
//! the SQLite adapters in the app crate and the in-memory implementations
//! in [`memory`] are interchangeable.
//!
//! | Trait | Backs |
//! |-------|-------|
//! | [`LexicalIndex`] | exact, relaxed, stemmed, and substring text search |
//! | [`VectorIndex`] | chunk and entity embeddings, filterable by source/document |
//! | [`MetadataStore`] | documents, chunks, extraction status, source purges |
//! | [`KnowledgeStore`] | entities, relations, and entity mentions |
//! | [`GraphStore`] | optional dedicated graph for multi-hop traversal |
//!
//! [`memory::InMemoryStore`] implements the first four on one struct;
//! [`memory::InMemoryGraph`] implements the last.
//!
//! Implementations must be `Send + Sync` and return errors rather than
//! panic when a backend is unreachable.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::graph::Subgraph;
use crate::models::{
    Chunk, ChunkContext, ClaimOutcome, Document, Entity, ExtractionBacklog, ExtractionStatus,
    MergeOutcome, Relation, RemovedRows,
};
use crate::search::RankedChunk;

// ============ Lexical ============

/// How a lexical query is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LexicalMode {
    /// Every phrase must appear verbatim (token sequence).
    Phrase,
    /// Any content term, prefix-matched.
    Relaxed,
    /// Any stemmed content term, prefix-matched.
    Stemmed,
    /// Partial tokens anywhere in the text.
    Substring,
}

#[derive(Debug, Clone)]
pub struct LexicalQuery {
    pub text: String,
    /// Phrases for [`LexicalMode::Phrase`]; empty means the whole text.
    pub phrases: Vec<String>,
    pub mode: LexicalMode,
}

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Best matches first, at most `limit`.
    async fn search(
        &self,
        query: &LexicalQuery,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<RankedChunk>>;
}

// ============ Vectors ============

/// Which embedding collection an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Chunks,
    Entities,
}

/// Filterable attributes stored with every vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorPayload {
    pub document_id: String,
    pub source: String,
}

/// Conjunctive filter; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorFilter {
    pub source: Option<String>,
    /// Empty means any document.
    pub document_ids: Vec<String>,
}

impl VectorFilter {
    pub fn source(source: impl Into<String>) -> Self {
        VectorFilter {
            source: Some(source.into()),
            document_ids: Vec::new(),
        }
    }

    pub fn documents(document_ids: Vec<String>) -> Self {
        VectorFilter {
            source: None,
            document_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.document_ids.is_empty()
    }

    pub fn matches(&self, payload: &VectorPayload) -> bool {
        self.source.as_ref().is_none_or(|s| *s == payload.source)
            && (self.document_ids.is_empty() || self.document_ids.contains(&payload.document_id))
    }
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity.
    pub score: f64,
    pub payload: VectorPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: &[f32],
        payload: &VectorPayload,
    ) -> Result<()>;

    /// Nearest neighbours by cosine similarity, best first.
    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<VectorMatch>>;

    /// Delete matching vectors; returns how many were removed.
    ///
    /// Implementations refuse an empty filter.
    async fn delete_by_filter(&self, collection: Collection, filter: &VectorFilter) -> Result<u64>;

    async fn count(&self, collection: Collection, filter: &VectorFilter) -> Result<u64>;

    /// Stored vectors for the given IDs; missing IDs are omitted.
    async fn vectors(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>>;
}

// ============ Documents, chunks, extraction status ============

/// Identity and hash of a stored document, used to skip unchanged content.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub content_hash: String,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_document(&self, source: &str, source_id: &str)
        -> Result<Option<StoredDocument>>;

    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Replace a document's chunks; returns the IDs of the removed chunks.
    ///
    /// Status rows and entity mentions of removed chunks go with them.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<Vec<String>>;

    /// Chunk text joined with document fields; missing IDs are omitted.
    async fn chunk_contexts(&self, chunk_ids: &[String]) -> Result<HashMap<String, ChunkContext>>;

    /// Chunks with no vector in the chunk collection, oldest document first.
    async fn chunks_missing_vectors(&self, limit: usize) -> Result<Vec<ChunkContext>>;

    async fn source_document_ids(&self, source: &str) -> Result<Vec<String>>;

    /// Distinct sources with their document counts.
    async fn sources(&self) -> Result<Vec<(String, u64)>>;

    /// Insert `pending` rows for chunks that have none; returns rows added.
    async fn mark_pending(&self, chunk_ids: &[String]) -> Result<u64>;

    /// Atomically move a chunk from `pending` to `extracting`.
    async fn try_claim(&self, chunk_id: &str) -> Result<ClaimOutcome>;

    async fn complete_extraction(&self, chunk_id: &str, entities: usize, relations: usize)
        -> Result<()>;

    async fn fail_extraction(&self, chunk_id: &str, error: &str) -> Result<()>;

    /// Return an `extracting` chunk to `pending` without counting an attempt.
    async fn release_claim(&self, chunk_id: &str) -> Result<()>;

    /// Move `failed` chunks with fewer than `max_attempts` attempts back to `pending`.
    async fn reset_failed(&self, max_attempts: u32) -> Result<u64>;

    /// Move every `extracting` chunk back to `pending` (after a crash).
    async fn reset_stale_claims(&self) -> Result<u64>;

    async fn pending_chunks(&self, limit: usize) -> Result<Vec<String>>;

    async fn extraction_status(&self, chunk_id: &str) -> Result<Option<ExtractionStatus>>;

    async fn extraction_backlog(&self) -> Result<ExtractionBacklog>;

    /// Delete every relational row belonging to a source, in one transaction.
    ///
    /// Callers must remove vectors first: after this the source-to-chunk
    /// mapping no longer exists.
    async fn purge_source(&self, source: &str) -> Result<RemovedRows>;
}

// ============ Knowledge ============

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert, or merge into the existing row: confidence becomes the
    /// maximum, an empty description is filled. Never overwrites otherwise.
    async fn upsert_entity(&self, entity: &Entity) -> Result<MergeOutcome>;

    /// Same merge rule as [`upsert_entity`](KnowledgeStore::upsert_entity).
    async fn upsert_relation(&self, relation: &Relation) -> Result<MergeOutcome>;

    async fn record_mention(&self, entity_id: &str, chunk_id: &str) -> Result<()>;

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>>;

    /// Entities whose name or description contains any of `terms`
    /// (case-insensitive), optionally restricted to one source.
    ///
    /// Results are ordered by [`entity_match_rank`](crate::kag::entity_match_rank),
    /// then confidence, before `limit` applies.
    async fn search_entities(
        &self,
        terms: &[String],
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>>;

    /// Relations with either endpoint in `entity_ids`.
    async fn relations_touching(&self, entity_ids: &[String]) -> Result<Vec<Relation>>;

    /// `(entity_id, chunk_id)` pairs for the given entities.
    async fn mentions(&self, entity_ids: &[String]) -> Result<Vec<(String, String)>>;

    /// Entities without a vector in the entity collection.
    async fn entities_missing_vectors(&self, limit: usize) -> Result<Vec<Entity>>;

    /// Every relation; used to hydrate an in-memory graph at startup.
    async fn all_relations(&self) -> Result<Vec<Relation>>;

    async fn entity_count(&self) -> Result<u64>;
}

// ============ Graph ============

#[async_trait]
pub trait GraphStore: Send + Sync {
    fn name(&self) -> &str;

    async fn upsert_node(&self, entity: &Entity) -> Result<()>;

    async fn upsert_edge(&self, relation: &Relation) -> Result<()>;

    /// Breadth-first expansion up to `max_hops`.
    async fn traverse(&self, start_ids: &[String], max_hops: usize) -> Result<Subgraph>;

    /// Remove nodes and edges originating in the given documents.
    async fn delete_documents(&self, document_ids: &[String]) -> Result<u64>;
}
