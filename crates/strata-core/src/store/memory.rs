//! In-memory storage for tests and the `memory` graph backend.
//!
//! [`InMemoryStore`] keeps everything in ordered maps behind one
//! `std::sync::RwLock`, so iteration order (and therefore ranking ties) is
//! deterministic. Lexical search is a token scan; vector search is
//! brute-force cosine similarity.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::graph::{EdgeList, Subgraph};
use crate::kag::entity_match_rank;
use crate::models::{
    Chunk, ChunkContext, ClaimOutcome, Document, Entity, ExtractionBacklog, ExtractionState,
    ExtractionStatus, MergeOutcome, Relation, RemovedRows,
};
use crate::search::RankedChunk;
use crate::text::{content_terms, stem, tokenize, truncate_chars};

use super::{
    Collection, GraphStore, KnowledgeStore, LexicalIndex, LexicalMode, LexicalQuery,
    MetadataStore, StoredDocument, VectorFilter, VectorIndex, VectorMatch, VectorPayload,
};

const SNIPPET_CHARS: usize = 240;

#[derive(Default)]
struct State {
    documents: BTreeMap<String, Document>,
    chunks: BTreeMap<String, Chunk>,
    status: BTreeMap<String, ExtractionStatus>,
    entities: BTreeMap<String, Entity>,
    relations: BTreeMap<String, Relation>,
    mentions: BTreeSet<(String, String)>,
    vectors: HashMap<Collection, BTreeMap<String, (Vec<f32>, VectorPayload)>>,
}

impl State {
    fn context(&self, chunk: &Chunk) -> Option<ChunkContext> {
        let doc = self.documents.get(&chunk.document_id)?;
        Some(ChunkContext {
            chunk_id: chunk.id.clone(),
            document_id: doc.id.clone(),
            source: doc.source.clone(),
            path: doc.source_id.clone(),
            title: doc.title.clone(),
            text: chunk.text.clone(),
        })
    }

    fn chunk_source(&self, chunk: &Chunk) -> Option<&str> {
        self.documents
            .get(&chunk.document_id)
            .map(|d| d.source.as_str())
    }

    fn remove_chunk_rows(&mut self, chunk_id: &str) {
        self.chunks.remove(chunk_id);
        self.status.remove(chunk_id);
        self.mentions.retain(|(_, c)| c != chunk_id);
    }
}

/// Everything except the graph, in memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn lexical_score(query: &LexicalQuery, text: &str) -> f64 {
    let tokens = tokenize(text);
    match query.mode {
        LexicalMode::Phrase => {
            let phrases: Vec<Vec<String>> = if query.phrases.is_empty() {
                vec![tokenize(&query.text)]
            } else {
                query.phrases.iter().map(|p| tokenize(p)).collect()
            };
            let phrases: Vec<Vec<String>> = phrases.into_iter().filter(|p| !p.is_empty()).collect();
            if phrases.is_empty() {
                return 0.0;
            }
            let all = phrases
                .iter()
                .all(|p| tokens.windows(p.len()).any(|w| w == p.as_slice()));
            if all {
                phrases.len() as f64
            } else {
                0.0
            }
        }
        LexicalMode::Relaxed | LexicalMode::Stemmed => {
            let terms: Vec<String> = content_terms(&query.text)
                .into_iter()
                .map(|t| {
                    if query.mode == LexicalMode::Stemmed {
                        stem(&t)
                    } else {
                        t
                    }
                })
                .collect();
            terms
                .iter()
                .filter(|t| tokens.iter().any(|tok| tok.starts_with(t.as_str())))
                .count() as f64
        }
        LexicalMode::Substring => {
            let lower = text.to_lowercase();
            content_terms(&query.text)
                .into_iter()
                .map(|t| stem(&t))
                .filter(|t| t.chars().count() >= 3 && lower.contains(t.as_str()))
                .count() as f64
        }
    }
}

#[async_trait]
impl LexicalIndex for InMemoryStore {
    async fn search(
        &self,
        query: &LexicalQuery,
        limit: usize,
        source: Option<&str>,
    ) -> Result<Vec<RankedChunk>> {
        let state = self.read()?;
        let mut hits: Vec<RankedChunk> = state
            .chunks
            .values()
            .filter(|c| source.is_none() || state.chunk_source(c) == source)
            .filter_map(|c| {
                let score = lexical_score(query, &c.text);
                (score > 0.0).then(|| RankedChunk {
                    chunk_id: c.id.clone(),
                    document_id: c.document_id.clone(),
                    score,
                    snippet: truncate_chars(&c.text, SNIPPET_CHARS),
                    text: c.text.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: &[f32],
        payload: &VectorPayload,
    ) -> Result<()> {
        let mut state = self.write()?;
        state
            .vectors
            .entry(collection)
            .or_default()
            .insert(id.to_string(), (vector.to_vec(), payload.clone()));
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        filter: &VectorFilter,
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        let state = self.read()?;
        let Some(stored) = state.vectors.get(&collection) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<VectorMatch> = stored
            .iter()
            .filter(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (v, payload))| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, v) as f64,
                payload: payload.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_by_filter(&self, collection: Collection, filter: &VectorFilter) -> Result<u64> {
        if filter.is_empty() {
            bail!("refusing to delete {:?} vectors with an empty filter", collection);
        }
        let mut state = self.write()?;
        let Some(stored) = state.vectors.get_mut(&collection) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|_, (_, payload)| !filter.matches(payload));
        Ok((before - stored.len()) as u64)
    }

    async fn count(&self, collection: Collection, filter: &VectorFilter) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .vectors
            .get(&collection)
            .map(|stored| stored.values().filter(|(_, p)| filter.matches(p)).count())
            .unwrap_or(0) as u64)
    }

    async fn vectors(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let state = self.read()?;
        let Some(stored) = state.vectors.get(&collection) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| stored.get(id).map(|(v, _)| (id.clone(), v.clone())))
            .collect())
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn find_document(&self, source: &str, source_id: &str) -> Result<Option<StoredDocument>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .find(|d| d.source == source && d.source_id == source_id)
            .map(|d| StoredDocument {
                id: d.id.clone(),
                content_hash: d.content_hash.clone(),
            }))
    }

    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        state.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<Vec<String>> {
        let mut state = self.write()?;
        let old: Vec<String> = state
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.id.clone())
            .collect();
        for id in &old {
            state.remove_chunk_rows(id);
        }
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(old)
    }

    async fn chunk_contexts(&self, chunk_ids: &[String]) -> Result<HashMap<String, ChunkContext>> {
        let state = self.read()?;
        Ok(chunk_ids
            .iter()
            .filter_map(|id| state.chunks.get(id))
            .filter_map(|c| state.context(c).map(|ctx| (c.id.clone(), ctx)))
            .collect())
    }

    async fn chunks_missing_vectors(&self, limit: usize) -> Result<Vec<ChunkContext>> {
        let state = self.read()?;
        let stored = state.vectors.get(&Collection::Chunks);
        Ok(state
            .chunks
            .values()
            .filter(|c| stored.is_none_or(|s| !s.contains_key(&c.id)))
            .filter_map(|c| state.context(c))
            .take(limit)
            .collect())
    }

    async fn source_document_ids(&self, source: &str) -> Result<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| d.source == source)
            .map(|d| d.id.clone())
            .collect())
    }

    async fn sources(&self) -> Result<Vec<(String, u64)>> {
        let state = self.read()?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for doc in state.documents.values() {
            *counts.entry(doc.source.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn mark_pending(&self, chunk_ids: &[String]) -> Result<u64> {
        let mut state = self.write()?;
        let now = now_ts();
        let mut added = 0;
        for id in chunk_ids {
            if !state.chunks.contains_key(id) || state.status.contains_key(id) {
                continue;
            }
            state.status.insert(
                id.clone(),
                ExtractionStatus {
                    chunk_id: id.clone(),
                    state: ExtractionState::Pending,
                    entity_count: 0,
                    relation_count: 0,
                    attempts: 0,
                    last_error: None,
                    updated_at: now,
                },
            );
            added += 1;
        }
        Ok(added)
    }

    async fn try_claim(&self, chunk_id: &str) -> Result<ClaimOutcome> {
        let mut state = self.write()?;
        let Some(status) = state.status.get_mut(chunk_id) else {
            return Ok(ClaimOutcome::Missing);
        };
        if status.state != ExtractionState::Pending {
            return Ok(ClaimOutcome::NotPending(status.state));
        }
        status.state = ExtractionState::Extracting;
        status.attempts += 1;
        status.updated_at = now_ts();
        Ok(ClaimOutcome::Claimed)
    }

    async fn complete_extraction(
        &self,
        chunk_id: &str,
        entities: usize,
        relations: usize,
    ) -> Result<()> {
        let mut state = self.write()?;
        if let Some(status) = state.status.get_mut(chunk_id) {
            status.state = ExtractionState::Completed;
            status.entity_count = entities as i64;
            status.relation_count = relations as i64;
            status.last_error = None;
            status.updated_at = now_ts();
        }
        Ok(())
    }

    async fn fail_extraction(&self, chunk_id: &str, error: &str) -> Result<()> {
        let mut state = self.write()?;
        if let Some(status) = state.status.get_mut(chunk_id) {
            status.state = ExtractionState::Failed;
            status.last_error = Some(error.to_string());
            status.updated_at = now_ts();
        }
        Ok(())
    }

    async fn release_claim(&self, chunk_id: &str) -> Result<()> {
        let mut state = self.write()?;
        if let Some(status) = state.status.get_mut(chunk_id) {
            if status.state == ExtractionState::Extracting {
                status.state = ExtractionState::Pending;
                status.attempts = (status.attempts - 1).max(0);
                status.updated_at = now_ts();
            }
        }
        Ok(())
    }

    async fn reset_failed(&self, max_attempts: u32) -> Result<u64> {
        let mut state = self.write()?;
        let mut reset = 0;
        for status in state.status.values_mut() {
            if status.state == ExtractionState::Failed && status.attempts < max_attempts as i64 {
                status.state = ExtractionState::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn reset_stale_claims(&self) -> Result<u64> {
        let mut state = self.write()?;
        let mut reset = 0;
        for status in state.status.values_mut() {
            if status.state == ExtractionState::Extracting {
                status.state = ExtractionState::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn pending_chunks(&self, limit: usize) -> Result<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .status
            .values()
            .filter(|s| s.state == ExtractionState::Pending)
            .map(|s| s.chunk_id.clone())
            .take(limit)
            .collect())
    }

    async fn extraction_status(&self, chunk_id: &str) -> Result<Option<ExtractionStatus>> {
        Ok(self.read()?.status.get(chunk_id).cloned())
    }

    async fn extraction_backlog(&self) -> Result<ExtractionBacklog> {
        let state = self.read()?;
        let mut backlog = ExtractionBacklog::default();
        for status in state.status.values() {
            match status.state {
                ExtractionState::Pending => backlog.pending += 1,
                ExtractionState::Extracting => backlog.extracting += 1,
                ExtractionState::Completed => backlog.completed += 1,
                ExtractionState::Failed => backlog.failed += 1,
            }
        }
        Ok(backlog)
    }

    async fn purge_source(&self, source: &str) -> Result<RemovedRows> {
        let mut state = self.write()?;
        let doc_ids: BTreeSet<String> = state
            .documents
            .values()
            .filter(|d| d.source == source)
            .map(|d| d.id.clone())
            .collect();
        let chunk_ids: Vec<String> = state
            .chunks
            .values()
            .filter(|c| doc_ids.contains(&c.document_id))
            .map(|c| c.id.clone())
            .collect();

        let mut removed = RemovedRows::default();
        for id in &chunk_ids {
            state.remove_chunk_rows(id);
            removed.chunks += 1;
        }
        let entity_ids: BTreeSet<String> = state
            .entities
            .values()
            .filter(|e| doc_ids.contains(&e.source_document_id))
            .map(|e| e.id.clone())
            .collect();
        state.mentions.retain(|(e, _)| !entity_ids.contains(e));
        for id in &entity_ids {
            state.entities.remove(id);
        }
        removed.entities = entity_ids.len() as u64;
        let before = state.relations.len();
        state
            .relations
            .retain(|_, r| !doc_ids.contains(&r.source_document_id));
        removed.relations = (before - state.relations.len()) as u64;
        for id in &doc_ids {
            state.documents.remove(id);
        }
        removed.documents = doc_ids.len() as u64;
        Ok(removed)
    }
}

fn merge_entity(existing: &mut Entity, incoming: &Entity) -> MergeOutcome {
    let mut outcome = MergeOutcome::Unchanged;
    if incoming.confidence > existing.confidence {
        existing.confidence = incoming.confidence;
        outcome = MergeOutcome::Reinforced;
    }
    if existing.description.is_empty() && !incoming.description.is_empty() {
        existing.description = incoming.description.clone();
        outcome = MergeOutcome::DescriptionFilled;
    }
    outcome
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<MergeOutcome> {
        let mut state = self.write()?;
        match state.entities.get_mut(&entity.id) {
            Some(existing) => Ok(merge_entity(existing, entity)),
            None => {
                state.entities.insert(entity.id.clone(), entity.clone());
                Ok(MergeOutcome::Inserted)
            }
        }
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<MergeOutcome> {
        let mut state = self.write()?;
        match state.relations.get_mut(&relation.id) {
            Some(existing) if relation.confidence > existing.confidence => {
                existing.confidence = relation.confidence;
                Ok(MergeOutcome::Reinforced)
            }
            Some(_) => Ok(MergeOutcome::Unchanged),
            None => {
                state.relations.insert(relation.id.clone(), relation.clone());
                Ok(MergeOutcome::Inserted)
            }
        }
    }

    async fn record_mention(&self, entity_id: &str, chunk_id: &str) -> Result<()> {
        let mut state = self.write()?;
        state
            .mentions
            .insert((entity_id.to_string(), chunk_id.to_string()));
        Ok(())
    }

    async fn entities_by_ids(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect())
    }

    async fn search_entities(
        &self,
        terms: &[String],
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entity>> {
        let state = self.read()?;
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let mut matched: Vec<(u32, &Entity)> = state
            .entities
            .values()
            .filter(|e| {
                source.is_none()
                    || state
                        .documents
                        .get(&e.source_document_id)
                        .map(|d| d.source.as_str())
                        == source
            })
            .map(|e| (entity_match_rank(e, &terms), e))
            .filter(|(rank, _)| *rank > 0)
            .collect();
        matched.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.confidence.total_cmp(&a.1.confidence))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn relations_touching(&self, entity_ids: &[String]) -> Result<Vec<Relation>> {
        let state = self.read()?;
        Ok(state
            .relations
            .values()
            .filter(|r| entity_ids.contains(&r.subject_id) || entity_ids.contains(&r.object_id))
            .cloned()
            .collect())
    }

    async fn mentions(&self, entity_ids: &[String]) -> Result<Vec<(String, String)>> {
        let state = self.read()?;
        Ok(state
            .mentions
            .iter()
            .filter(|(e, _)| entity_ids.contains(e))
            .cloned()
            .collect())
    }

    async fn entities_missing_vectors(&self, limit: usize) -> Result<Vec<Entity>> {
        let state = self.read()?;
        let stored = state.vectors.get(&Collection::Entities);
        Ok(state
            .entities
            .values()
            .filter(|e| stored.is_none_or(|s| !s.contains_key(&e.id)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_relations(&self) -> Result<Vec<Relation>> {
        Ok(self.read()?.relations.values().cloned().collect())
    }

    async fn entity_count(&self) -> Result<u64> {
        Ok(self.read()?.entities.len() as u64)
    }
}

// ============ Graph ============

/// Process-local [`GraphStore`] over an [`EdgeList`].
#[derive(Default)]
pub struct InMemoryGraph {
    inner: RwLock<GraphState>,
}

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, String>,
    edges: EdgeList,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges currently held.
    pub fn edge_count(&self) -> usize {
        self.inner.read().map(|g| g.edges.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_node(&self, entity: &Entity) -> Result<()> {
        let mut g = self
            .inner
            .write()
            .map_err(|_| anyhow!("graph lock poisoned"))?;
        g.nodes
            .insert(entity.id.clone(), entity.source_document_id.clone());
        Ok(())
    }

    async fn upsert_edge(&self, relation: &Relation) -> Result<()> {
        let mut g = self
            .inner
            .write()
            .map_err(|_| anyhow!("graph lock poisoned"))?;
        g.edges.upsert(relation);
        Ok(())
    }

    async fn traverse(&self, start_ids: &[String], max_hops: usize) -> Result<Subgraph> {
        let g = self
            .inner
            .read()
            .map_err(|_| anyhow!("graph lock poisoned"))?;
        Ok(g.edges.traverse(start_ids, max_hops))
    }

    async fn delete_documents(&self, document_ids: &[String]) -> Result<u64> {
        let mut g = self
            .inner
            .write()
            .map_err(|_| anyhow!("graph lock poisoned"))?;
        let removed = g
            .edges
            .remove_where(|r| document_ids.contains(&r.source_document_id));
        let before = g.nodes.len();
        g.nodes.retain(|_, doc| !document_ids.contains(doc));
        Ok((removed + before - g.nodes.len()) as u64)
    }
}
