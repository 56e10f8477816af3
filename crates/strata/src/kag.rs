//! Knowledge-graph search: find entities for a query, then the relations
//! around them.
//!
//! Entity retrieval fuses two ranked lists with RRF:
//! - lexical: any content term against name and description, scored
//!   exact > prefix > substring (see [`rank_entities_lexical`])
//! - semantic: nearest neighbours in the entity vector collection at or
//!   above the similarity floor, when an embedder is configured
//!
//! Relations come from the graph store's traversal when one is configured,
//! otherwise from hop-by-hop lookups in the relational store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::time::Instant;

use strata_core::embedding::EmbeddingProvider;
use strata_core::fusion::reciprocal_rank_fusion;
use strata_core::graph::sort_relations;
use strata_core::kag::{
    rank_entities_lexical, render_context, EntityView, KagRequest, KagResponse, RelationView,
};
use strata_core::models::{Entity, Relation};
use strata_core::store::{Collection, VectorFilter};
use strata_core::text::{content_terms, tokenize};

use crate::backends::Backends;
use crate::config::{Config, KagConfig, TimeoutConfig};
use crate::error::EngineError;

/// Candidates fetched per list before fusion, as a multiple of the limit.
const FETCH_FACTOR: usize = 3;

pub struct KagSearcher {
    backends: Backends,
    config: KagConfig,
    timeouts: TimeoutConfig,
    rrf_k: f64,
    similarity_floor: f64,
}

impl KagSearcher {
    pub fn new(backends: Backends, config: &Config) -> Self {
        Self {
            backends,
            config: config.kag.clone(),
            timeouts: config.timeouts.clone(),
            rrf_k: config.retrieval.rrf_k,
            similarity_floor: config.retrieval.similarity_floor,
        }
    }

    pub async fn search(&self, request: &KagRequest) -> Result<KagResponse, EngineError> {
        let started = Instant::now();
        let query = request.query.trim();
        if query.is_empty() && request.entity_hints.is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        let hops = request.hops(self.config.max_hops);
        let limit = request.entity_limit(self.config.limit);
        let mut notes = Vec::new();

        if !self.config.enabled {
            notes.push("knowledge graph search is disabled".to_string());
            return Ok(self.respond(query, hops, Vec::new(), Vec::new(), notes, started));
        }

        let terms = query_terms(query, &request.entity_hints);
        let fetch = limit.saturating_mul(FETCH_FACTOR);
        let source = request.source.as_deref();

        let lexical = self
            .backends
            .knowledge
            .search_entities(&terms, source, fetch)
            .await?;
        let lexical = rank_entities_lexical(lexical, query, &terms, &request.entity_hints);

        let semantic_ids = match &self.backends.embedder {
            Some(embedder) => match self.semantic_entities(embedder.clone(), query, source, fetch).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(error = %e, "semantic entity search degraded");
                    notes.push(format!("semantic entity search unavailable ({}); lexical only", e));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut by_id: HashMap<String, Entity> = HashMap::new();
        let lexical_ids: Vec<String> = lexical
            .into_iter()
            .map(|(e, _)| {
                let id = e.id.clone();
                by_id.insert(id.clone(), e);
                id
            })
            .collect();
        let missing: Vec<String> = semantic_ids
            .iter()
            .filter(|id| !by_id.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            for e in self.backends.knowledge.entities_by_ids(&missing).await? {
                by_id.insert(e.id.clone(), e);
            }
        }

        let fused = reciprocal_rank_fusion(&[(1.0, lexical_ids), (1.0, semantic_ids)], self.rrf_k);
        let top = normalized_top(&fused, limit);
        let entities: Vec<EntityView> = top
            .iter()
            .filter_map(|(id, score)| by_id.get(id).map(|e| EntityView::from_entity(e, *score)))
            .collect();

        let seeds: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let relations = if seeds.is_empty() {
            Vec::new()
        } else {
            let found = self.relations_around(&seeds, hops.max(1), &mut notes).await?;
            self.within_source(found, source).await?
        };
        let relations = self.resolve_names(&relations, &by_id).await?;

        tracing::info!(
            entities = entities.len(),
            relations = relations.len(),
            hops,
            "kag search complete"
        );
        Ok(self.respond(query, hops, entities, relations, notes, started))
    }

    async fn semantic_entities(
        &self,
        embedder: Arc<dyn EmbeddingProvider>,
        query: &str,
        source: Option<&str>,
        fetch: usize,
    ) -> Result<Vec<String>> {
        let filter = source.map(VectorFilter::source).unwrap_or_default();
        let vectors = self.backends.vectors.clone();
        let lookup = async move {
            let vector = embedder.embed_one(query).await?;
            vectors
                .query(Collection::Entities, &vector, &filter, fetch)
                .await
        };
        let matches = tokio::time::timeout(self.timeouts.semantic(), lookup)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {}ms", self.timeouts.semantic_ms))??;
        Ok(matches
            .into_iter()
            .filter(|m| m.score >= self.similarity_floor)
            .map(|m| m.id)
            .collect())
    }

    /// Relations within `hops` of the seeds, strongest first.
    async fn relations_around(
        &self,
        seeds: &[String],
        hops: usize,
        notes: &mut Vec<String>,
    ) -> Result<Vec<Relation>> {
        if let Some(graph) = &self.backends.graph {
            let timeout = self.backends.graph_timeout;
            match tokio::time::timeout(timeout, graph.traverse(seeds, hops)).await {
                Ok(Ok(subgraph)) => return Ok(subgraph.relations),
                Ok(Err(e)) => {
                    tracing::warn!(graph = graph.name(), error = %e, "graph traversal failed");
                    notes.push("graph store unavailable; relations read from the relational store".to_string());
                }
                Err(_) => {
                    tracing::warn!(
                        graph = graph.name(),
                        timeout_ms = timeout.as_millis() as u64,
                        "graph traversal timed out"
                    );
                    notes.push("graph store timed out; relations read from the relational store".to_string());
                }
            }
        }

        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut frontier: Vec<String> = seeds.to_vec();
        let mut seen_edges: HashSet<String> = HashSet::new();
        let mut relations = Vec::new();
        for _ in 0..hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for rel in self.backends.knowledge.relations_touching(&frontier).await? {
                for endpoint in [&rel.subject_id, &rel.object_id] {
                    if visited.insert(endpoint.clone()) {
                        next.push(endpoint.clone());
                    }
                }
                if seen_edges.insert(rel.id.clone()) {
                    relations.push(rel);
                }
            }
            frontier = next;
        }
        sort_relations(&mut relations);
        Ok(relations)
    }

    async fn within_source(&self, relations: Vec<Relation>, source: Option<&str>) -> Result<Vec<Relation>> {
        let Some(source) = source else {
            return Ok(relations);
        };
        let docs: HashSet<String> = self
            .backends
            .metadata
            .source_document_ids(source)
            .await?
            .into_iter()
            .collect();
        Ok(relations
            .into_iter()
            .filter(|r| docs.contains(&r.source_document_id))
            .collect())
    }

    async fn resolve_names(
        &self,
        relations: &[Relation],
        known: &HashMap<String, Entity>,
    ) -> Result<Vec<RelationView>> {
        let mut names: HashMap<String, String> = known
            .iter()
            .map(|(id, e)| (id.clone(), e.name.clone()))
            .collect();
        let unknown: Vec<String> = relations
            .iter()
            .flat_map(|r| [r.subject_id.clone(), r.object_id.clone()])
            .filter(|id| !names.contains_key(id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            for e in self.backends.knowledge.entities_by_ids(&unknown).await? {
                names.insert(e.id, e.name);
            }
        }
        Ok(relations
            .iter()
            .map(|r| RelationView::resolve(r, |id| names.get(id).cloned()))
            .collect())
    }

    fn respond(
        &self,
        query: &str,
        hops: usize,
        entities: Vec<EntityView>,
        relations: Vec<RelationView>,
        notes: Vec<String>,
        started: Instant,
    ) -> KagResponse {
        let context = render_context(
            &entities,
            &relations,
            self.config.render_entities,
            self.config.render_relations,
        );
        KagResponse {
            query: query.to_string(),
            hops,
            entities,
            relations,
            context,
            notes,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Content terms of the query plus the tokens of every hint.
fn query_terms(query: &str, hints: &[String]) -> Vec<String> {
    let mut terms = content_terms(query);
    for hint in hints {
        for token in tokenize(hint) {
            if !terms.contains(&token) {
                terms.push(token);
            }
        }
    }
    terms
}

/// First `limit` fused entries with scores scaled so the best is 1.0.
fn normalized_top(fused: &[(String, f64)], limit: usize) -> Vec<(String, f64)> {
    let top = fused.first().map(|(_, s)| *s).unwrap_or(0.0);
    fused
        .iter()
        .take(limit)
        .map(|(id, s)| {
            let score = if top > 0.0 { s / top } else { 0.0 };
            (id.clone(), score)
        })
        .collect()
}
