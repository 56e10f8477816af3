//! The hybrid search engine.
//!
//! One call to [`SearchEngine::search`] does the following:
//!
//! 1. Classify the query and pick a weight profile.
//! 2. Plan strategies for the mode and the configured capabilities.
//! 3. Run them concurrently ([`crate::executor`]) under per-strategy
//!    budgets and the query deadline.
//! 4. Rank: agreement, weighted RRF, similarity floor, `min_score`.
//! 5. If nothing survives, cascade: stemmed lexical matching with a
//!    lowered floor, then substring matching, then an explicit empty
//!    result with suggestions.
//! 6. Diversify with MMR, rerank the top N against the query embedding,
//!    and cut to the limit.
//!
//! Only when every attempted strategy fails does the caller see an error
//! ([`EngineError::AllStrategiesFailed`]); anything less is an answer with
//! notes and a lowered confidence.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use strata_core::agreement::Candidate;
use strata_core::classify::{classify, Classification, QueryType, WeightProfile};
use strata_core::embedding::{cosine_similarity, EmbeddingProvider};
use strata_core::kag::rank_entities_lexical;
use strata_core::postprocess::{blend_rerank, mmr_select};
use strata_core::search::{
    overall_confidence, rank_pass, suggestions, FallbackStage, HitExplanation, RankedChunk,
    RetrievalParams, SearchHit, SearchMode, SearchOutcome, SearchRequest, SearchResponse,
    Strategy, StrategyReport, StrategyResult, StrategyStatus,
};
use strata_core::store::{
    Collection, KnowledgeStore, LexicalIndex, LexicalMode, LexicalQuery, MetadataStore,
    VectorFilter, VectorIndex,
};
use strata_core::text::{content_terms, jaccard, truncate_chars};

use crate::backends::Backends;
use crate::config::{Config, TimeoutConfig};
use crate::error::EngineError;
use crate::executor::{run_strategies, Execution, StrategyTask};

const SNIPPET_CHARS: usize = 240;
/// Entities whose mentions feed the entity strategy.
const ENTITY_FANOUT: usize = 10;
/// Extra time allowed past the deadline for loading hit metadata.
const ENRICH_GRACE: Duration = Duration::from_millis(250);

pub struct SearchEngine {
    backends: Backends,
    params: RetrievalParams,
    timeouts: TimeoutConfig,
    kag_enabled: bool,
}

impl SearchEngine {
    pub fn new(backends: Backends, config: &Config) -> Self {
        Self::with_settings(
            backends,
            config.retrieval.params(),
            config.timeouts.clone(),
            config.kag.enabled,
        )
    }

    pub fn with_settings(
        backends: Backends,
        params: RetrievalParams,
        timeouts: TimeoutConfig,
        kag_enabled: bool,
    ) -> Self {
        Self {
            backends,
            params,
            timeouts,
            kag_enabled,
        }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        self.search_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Search, stopping early when `cancel` fires.
    pub async fn search_with_cancel(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, EngineError> {
        let started = Instant::now();
        let deadline = started + self.timeouts.deadline();
        let query = request.query.trim();
        if query.is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        validate(request)?;

        let classification = classify(query);
        let weights = request
            .semantic_weight
            .map(WeightProfile::with_semantic)
            .unwrap_or(classification.weights);
        let limit = request.limit.unwrap_or(self.params.limit);
        let min_score = request.min_score.unwrap_or(self.params.min_score);
        let ctx = QueryContext {
            query: query.to_string(),
            classification: classification.clone(),
            source: request.source.clone(),
            fetch: self.params.candidate_k.max(limit),
            query_vector: Arc::new(OnceLock::new()),
        };

        let mut notes: Vec<String> = Vec::new();
        let mut reports: Vec<StrategyReport> = Vec::new();
        let plan = self.plan(request.mode, &ctx, &mut reports, &mut notes).await;
        let semantic_missing = reports
            .iter()
            .any(|r| r.strategy == Strategy::Semantic && matches!(r.status, StrategyStatus::Skipped { .. }));

        // Primary pass.
        let tasks = plan
            .iter()
            .map(|s| self.task(*s, LexicalMode::Relaxed, &ctx))
            .collect();
        let primary = run_strategies(tasks, deadline, cancel).await;
        reports.extend(primary.reports.iter().cloned());

        if primary.completed() == 0 {
            if primary.cancelled() || cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let failures = primary.failures();
            tracing::error!(query = %query, ?failures, "all search strategies failed");
            return Err(EngineError::AllStrategiesFailed { failures });
        }
        let degraded = primary.degraded();
        for (strategy, reason) in primary.failures() {
            notes.push(format!("{} degraded ({}); results exclude it", strategy, reason));
        }

        let mut results = primary.results;
        let mut executed = results.len();
        let mut floor = self.params.similarity_floor;
        let mut stage = FallbackStage::Primary;
        let mut candidates = rank_pass(
            &results,
            executed,
            &classification,
            &weights,
            &self.params,
            floor,
            min_score,
        );

        let lexical_planned = plan.iter().any(|s| s.is_lexical());
        if candidates.is_empty() {
            stage = FallbackStage::Relaxed;
            floor *= self.params.fallback_floor_factor;
            if lexical_planned {
                let exec = self
                    .fallback_pass(LexicalMode::Stemmed, &ctx, deadline, cancel)
                    .await;
                reports.extend(exec.reports.iter().cloned());
                executed += merge_results(&mut results, exec);
            }
            candidates = rank_pass(
                &results,
                executed,
                &classification,
                &weights,
                &self.params,
                floor,
                min_score,
            );
            if !candidates.is_empty() {
                notes.push("no primary matches; used stemmed terms and a lowered similarity floor".to_string());
            }
        }
        if candidates.is_empty() && lexical_planned {
            stage = FallbackStage::Substring;
            let exec = self
                .fallback_pass(LexicalMode::Substring, &ctx, deadline, cancel)
                .await;
            reports.extend(exec.reports.iter().cloned());
            executed += merge_results(&mut results, exec);
            candidates = rank_pass(
                &results,
                executed,
                &classification,
                &weights,
                &self.params,
                floor,
                min_score,
            );
            if !candidates.is_empty() {
                notes.push("no whole-term matches; results come from partial-word matching".to_string());
            }
        }
        if candidates.is_empty() {
            stage = FallbackStage::Exhausted;
        }

        // Diversity and reranking.
        let use_mmr = request.mmr.unwrap_or(self.params.mmr_enabled);
        let use_rerank = request.rerank.unwrap_or(self.params.rerank_enabled)
            && request.mode != SearchMode::Fts
            && self.backends.embedder.is_some();
        let pool = if use_rerank {
            self.params.rerank_top_n.max(limit)
        } else {
            limit
        };

        let mut selected = if use_mmr && candidates.len() > 1 {
            let lambda = request.mmr_lambda.unwrap_or(self.params.mmr_lambda);
            let stored = self.stored_vectors(&candidates, deadline).await;
            mmr_select(candidates, pool, lambda, |a, b| {
                candidate_similarity(&stored, a, b)
            })
        } else {
            candidates.truncate(pool);
            candidates
        };

        if use_rerank && !selected.is_empty() {
            let semantic_degraded = reports
                .iter()
                .any(|r| r.strategy == Strategy::Semantic && r.status.is_degraded());
            if semantic_degraded && ctx.query_vector.get().is_none() {
                notes.push("rerank skipped: query embedding unavailable".to_string());
            } else {
                selected = self.rerank(selected, &ctx, deadline, &mut notes).await;
            }
        }
        selected.truncate(limit);

        let confidence = overall_confidence(&selected, degraded || semantic_missing);
        let hits = self.to_hits(&selected, request.explain, deadline).await;
        let outcome = match stage {
            FallbackStage::Exhausted => SearchOutcome::Empty,
            _ if degraded => SearchOutcome::Partial,
            _ => SearchOutcome::Success,
        };
        let suggestions = if stage == FallbackStage::Exhausted {
            suggestions(query, &classification)
        } else {
            Vec::new()
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            query_type = classification.query_type.as_str(),
            hits = hits.len(),
            ?stage,
            ?outcome,
            elapsed_ms,
            "search complete"
        );

        Ok(SearchResponse {
            query: query.to_string(),
            query_type: classification.query_type,
            mode: request.mode,
            weights,
            outcome,
            confidence,
            fallback_stage: stage,
            hits,
            strategies: reports,
            notes,
            suggestions,
            elapsed_ms,
        })
    }

    /// Strategies to run for `mode`; unavailable ones are reported as skipped.
    async fn plan(
        &self,
        mode: SearchMode,
        ctx: &QueryContext,
        reports: &mut Vec<StrategyReport>,
        notes: &mut Vec<String>,
    ) -> Vec<Strategy> {
        let mut plan = Vec::new();
        if mode != SearchMode::Semantic {
            plan.push(Strategy::LexicalExact);
            plan.push(Strategy::LexicalRelaxed);
        }

        if mode != SearchMode::Fts {
            if self.backends.embedder.is_some() {
                plan.push(Strategy::Semantic);
            } else {
                reports.push(skipped(Strategy::Semantic, "no embedding provider configured"));
                notes.push("semantic search unavailable; confidence lowered".to_string());
            }
        }

        let entity_relevant = mode == SearchMode::Auto
            && (ctx.classification.query_type == QueryType::Entity
                || !ctx.classification.proper_nouns.is_empty());
        if entity_relevant {
            if !self.kag_enabled {
                reports.push(skipped(Strategy::Entity, "knowledge graph disabled"));
            } else if self.has_entities().await {
                plan.push(Strategy::Entity);
            } else {
                reports.push(skipped(Strategy::Entity, "no entities extracted yet"));
            }
        }

        if plan.is_empty() {
            notes.push("semantic mode requested without an embedding provider; answered with lexical search".to_string());
            plan = vec![Strategy::LexicalExact, Strategy::LexicalRelaxed];
        }
        plan
    }

    async fn has_entities(&self) -> bool {
        let probe = tokio::time::timeout(self.timeouts.entity(), self.backends.knowledge.entity_count());
        matches!(probe.await, Ok(Ok(n)) if n > 0)
    }

    fn task(&self, strategy: Strategy, relaxed_mode: LexicalMode, ctx: &QueryContext) -> StrategyTask {
        match strategy {
            Strategy::LexicalExact => {
                let query = LexicalQuery {
                    text: ctx.query.clone(),
                    phrases: ctx.classification.quoted_phrases.clone(),
                    mode: LexicalMode::Phrase,
                };
                lexical_task(strategy, self.backends.lexical.clone(), query, ctx, self.timeouts.lexical())
            }
            Strategy::LexicalRelaxed => {
                let query = LexicalQuery {
                    text: ctx.query.clone(),
                    phrases: Vec::new(),
                    mode: relaxed_mode,
                };
                lexical_task(strategy, self.backends.lexical.clone(), query, ctx, self.timeouts.lexical())
            }
            Strategy::Semantic => match &self.backends.embedder {
                Some(embedder) => semantic_task(
                    embedder.clone(),
                    self.backends.vectors.clone(),
                    self.backends.metadata.clone(),
                    ctx,
                    self.timeouts.semantic(),
                ),
                None => StrategyTask::new(strategy, Duration::ZERO, async {
                    Err(anyhow::anyhow!("no embedding provider configured"))
                }),
            },
            Strategy::Entity => entity_task(
                self.backends.knowledge.clone(),
                self.backends.metadata.clone(),
                ctx,
                self.timeouts.entity(),
            ),
        }
    }

    /// Run the relaxed lexical strategy alone in a fallback mode.
    async fn fallback_pass(
        &self,
        mode: LexicalMode,
        ctx: &QueryContext,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Execution {
        if Instant::now() >= deadline || cancel.is_cancelled() {
            return Execution::default();
        }
        let task = self.task(Strategy::LexicalRelaxed, mode, ctx);
        run_strategies(vec![task], deadline, cancel).await
    }

    async fn stored_vectors(
        &self,
        candidates: &[Candidate],
        deadline: Instant,
    ) -> HashMap<String, Vec<f32>> {
        let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let fetch = self.backends.vectors.vectors(Collection::Chunks, &ids);
        match tokio::time::timeout_at(deadline, fetch).await {
            Ok(Ok(map)) => map,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "stored vectors unavailable; MMR uses text overlap");
                HashMap::new()
            }
            Err(_) => HashMap::new(),
        }
    }

    async fn rerank(
        &self,
        candidates: Vec<Candidate>,
        ctx: &QueryContext,
        deadline: Instant,
        notes: &mut Vec<String>,
    ) -> Vec<Candidate> {
        let Some(embedder) = self.backends.embedder.clone() else {
            return candidates;
        };
        let stop_at = (Instant::now() + self.timeouts.rerank()).min(deadline);
        if Instant::now() >= stop_at {
            notes.push("rerank skipped: deadline reached".to_string());
            return candidates;
        }

        let scoring = rerank_similarities(
            embedder.as_ref(),
            self.backends.vectors.as_ref(),
            &candidates,
            ctx,
        );
        match tokio::time::timeout_at(stop_at, scoring).await {
            Ok(Ok(similarities)) => blend_rerank(candidates, &similarities, self.params.rerank_weight),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "rerank failed");
                notes.push(format!("rerank skipped: {}", e));
                candidates
            }
            Err(_) => {
                notes.push("rerank skipped: timed out".to_string());
                candidates
            }
        }
    }

    async fn to_hits(&self, selected: &[Candidate], explain: bool, deadline: Instant) -> Vec<SearchHit> {
        let ids: Vec<String> = selected.iter().map(|c| c.chunk_id.clone()).collect();
        let contexts = match tokio::time::timeout_at(
            deadline + ENRICH_GRACE,
            self.backends.metadata.chunk_contexts(&ids),
        )
        .await
        {
            Ok(Ok(map)) => map,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "hit metadata unavailable");
                HashMap::new()
            }
            Err(_) => HashMap::new(),
        };

        selected
            .iter()
            .map(|c| {
                let ctx = contexts.get(&c.chunk_id);
                SearchHit {
                    chunk_id: c.chunk_id.clone(),
                    document_id: c.document_id.clone(),
                    source: ctx.map(|x| x.source.clone()).unwrap_or_default(),
                    path: ctx
                        .map(|x| x.path.clone())
                        .unwrap_or_else(|| c.document_id.clone()),
                    title: ctx.and_then(|x| x.title.clone()),
                    snippet: c.snippet.clone(),
                    score: c.score,
                    strategies: c.strategies(),
                    best_rank: c.best_rank(),
                    agreement: c.agreement,
                    confidence: c.confidence,
                    explain: explain.then(|| HitExplanation {
                        fused: c.fused,
                        ranks: c.ranks.iter().map(|(s, r)| (*s, *r)).collect(),
                        proper_noun_boost: c.proper_noun_boost,
                        semantic_similarity: c.semantic_similarity,
                        rerank_similarity: c.rerank_similarity,
                    }),
                }
            })
            .collect()
    }
}

/// Per-query values shared by every strategy task.
struct QueryContext {
    query: String,
    classification: Classification,
    source: Option<String>,
    /// Per-strategy fetch size.
    fetch: usize,
    /// Set by the semantic strategy; reused by reranking.
    query_vector: Arc<OnceLock<Vec<f32>>>,
}

fn validate(request: &SearchRequest) -> Result<(), EngineError> {
    if request.limit == Some(0) {
        return Err(EngineError::InvalidRequest("limit must be >= 1".to_string()));
    }
    for (name, value) in [
        ("min_score", request.min_score),
        ("semantic_weight", request.semantic_weight),
        ("mmr_lambda", request.mmr_lambda),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(EngineError::InvalidRequest(format!(
                    "{} must be in [0.0, 1.0], got {}",
                    name, v
                )));
            }
        }
    }
    Ok(())
}

fn skipped(strategy: Strategy, reason: &str) -> StrategyReport {
    StrategyReport {
        strategy,
        status: StrategyStatus::Skipped {
            reason: reason.to_string(),
        },
        elapsed_ms: 0,
    }
}

/// Fold a fallback pass into the running results; returns how many
/// strategies completed for the first time.
fn merge_results(results: &mut Vec<StrategyResult>, exec: Execution) -> usize {
    let mut added = 0;
    for result in exec.results {
        match results.iter_mut().find(|r| r.strategy == result.strategy) {
            Some(existing) => existing.hits = result.hits,
            None => {
                results.push(result);
                added += 1;
            }
        }
    }
    added
}

/// Cosine of stored vectors when both candidates have one, else token overlap.
fn candidate_similarity(stored: &HashMap<String, Vec<f32>>, a: &Candidate, b: &Candidate) -> f64 {
    match (stored.get(&a.chunk_id), stored.get(&b.chunk_id)) {
        (Some(va), Some(vb)) => (cosine_similarity(va, vb) as f64).clamp(0.0, 1.0),
        _ => jaccard(&a.text, &b.text),
    }
}

async fn rerank_similarities(
    embedder: &dyn EmbeddingProvider,
    vectors: &dyn VectorIndex,
    candidates: &[Candidate],
    ctx: &QueryContext,
) -> anyhow::Result<Vec<Option<f64>>> {
    let query_vector = match ctx.query_vector.get() {
        Some(v) => v.clone(),
        None => embedder.embed_one(&ctx.query).await?,
    };

    let ids: Vec<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
    let mut stored = vectors.vectors(Collection::Chunks, &ids).await?;

    let missing: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| !stored.contains_key(&c.chunk_id) && !c.text.is_empty())
        .collect();
    if !missing.is_empty() {
        let texts: Vec<String> = missing.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed(&texts).await?;
        for (c, v) in missing.iter().zip(embedded) {
            stored.insert(c.chunk_id.clone(), v);
        }
    }

    Ok(candidates
        .iter()
        .map(|c| {
            stored
                .get(&c.chunk_id)
                .map(|v| cosine_similarity(&query_vector, v) as f64)
        })
        .collect())
}

fn lexical_task(
    strategy: Strategy,
    lexical: Arc<dyn LexicalIndex>,
    query: LexicalQuery,
    ctx: &QueryContext,
    budget: Duration,
) -> StrategyTask {
    let limit = ctx.fetch;
    let source = ctx.source.clone();
    StrategyTask::new(strategy, budget, async move {
        lexical.search(&query, limit, source.as_deref()).await
    })
}

fn semantic_task(
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    metadata: Arc<dyn MetadataStore>,
    ctx: &QueryContext,
    budget: Duration,
) -> StrategyTask {
    let query = ctx.query.clone();
    let limit = ctx.fetch;
    let filter = ctx
        .source
        .clone()
        .map(VectorFilter::source)
        .unwrap_or_default();
    let slot = ctx.query_vector.clone();

    StrategyTask::new(Strategy::Semantic, budget, async move {
        let vector = embedder.embed_one(&query).await?;
        let matches = vectors
            .query(Collection::Chunks, &vector, &filter, limit)
            .await?;
        let _ = slot.set(vector);

        let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
        let contexts = metadata.chunk_contexts(&ids).await?;
        Ok(matches
            .into_iter()
            .filter_map(|m| {
                contexts.get(&m.id).map(|ctx| RankedChunk {
                    chunk_id: m.id.clone(),
                    document_id: m.payload.document_id.clone(),
                    score: m.score,
                    snippet: truncate_chars(&ctx.text, SNIPPET_CHARS),
                    text: ctx.text.clone(),
                })
            })
            .collect())
    })
}

/// Chunks that mention entities matching the query, in entity-rank order.
fn entity_task(
    knowledge: Arc<dyn KnowledgeStore>,
    metadata: Arc<dyn MetadataStore>,
    ctx: &QueryContext,
    budget: Duration,
) -> StrategyTask {
    let query = ctx.query.clone();
    let hints = ctx.classification.proper_nouns.clone();
    let source = ctx.source.clone();
    let limit = ctx.fetch;

    StrategyTask::new(Strategy::Entity, budget, async move {
        let mut terms = content_terms(&query);
        for noun in &hints {
            let lower = noun.to_lowercase();
            if !terms.contains(&lower) {
                terms.push(lower);
            }
        }
        let found = knowledge
            .search_entities(&terms, source.as_deref(), limit)
            .await?;
        let ranked = rank_entities_lexical(found, &query, &terms, &hints);
        let top: Vec<(String, f64)> = ranked
            .into_iter()
            .take(ENTITY_FANOUT)
            .map(|(e, score)| (e.id, score))
            .collect();
        let entity_ids: Vec<String> = top.iter().map(|(id, _)| id.clone()).collect();
        let mentions = knowledge.mentions(&entity_ids).await?;

        let mut seen = HashSet::new();
        let mut ordered: Vec<(String, f64)> = Vec::new();
        for (entity_id, score) in &top {
            for (_, chunk_id) in mentions.iter().filter(|(e, _)| e == entity_id) {
                if seen.insert(chunk_id.clone()) {
                    ordered.push((chunk_id.clone(), *score));
                }
            }
        }
        ordered.truncate(limit);

        let chunk_ids: Vec<String> = ordered.iter().map(|(id, _)| id.clone()).collect();
        let contexts = metadata.chunk_contexts(&chunk_ids).await?;
        Ok(ordered
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let ctx = contexts.get(&chunk_id)?;
                if source.as_deref().is_some_and(|s| s != ctx.source) {
                    return None;
                }
                Some(RankedChunk {
                    chunk_id,
                    document_id: ctx.document_id.clone(),
                    score,
                    snippet: truncate_chars(&ctx.text, SNIPPET_CHARS),
                    text: ctx.text.clone(),
                })
            })
            .collect())
    })
}
