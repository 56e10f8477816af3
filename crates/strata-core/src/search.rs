//! Retrieval request/response model and the pure ranking pass.
//!
//! The application crate runs strategies concurrently and hands their
//! ranked lists to [`rank_pass`], which applies agreement scoring, weighted
//! reciprocal rank fusion, the semantic similarity floor, and the
//! caller's minimum score. Diversity and reranking happen afterwards in
//! [`crate::postprocess`].
//!
//! # Ranking pass
//!
//! 1. Merge per-strategy lists into candidates ([`crate::agreement`]).
//! 2. Fuse: `Σ weight / (k + rank)`, agreement bonus, proper-noun boost
//!    ([`crate::fusion`]).
//! 3. Drop semantic-only candidates under the similarity floor.
//! 4. Normalize scores to the top candidate (top = 1.0).
//! 5. Drop candidates under `min_score`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agreement::{score_agreement, Candidate, Confidence};
use crate::classify::{Classification, QueryType, WeightProfile};
use crate::fusion::{fuse, FusionParams};
use crate::postprocess::{apply_similarity_floor, normalize_to_top};
use crate::text::content_terms;

/// One independent retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Phrase match over the full-text index.
    LexicalExact,
    /// Any-term prefix match; stemmed or substring during fallback.
    LexicalRelaxed,
    /// Nearest neighbours of the query embedding.
    Semantic,
    /// Chunks that mention entities matching the query.
    Entity,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::LexicalExact => "lexical_exact",
            Strategy::LexicalRelaxed => "lexical_relaxed",
            Strategy::Semantic => "semantic",
            Strategy::Entity => "entity",
        }
    }

    pub fn is_lexical(&self) -> bool {
        matches!(self, Strategy::LexicalExact | Strategy::LexicalRelaxed)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk as returned by a single strategy, before fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub document_id: String,
    /// Backend-specific raw score (BM25 rank, cosine similarity, match count).
    pub score: f64,
    pub snippet: String,
    pub text: String,
}

/// The ordered output of one completed strategy.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub strategy: Strategy,
    pub hits: Vec<RankedChunk>,
}

/// Caller-selected retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Classify the query and run every available strategy.
    #[default]
    Auto,
    /// Same strategies as `auto`; the caller may override the weights.
    Hybrid,
    Semantic,
    /// Lexical strategies only.
    Fts,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Auto => "auto",
            SearchMode::Hybrid => "hybrid",
            SearchMode::Semantic => "semantic",
            SearchMode::Fts => "fts",
        }
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SearchMode::Auto),
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            "fts" | "keyword" | "lexical" => Ok(SearchMode::Fts),
            other => anyhow::bail!(
                "unknown search mode '{}': expected auto, hybrid, semantic, or fts",
                other
            ),
        }
    }
}

/// A caller's search request. `None` fields fall back to configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    /// Replaces the classifier's semantic weight; lexical becomes `1 - w`.
    pub semantic_weight: Option<f64>,
    pub mmr_lambda: Option<f64>,
    pub mmr: Option<bool>,
    pub rerank: Option<bool>,
    /// Restrict results to one source.
    pub source: Option<String>,
    #[serde(default)]
    pub explain: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Ranking knobs, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub candidate_k: usize,
    pub limit: usize,
    pub fusion: FusionParams,
    pub similarity_floor: f64,
    pub fallback_floor_factor: f64,
    pub min_score: f64,
    pub mmr_enabled: bool,
    pub mmr_lambda: f64,
    pub rerank_enabled: bool,
    pub rerank_top_n: usize,
    pub rerank_weight: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        RetrievalParams {
            candidate_k: 40,
            limit: 10,
            fusion: FusionParams::default(),
            similarity_floor: 0.18,
            fallback_floor_factor: 0.5,
            min_score: 0.0,
            mmr_enabled: true,
            mmr_lambda: 0.7,
            rerank_enabled: true,
            rerank_top_n: 30,
            rerank_weight: 0.5,
        }
    }
}

/// How one strategy ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyStatus {
    Completed { hits: usize },
    TimedOut { budget_ms: u64 },
    Failed { error: String },
    /// Not attempted: mode excludes it or its backend is not configured.
    Skipped { reason: String },
    Cancelled,
}

impl StrategyStatus {
    /// True when a strategy that should have contributed did not.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            StrategyStatus::TimedOut { .. } | StrategyStatus::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub strategy: Strategy,
    #[serde(flatten)]
    pub status: StrategyStatus,
    pub elapsed_ms: u64,
}

/// Which pass of the never-empty cascade produced the hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStage {
    Primary,
    /// Stemmed lexical matching and a lowered similarity floor.
    Relaxed,
    /// Partial-token substring matching.
    Substring,
    /// Every pass came back empty.
    Exhausted,
}

/// Boundary outcome, mapped to exit codes by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    Success,
    /// Hits returned, but at least one strategy timed out or failed.
    Partial,
    /// The cascade was exhausted.
    Empty,
}

/// Per-hit scoring detail, included when the request sets `explain`.
#[derive(Debug, Clone, Serialize)]
pub struct HitExplanation {
    pub fused: f64,
    pub ranks: Vec<(Strategy, usize)>,
    pub proper_noun_boost: bool,
    pub semantic_similarity: Option<f64>,
    pub rerank_similarity: Option<f64>,
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub path: String,
    pub title: Option<String>,
    pub snippet: String,
    /// Normalized so that the top hit of the fused list is 1.0.
    pub score: f64,
    pub strategies: Vec<Strategy>,
    pub best_rank: usize,
    pub agreement: f64,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<HitExplanation>,
}

/// The full answer to a [`SearchRequest`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub query_type: QueryType,
    pub mode: SearchMode,
    pub weights: WeightProfile,
    pub outcome: SearchOutcome,
    pub confidence: Confidence,
    pub fallback_stage: FallbackStage,
    pub hits: Vec<SearchHit>,
    pub strategies: Vec<StrategyReport>,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub elapsed_ms: u64,
}

/// Run agreement, fusion, the floor, and the minimum score over one pass's
/// strategy results.
///
/// `executed` is the number of strategies that completed in this pass and
/// is the agreement denominator.
pub fn rank_pass(
    results: &[StrategyResult],
    executed: usize,
    classification: &Classification,
    weights: &WeightProfile,
    params: &RetrievalParams,
    similarity_floor: f64,
    min_score: f64,
) -> Vec<Candidate> {
    let candidates = score_agreement(results, executed);
    let fused = fuse(
        candidates,
        weights,
        &classification.proper_nouns,
        &params.fusion,
    );
    let (kept, _) = apply_similarity_floor(fused, similarity_floor);
    let mut normalized = normalize_to_top(kept);
    normalized.retain(|c| c.score >= min_score);
    normalized
}

/// Overall confidence: the top hit's label, one level lower when any
/// strategy was degraded.
pub fn overall_confidence(hits: &[Candidate], degraded: bool) -> Confidence {
    match hits.first() {
        None => Confidence::Low,
        Some(top) if degraded => top.confidence.downgrade(),
        Some(top) => top.confidence,
    }
}

/// Hints attached to an exhausted search.
pub fn suggestions(query: &str, classification: &Classification) -> Vec<String> {
    let mut out = Vec::new();
    let terms = content_terms(query);
    if !classification.quoted_phrases.is_empty() {
        out.push("remove the quotes to match the words in any order".to_string());
    }
    if terms.len() > 3 {
        out.push(format!(
            "try fewer terms, e.g. \"{}\"",
            terms[..3].join(" ")
        ));
    }
    if terms.is_empty() {
        out.push("the query has no content words; add a specific term".to_string());
    } else {
        out.push("check spelling or use a broader synonym".to_string());
    }
    out.push("drop the source filter if one was set".to_string());
    out
}
