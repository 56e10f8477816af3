//! Cross-strategy agreement scoring.
//!
//! Merges the ranked lists of every completed strategy into one candidate
//! per chunk, recording which strategies found it and at what rank.
//! Agreement is `found_by / executed`; the confidence label follows from
//! how many strategies concur.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::search::{Strategy, StrategyResult};

/// Confidence label attached to hits and whole responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
            Confidence::VeryHigh => "very_high",
        }
    }

    /// One level lower, saturating at `low`.
    pub fn downgrade(self) -> Confidence {
        match self {
            Confidence::VeryHigh => Confidence::High,
            Confidence::High => Confidence::Medium,
            Confidence::Medium | Confidence::Low => Confidence::Low,
        }
    }

    /// Label for a candidate found by `found_by` strategies.
    pub fn from_agreement(found_by: usize, agreement: f64) -> Confidence {
        match found_by {
            n if n >= 3 => Confidence::VeryHigh,
            2 => Confidence::High,
            1 if agreement >= 0.5 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk surfaced by at least one strategy, carried through fusion and
/// post-processing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub document_id: String,
    pub snippet: String,
    pub text: String,
    /// 1-based rank per strategy that found the chunk.
    pub ranks: BTreeMap<Strategy, usize>,
    /// Cosine similarity reported by the semantic strategy, if it found the chunk.
    pub semantic_similarity: Option<f64>,
    pub agreement: f64,
    pub confidence: Confidence,
    /// Raw fused score; set by [`crate::fusion::fuse`].
    pub fused: f64,
    pub proper_noun_boost: bool,
    /// Display score in `[0, 1]`; set by normalization and reranking.
    pub score: f64,
    pub rerank_similarity: Option<f64>,
}

impl Candidate {
    pub fn strategies(&self) -> Vec<Strategy> {
        self.ranks.keys().copied().collect()
    }

    /// Lowest rank achieved across strategies.
    pub fn best_rank(&self) -> usize {
        self.ranks.values().copied().min().unwrap_or(usize::MAX)
    }

    pub fn found_by(&self) -> usize {
        self.ranks.len()
    }

    /// True when the semantic strategy is the only one that found the chunk.
    pub fn is_semantic_only(&self) -> bool {
        self.ranks.len() == 1 && self.ranks.contains_key(&Strategy::Semantic)
    }
}

/// Merge strategy results into candidates, ordered by chunk ID.
///
/// A chunk listed twice by one strategy keeps its first (best) rank. The
/// snippet comes from the first strategy, in [`Strategy`] order, that found
/// the chunk, so lexical highlights win over plain semantic excerpts.
pub fn score_agreement(results: &[StrategyResult], executed: usize) -> Vec<Candidate> {
    let mut ordered: Vec<&StrategyResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.strategy);

    let mut by_chunk: BTreeMap<String, Candidate> = BTreeMap::new();
    for result in ordered {
        for (idx, hit) in result.hits.iter().enumerate() {
            let rank = idx + 1;
            let entry = by_chunk
                .entry(hit.chunk_id.clone())
                .or_insert_with(|| Candidate {
                    chunk_id: hit.chunk_id.clone(),
                    document_id: hit.document_id.clone(),
                    snippet: hit.snippet.clone(),
                    text: hit.text.clone(),
                    ranks: BTreeMap::new(),
                    semantic_similarity: None,
                    agreement: 0.0,
                    confidence: Confidence::Low,
                    fused: 0.0,
                    proper_noun_boost: false,
                    score: 0.0,
                    rerank_similarity: None,
                });
            let slot = entry.ranks.entry(result.strategy).or_insert(rank);
            if rank < *slot {
                *slot = rank;
            }
            if result.strategy == Strategy::Semantic && entry.semantic_similarity.is_none() {
                entry.semantic_similarity = Some(hit.score);
            }
            if entry.text.is_empty() && !hit.text.is_empty() {
                entry.text = hit.text.clone();
            }
        }
    }

    let denominator = executed.max(1) as f64;
    by_chunk
        .into_values()
        .map(|mut c| {
            c.agreement = (c.found_by() as f64 / denominator).min(1.0);
            c.confidence = Confidence::from_agreement(c.found_by(), c.agreement);
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::RankedChunk;

    fn result(strategy: Strategy, ids: &[&str]) -> StrategyResult {
        StrategyResult {
            strategy,
            hits: ids
                .iter()
                .map(|id| RankedChunk {
                    chunk_id: id.to_string(),
                    document_id: "d".to_string(),
                    score: 0.5,
                    snippet: format!("{} via {}", id, strategy),
                    text: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_agreement_and_labels() {
        let results = vec![
            result(Strategy::LexicalExact, &["a", "b"]),
            result(Strategy::LexicalRelaxed, &["a", "c"]),
            result(Strategy::Semantic, &["a", "b", "d"]),
        ];
        let cands = score_agreement(&results, 4);
        let get = |id: &str| cands.iter().find(|c| c.chunk_id == id).unwrap();

        assert_eq!(get("a").found_by(), 3);
        assert!((get("a").agreement - 0.75).abs() < 1e-9);
        assert_eq!(get("a").confidence, Confidence::VeryHigh);
        assert_eq!(get("b").confidence, Confidence::High);
        assert_eq!(get("b").best_rank(), 2);
        assert_eq!(get("c").confidence, Confidence::Low);
    }

    #[test]
    fn test_single_strategy_medium_when_half_agree() {
        let results = vec![result(Strategy::LexicalRelaxed, &["a"])];
        let cands = score_agreement(&results, 2);
        assert_eq!(cands[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_deterministic_order_and_snippet_preference() {
        let results = vec![
            result(Strategy::Semantic, &["z", "a"]),
            result(Strategy::LexicalExact, &["a"]),
        ];
        let cands = score_agreement(&results, 2);
        let ids: Vec<_> = cands.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
        assert_eq!(cands[0].snippet, "a via lexical_exact");
        assert_eq!(cands[0].semantic_similarity, Some(0.5));
    }

    #[test]
    fn test_duplicate_within_strategy_keeps_best_rank() {
        let results = vec![result(Strategy::LexicalRelaxed, &["a", "b", "a"])];
        let cands = score_agreement(&results, 1);
        assert_eq!(cands[0].ranks[&Strategy::LexicalRelaxed], 1);
    }

    #[test]
    fn test_downgrade_saturates() {
        assert_eq!(Confidence::VeryHigh.downgrade(), Confidence::High);
        assert_eq!(Confidence::Low.downgrade(), Confidence::Low);
    }
}
