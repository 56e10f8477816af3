//! Weighted reciprocal rank fusion.
//!
//! ```text
//! fused = Σ_s weight(s) / (k + rank_s)
//!       × (1 + agreement_bonus_max × agreement)
//!       × (1 + proper_noun_boost)        if the text contains a detected proper noun
//! ```
//!
//! Strategy weights come from the query's [`WeightProfile`]: the exact
//! lexical strategy takes the lexical weight, the relaxed one a fraction
//! of it, semantic the semantic weight, and the entity strategy a fraction
//! of the lexical weight. Raw backend scores never enter the sum, so BM25
//! and cosine scales cannot distort each other.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::agreement::Candidate;
use crate::classify::WeightProfile;
use crate::search::Strategy;

/// Fusion constants.
#[derive(Debug, Clone)]
pub struct FusionParams {
    /// RRF smoothing constant.
    pub rrf_k: f64,
    /// Bonus at full agreement (0.2 = +20%).
    pub agreement_bonus_max: f64,
    /// Multiplicative boost for an exact proper-noun match (0.5 = +50%).
    pub proper_noun_boost: f64,
    pub relaxed_weight_factor: f64,
    pub entity_weight_factor: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        FusionParams {
            rrf_k: 60.0,
            agreement_bonus_max: 0.2,
            proper_noun_boost: 0.5,
            relaxed_weight_factor: 0.75,
            entity_weight_factor: 0.5,
        }
    }
}

/// The fusion weight of one strategy under a weight profile.
pub fn strategy_weight(strategy: Strategy, weights: &WeightProfile, params: &FusionParams) -> f64 {
    match strategy {
        Strategy::LexicalExact => weights.lexical,
        Strategy::LexicalRelaxed => weights.lexical * params.relaxed_weight_factor,
        Strategy::Semantic => weights.semantic,
        Strategy::Entity => weights.lexical * params.entity_weight_factor,
    }
}

/// Compute fused scores and sort descending.
///
/// Ties break on best rank, then chunk ID, so the order is a pure function
/// of the inputs.
pub fn fuse(
    candidates: Vec<Candidate>,
    weights: &WeightProfile,
    proper_nouns: &[String],
    params: &FusionParams,
) -> Vec<Candidate> {
    let nouns: Vec<String> = proper_nouns.iter().map(|n| n.to_lowercase()).collect();

    let mut fused: Vec<Candidate> = candidates
        .into_iter()
        .map(|mut c| {
            let base: f64 = c
                .ranks
                .iter()
                .map(|(strategy, rank)| {
                    strategy_weight(*strategy, weights, params) / (params.rrf_k + *rank as f64)
                })
                .sum();
            let mut score = base * (1.0 + params.agreement_bonus_max * c.agreement);
            if !nouns.is_empty() {
                let haystack = (if c.text.is_empty() { &c.snippet } else { &c.text }).to_lowercase();
                if nouns.iter().any(|n| haystack.contains(n.as_str())) {
                    score *= 1.0 + params.proper_noun_boost;
                    c.proper_noun_boost = true;
                }
            }
            c.fused = score;
            c
        })
        .collect();

    sort_by_fused_desc(&mut fused);
    fused
}

/// Sort candidates by fused score, best rank, then chunk ID.
pub fn sort_by_fused_desc(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.best_rank().cmp(&b.best_rank()))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Plain weighted RRF over ranked ID lists; used for entity retrieval.
///
/// Each list is `(weight, ids in rank order)`. Returns `(id, score)` sorted
/// by score descending, then ID.
pub fn reciprocal_rank_fusion(lists: &[(f64, Vec<String>)], k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (weight, ids) in lists {
        for (idx, id) in ids.iter().enumerate() {
            *scores.entry(id.as_str()).or_insert(0.0) += weight / (k + (idx + 1) as f64);
        }
    }
    let mut out: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, s)| (id.to_string(), s))
        .collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}
