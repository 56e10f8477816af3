//! Post-fusion quality filters: similarity floor, score normalization,
//! maximal marginal relevance, and rerank blending.
//!
//! Each stage takes and returns an ordered `Vec<Candidate>` so the engine
//! can enable, skip, or reorder them per request.

use std::cmp::Ordering;

use crate::agreement::Candidate;

/// Drop semantic-only candidates whose similarity is below `floor`.
///
/// Candidates any lexical or entity strategy agreed on are kept regardless:
/// the floor guards against nearest-neighbour noise, not against weak
/// lexical matches. Returns the survivors and the number dropped.
pub fn apply_similarity_floor(candidates: Vec<Candidate>, floor: f64) -> (Vec<Candidate>, usize) {
    let before = candidates.len();
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| {
            !c.is_semantic_only() || c.semantic_similarity.unwrap_or(0.0) >= floor
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Set `score = fused / top fused`, so the best candidate scores 1.0.
pub fn normalize_to_top(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    let top = candidates
        .iter()
        .map(|c| c.fused)
        .fold(0.0_f64, f64::max);
    for c in candidates.iter_mut() {
        c.score = if top > 0.0 { c.fused / top } else { 0.0 };
    }
    candidates
}

/// Greedy maximal marginal relevance selection.
///
/// At each step picks the candidate maximizing
/// `λ · relevance − (1 − λ) · max_sim(selected)`, where relevance is the
/// normalized score. `similarity` must be symmetric and return values in
/// `[0, 1]`. Ties go to the earlier (higher fused) candidate. Candidates
/// not selected are dropped.
pub fn mmr_select<F>(candidates: Vec<Candidate>, k: usize, lambda: f64, similarity: F) -> Vec<Candidate>
where
    F: Fn(&Candidate, &Candidate) -> f64,
{
    let lambda = lambda.clamp(0.0, 1.0);
    if candidates.len() <= 1 || k == 0 {
        return candidates.into_iter().take(k).collect();
    }

    let mut remaining: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let mut selected: Vec<Candidate> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for (idx, slot) in remaining.iter().enumerate() {
            let Some(cand) = slot else { continue };
            let redundancy = selected
                .iter()
                .map(|s| similarity(cand, s))
                .fold(0.0_f64, f64::max);
            let value = lambda * cand.score - (1.0 - lambda) * redundancy;
            match best {
                Some((_, v)) if value <= v => {}
                _ => best = Some((idx, value)),
            }
        }
        match best.and_then(|(idx, _)| remaining[idx].take()) {
            Some(c) => selected.push(c),
            None => break,
        }
    }
    selected
}

/// Blend rerank similarities into the display score and reorder.
///
/// `similarities[i]` belongs to `candidates[i]`; `None` leaves that
/// candidate's score untouched. The blended score is
/// `weight · similarity + (1 − weight) · score`.
pub fn blend_rerank(
    mut candidates: Vec<Candidate>,
    similarities: &[Option<f64>],
    weight: f64,
) -> Vec<Candidate> {
    let weight = weight.clamp(0.0, 1.0);
    for (c, sim) in candidates.iter_mut().zip(similarities.iter()) {
        if let Some(sim) = sim {
            let sim = sim.clamp(0.0, 1.0);
            c.rerank_similarity = Some(sim);
            c.score = weight * sim + (1.0 - weight) * c.score;
        }
    }
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.fused.partial_cmp(&a.fused).unwrap_or(Ordering::Equal))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::score_agreement;
    use crate::classify::QueryType;
    use crate::fusion::{fuse, FusionParams};
    use crate::search::{RankedChunk, Strategy, StrategyResult};
    use crate::text::jaccard;

    fn candidates(strategy: Strategy, rows: &[(&str, f64, &str)]) -> Vec<Candidate> {
        let results = vec![StrategyResult {
            strategy,
            hits: rows
                .iter()
                .map(|(id, score, text)| RankedChunk {
                    chunk_id: id.to_string(),
                    document_id: "d".to_string(),
                    score: *score,
                    snippet: text.to_string(),
                    text: text.to_string(),
                })
                .collect(),
        }];
        let fused = fuse(
            score_agreement(&results, 1),
            &QueryType::Exploratory.weights(),
            &[],
            &FusionParams::default(),
        );
        normalize_to_top(fused)
    }

    #[test]
    fn test_floor_only_hits_semantic_only() {
        let sem = candidates(Strategy::Semantic, &[("a", 0.9, "x"), ("b", 0.1, "y")]);
        let (kept, dropped) = apply_similarity_floor(sem, 0.18);
        assert_eq!(dropped, 1);
        assert_eq!(kept[0].chunk_id, "a");

        let lex = candidates(Strategy::LexicalRelaxed, &[("a", 0.01, "x")]);
        let (kept, dropped) = apply_similarity_floor(lex, 0.18);
        assert_eq!(dropped, 0);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_normalize_top_is_one() {
        let c = candidates(Strategy::Semantic, &[("a", 0.9, "x"), ("b", 0.8, "y")]);
        assert!((c[0].score - 1.0).abs() < 1e-12);
        assert!(c[1].score < 1.0 && c[1].score > 0.0);
    }

    #[test]
    fn test_mmr_promotes_diverse_result() {
        let c = candidates(
            Strategy::Semantic,
            &[
                ("a", 0.9, "rust ownership borrowing rules"),
                ("b", 0.89, "rust ownership borrowing rules"),
                ("c", 0.88, "garbage collection pauses"),
            ],
        );
        let picked = mmr_select(c, 2, 0.5, |x, y| jaccard(&x.text, &y.text));
        let ids: Vec<_> = picked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_mmr_lambda_one_keeps_relevance_order() {
        let c = candidates(
            Strategy::Semantic,
            &[("a", 0.9, "same"), ("b", 0.8, "same"), ("c", 0.7, "other")],
        );
        let picked = mmr_select(c, 3, 1.0, |x, y| jaccard(&x.text, &y.text));
        let ids: Vec<_> = picked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_blend_rerank_reorders() {
        let c = candidates(Strategy::Semantic, &[("a", 0.9, "x"), ("b", 0.8, "y")]);
        let blended = blend_rerank(c, &[Some(0.0), Some(1.0)], 0.9);
        assert_eq!(blended[0].chunk_id, "b");
        assert_eq!(blended[0].rerank_similarity, Some(1.0));
    }

    #[test]
    fn test_blend_rerank_none_is_noop() {
        let c = candidates(Strategy::Semantic, &[("a", 0.9, "x"), ("b", 0.8, "y")]);
        let scores: Vec<f64> = c.iter().map(|c| c.score).collect();
        let blended = blend_rerank(c, &[None, None], 0.5);
        assert_eq!(blended.iter().map(|c| c.score).collect::<Vec<_>>(), scores);
    }
}
