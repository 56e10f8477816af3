//! Knowledge-graph query model, lexical entity scoring, and context rendering.
//!
//! The application's KAG searcher fetches candidate entities, scores them
//! here, fuses the lexical ranking with a semantic one, expands relations
//! through the graph, and renders the result with [`render_context`].

use std::cmp::Ordering;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::models::{Entity, EntityType, Predicate, Relation};
use crate::text::{normalize_name, tokenize};

pub const MAX_HOPS_CAP: usize = 3;
pub const LIMIT_CAP: usize = 100;
pub const RENDER_ENTITIES: usize = 10;
pub const RENDER_RELATIONS: usize = 15;

/// A knowledge-graph query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KagRequest {
    pub query: String,
    /// Entity names the caller already knows are relevant.
    #[serde(default)]
    pub entity_hints: Vec<String>,
    pub max_hops: Option<usize>,
    pub limit: Option<usize>,
    pub source: Option<String>,
}

impl KagRequest {
    pub fn new(query: impl Into<String>) -> Self {
        KagRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Hops, defaulted and capped.
    pub fn hops(&self, default: usize) -> usize {
        self.max_hops.unwrap_or(default).min(MAX_HOPS_CAP)
    }

    /// Entity limit, defaulted and clamped to `1..=LIMIT_CAP`.
    pub fn entity_limit(&self, default: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, LIMIT_CAP)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    pub confidence: f64,
    pub score: f64,
    pub source_document_id: String,
}

impl EntityView {
    pub fn from_entity(entity: &Entity, score: f64) -> Self {
        EntityView {
            id: entity.id.clone(),
            name: entity.name.clone(),
            entity_type: entity.entity_type,
            description: entity.description.clone(),
            confidence: entity.confidence,
            score,
            source_document_id: entity.source_document_id.clone(),
        }
    }
}

/// A relation with endpoint names resolved.
#[derive(Debug, Clone, Serialize)]
pub struct RelationView {
    pub id: String,
    pub subject_id: String,
    pub subject: String,
    pub predicate: Predicate,
    pub object_id: String,
    pub object: String,
    pub confidence: f64,
}

impl RelationView {
    /// Resolve endpoint names with `name_of`; unknown IDs render as the ID.
    pub fn resolve<F>(relation: &Relation, name_of: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        RelationView {
            id: relation.id.clone(),
            subject: name_of(&relation.subject_id).unwrap_or_else(|| relation.subject_id.clone()),
            subject_id: relation.subject_id.clone(),
            predicate: relation.predicate,
            object: name_of(&relation.object_id).unwrap_or_else(|| relation.object_id.clone()),
            object_id: relation.object_id.clone(),
            confidence: relation.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KagResponse {
    pub query: String,
    pub hops: usize,
    pub entities: Vec<EntityView>,
    pub relations: Vec<RelationView>,
    /// Plain-text rendering for prompt assembly.
    pub context: String,
    pub notes: Vec<String>,
    pub elapsed_ms: u64,
}

/// Lexical relevance of an entity to the query terms and hints.
///
/// Whole-name match scores highest, then exact name tokens, then token
/// prefixes, then substrings of the name, then description mentions.
/// Hints that name the entity add a further boost. Zero means no match.
pub fn score_entity(entity: &Entity, query: &str, terms: &[String], hints: &[String]) -> f64 {
    let name = normalize_name(&entity.name);
    let name_tokens = tokenize(&name);
    let description = entity.description.to_lowercase();
    let mut score = 0.0;

    let query_norm = normalize_name(query);
    if !query_norm.is_empty() && (name == query_norm || (name.len() > 2 && query_norm.contains(&name)))
    {
        score += 3.0;
    }

    for term in terms {
        if name_tokens.iter().any(|t| t == term) {
            score += 1.0;
        } else if name_tokens.iter().any(|t| t.starts_with(term.as_str())) {
            score += 0.6;
        } else if name.contains(term.as_str()) {
            score += 0.3;
        } else if description.contains(term.as_str()) {
            score += 0.15;
        }
    }

    for hint in hints {
        let hint = normalize_name(hint);
        if hint.is_empty() {
            continue;
        }
        if hint == name {
            score += 3.0;
        } else if name.contains(&hint) || hint.contains(&name) {
            score += 1.0;
        }
    }

    if score > 0.0 {
        score += 0.1 * entity.confidence;
    }
    score
}

/// Coarse per-term match rank used by stores to order candidates before
/// truncation: exact name 4, name prefix 3, name substring 2, description 1,
/// summed over `terms` (already lowercase).
pub fn entity_match_rank(entity: &Entity, terms: &[String]) -> u32 {
    let name = entity.name.to_lowercase();
    let description = entity.description.to_lowercase();
    terms
        .iter()
        .map(|t| {
            if name == *t {
                4
            } else if name.starts_with(t.as_str()) {
                3
            } else if name.contains(t.as_str()) {
                2
            } else if description.contains(t.as_str()) {
                1
            } else {
                0
            }
        })
        .sum()
}

/// Score and sort entities, dropping non-matches.
pub fn rank_entities_lexical(
    entities: Vec<Entity>,
    query: &str,
    terms: &[String],
    hints: &[String],
) -> Vec<(Entity, f64)> {
    let mut scored: Vec<(Entity, f64)> = entities
        .into_iter()
        .map(|e| {
            let s = score_entity(&e, query, terms, hints);
            (e, s)
        })
        .filter(|(_, s)| *s > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored.dedup_by(|a, b| a.0.id == b.0.id);
    scored
}

/// Render entities and relations as indented text, truncating long lists
/// with an "…and N more" line.
pub fn render_context(
    entities: &[EntityView],
    relations: &[RelationView],
    max_entities: usize,
    max_relations: usize,
) -> String {
    let mut out = String::new();
    if entities.is_empty() {
        out.push_str("No matching entities.\n");
        return out;
    }

    out.push_str("Entities:\n");
    for e in entities.iter().take(max_entities) {
        let _ = write!(out, "- {} ({})", e.name, e.entity_type);
        if !e.description.is_empty() {
            let _ = write!(out, ": {}", e.description);
        }
        out.push('\n');
    }
    if entities.len() > max_entities {
        let _ = writeln!(out, "  ...and {} more entities", entities.len() - max_entities);
    }

    if !relations.is_empty() {
        out.push_str("Relations:\n");
        for r in relations.iter().take(max_relations) {
            let _ = writeln!(out, "- {} {} {}", r.subject, r.predicate, r.object);
        }
        if relations.len() > max_relations {
            let _ = writeln!(out, "  ...and {} more relations", relations.len() - max_relations);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::content_terms;

    fn entity(name: &str, description: &str) -> Entity {
        Entity {
            id: format!("ent_{}", name.to_lowercase().replace(' ', "_")),
            name: name.to_string(),
            entity_type: EntityType::Technology,
            description: description.to_string(),
            confidence: 0.8,
            source_document_id: "d1".to_string(),
            source_chunk_id: "c1".to_string(),
        }
    }

    #[test]
    fn test_score_ordering_exact_prefix_substring_description() {
        let q = "tokio";
        let terms = content_terms(q);
        let exact = score_entity(&entity("Tokio", ""), q, &terms, &[]);
        let prefix = score_entity(&entity("Tokio Console", ""), q, &terms, &[]);
        let substring = score_entity(&entity("Pretokio", ""), q, &terms, &[]);
        let described = score_entity(&entity("Runtime", "built on tokio"), q, &terms, &[]);
        let none = score_entity(&entity("Hyper", "http"), q, &terms, &[]);
        assert!(exact > prefix, "{} vs {}", exact, prefix);
        assert!(prefix > substring);
        assert!(substring > described);
        assert!(described > 0.0);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_hints_boost() {
        let q = "runtime";
        let terms = content_terms(q);
        let plain = score_entity(&entity("Tokio Runtime", ""), q, &terms, &[]);
        let hinted = score_entity(&entity("Tokio Runtime", ""), q, &terms, &["tokio runtime".into()]);
        assert!(hinted > plain);
    }

    #[test]
    fn test_rank_drops_non_matches() {
        let q = "axum routing";
        let ranked = rank_entities_lexical(
            vec![entity("Axum", "web framework"), entity("Serde", "serialization")],
            q,
            &content_terms(q),
            &[],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.name, "Axum");
    }

    #[test]
    fn test_match_rank_tiers() {
        let terms = vec!["rust".to_string()];
        assert_eq!(entity_match_rank(&entity("Rust", ""), &terms), 4);
        assert_eq!(entity_match_rank(&entity("Rustls", ""), &terms), 3);
        assert_eq!(entity_match_rank(&entity("Trust Store", ""), &terms), 2);
        assert_eq!(entity_match_rank(&entity("Crate0", "written in rust"), &terms), 1);
        assert_eq!(entity_match_rank(&entity("Go", "garbage collected"), &terms), 0);
    }

    #[test]
    fn test_render_truncates() {
        let entities: Vec<EntityView> = (0..12)
            .map(|i| EntityView::from_entity(&entity(&format!("E{}", i), ""), 1.0))
            .collect();
        let relations: Vec<RelationView> = (0..16)
            .map(|i| RelationView {
                id: format!("r{}", i),
                subject_id: "a".into(),
                subject: "A".into(),
                predicate: Predicate::Uses,
                object_id: "b".into(),
                object: "B".into(),
                confidence: 0.9,
            })
            .collect();
        let text = render_context(&entities, &relations, RENDER_ENTITIES, RENDER_RELATIONS);
        assert!(text.contains("...and 2 more entities"));
        assert!(text.contains("...and 1 more relations"));
        assert!(text.contains("- A uses B"));
        assert_eq!(text.matches("(technology)").count(), 10);
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_context(&[], &[], 10, 15), "No matching entities.\n");
    }

    #[test]
    fn test_request_caps() {
        let req = KagRequest {
            max_hops: Some(9),
            limit: Some(1000),
            ..KagRequest::new("q")
        };
        assert_eq!(req.hops(2), MAX_HOPS_CAP);
        assert_eq!(req.entity_limit(25), LIMIT_CAP);
        assert_eq!(KagRequest::new("q").hops(2), 2);
    }
}
