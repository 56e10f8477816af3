//! Deterministic identifiers for extracted entities and relations.
//!
//! Re-extracting the same chunk yields the same IDs, which is what turns a
//! repeated extraction into a merge instead of a duplicate.

use sha2::{Digest, Sha256};

use crate::models::{EntityType, Predicate};
use crate::text::normalize_name;

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(part.as_bytes());
    }
    let hex = format!("{:x}", hasher.finalize());
    hex[..32].to_string()
}

/// ID of an entity: hash of normalized name, type, and source document.
pub fn entity_id(name: &str, entity_type: EntityType, document_id: &str) -> String {
    format!(
        "ent_{}",
        digest(&[&normalize_name(name), entity_type.as_str(), document_id])
    )
}

/// ID of a relation: hash of subject ID, predicate, and object ID.
pub fn relation_id(subject_id: &str, predicate: Predicate, object_id: &str) -> String {
    format!("rel_{}", digest(&[subject_id, predicate.as_str(), object_id]))
}
