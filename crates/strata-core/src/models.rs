//! Core data models shared by ingestion, retrieval, and extraction.
//!
//! Documents and chunks are what connectors produce and the lexical and
//! vector indexes search over. Entities and relations are what the
//! extraction pipeline derives from chunks; they carry deterministic IDs
//! (see [`crate::ids`]) so that re-extracting the same content merges into
//! the existing rows instead of duplicating them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw item produced by a connector, before normalization and chunking.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Connector name, e.g. `"filesystem"`.
    pub source: String,
    /// Identifier unique within the source (relative path for files).
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// A normalized document stored in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    /// Cleaned body text; the content hash is computed over this, not the raw body.
    pub body: String,
    pub content_hash: String,
    pub updated_at: i64,
}

/// A contiguous slice of a document's cleaned body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk joined with the document fields retrieval results display.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkContext {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    /// The document's `source_id`, usually a relative path.
    pub path: String,
    pub title: Option<String>,
    pub text: String,
}

// ============ Knowledge graph ============

/// Closed set of entity categories.
///
/// Provider output is mapped onto this set by [`EntityType::normalize`];
/// anything unrecognized becomes [`EntityType::Concept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Concept,
    Person,
    Organization,
    Technology,
    Location,
    Section,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Concept,
        EntityType::Person,
        EntityType::Organization,
        EntityType::Technology,
        EntityType::Location,
        EntityType::Section,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Concept => "concept",
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Technology => "technology",
            EntityType::Location => "location",
            EntityType::Section => "section",
        }
    }

    /// Map a free-form type label onto the closed set.
    pub fn normalize(label: &str) -> EntityType {
        let label = normalize_label(label);
        match label.as_str() {
            "person" | "people" | "author" | "individual" | "researcher" | "user" => {
                EntityType::Person
            }
            "organization" | "organisation" | "company" | "org" | "team" | "institution"
            | "agency" | "group" | "lab" | "laboratory" => EntityType::Organization,
            "technology" | "tool" | "software" | "framework" | "library" | "language"
            | "programming_language" | "product" | "system" | "protocol" | "service"
            | "database" | "api" => EntityType::Technology,
            "location" | "place" | "city" | "country" | "region" | "site" | "geo" => {
                EntityType::Location
            }
            "section" | "heading" | "chapter" | "document" | "page" => EntityType::Section,
            _ => EntityType::Concept,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityType::normalize(s))
    }
}

/// Closed set of relation predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Mentions,
    Defines,
    RelatesTo,
    Contains,
    PartOf,
    Uses,
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::Mentions => "mentions",
            Predicate::Defines => "defines",
            Predicate::RelatesTo => "relates_to",
            Predicate::Contains => "contains",
            Predicate::PartOf => "part_of",
            Predicate::Uses => "uses",
        }
    }

    /// Map a free-form predicate onto the closed set, defaulting to `relates_to`.
    pub fn normalize(label: &str) -> Predicate {
        let label = normalize_label(label);
        match label.as_str() {
            "mentions" | "mention" | "references" | "cites" | "refers_to" => Predicate::Mentions,
            "defines" | "define" | "describes" | "explains" | "specifies" => Predicate::Defines,
            "contains" | "includes" | "has" | "has_part" | "comprises" => Predicate::Contains,
            "part_of" | "partof" | "belongs_to" | "member_of" | "located_in" | "in" => {
                Predicate::PartOf
            }
            "uses" | "use" | "depends_on" | "requires" | "built_with" | "implements"
            | "runs_on" => Predicate::Uses,
            _ => Predicate::RelatesTo,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Predicate {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Predicate::normalize(s))
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// A named thing extracted from a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Deterministic: see [`crate::ids::entity_id`].
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    pub confidence: f64,
    pub source_document_id: String,
    pub source_chunk_id: String,
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Deterministic: see [`crate::ids::relation_id`].
    pub id: String,
    pub subject_id: String,
    pub predicate: Predicate,
    pub object_id: String,
    pub confidence: f64,
    pub source_document_id: String,
    pub source_chunk_id: String,
}

/// What a merge-upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    Inserted,
    /// Confidence was raised to the new maximum.
    Reinforced,
    /// The stored description was empty and has been filled.
    DescriptionFilled,
    Unchanged,
}

// ============ Extraction status ============

/// Per-chunk extraction state.
///
/// ```text
/// pending ──claim──▶ extracting ──▶ completed
///    ▲                   │
///    │                   └──────▶ failed ──retry──▶ pending
///    └──── release / stale reset ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    Pending,
    Extracting,
    Completed,
    Failed,
}

impl ExtractionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionState::Pending => "pending",
            ExtractionState::Extracting => "extracting",
            ExtractionState::Completed => "completed",
            ExtractionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExtractionState::Pending),
            "extracting" => Ok(ExtractionState::Extracting),
            "completed" => Ok(ExtractionState::Completed),
            "failed" => Ok(ExtractionState::Failed),
            other => anyhow::bail!("unknown extraction state '{}'", other),
        }
    }
}

/// The stored status row for one chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionStatus {
    pub chunk_id: String,
    pub state: ExtractionState,
    pub entity_count: i64,
    pub relation_count: i64,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

/// Result of trying to move a chunk from `pending` to `extracting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The chunk is not pending; carries its current state.
    NotPending(ExtractionState),
    /// No status row exists for the chunk.
    Missing,
}

/// Counts of chunks in each extraction state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionBacklog {
    pub pending: u64,
    pub extracting: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ExtractionBacklog {
    pub fn total(&self) -> u64 {
        self.pending + self.extracting + self.completed + self.failed
    }
}

/// Row counts removed by a relational source purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovedRows {
    pub documents: u64,
    pub chunks: u64,
    pub entities: u64,
    pub relations: u64,
}
