//! # Strata Core
//!
//! Runtime-free logic for Strata: the data model, query classification,
//! agreement scoring, rank fusion, result post-processing, extraction
//! sanitizing and validation, knowledge-graph helpers, and the storage
//! traits the application crate implements over SQLite.
//!
//! Nothing in this crate touches tokio, sqlx, the filesystem, or the
//! network. Every function here is deterministic for a given input, which
//! keeps the ranking pipeline testable without fixtures.
//!
//! ```text
//! query ─▶ classify ─▶ (app: parallel strategies) ─▶ agreement ─▶ fusion
//!                                                           │
//!                     postprocess (floor, MMR, rerank) ◀────┘
//! ```

pub mod agreement;
pub mod chunk;
pub mod classify;
pub mod embedding;
pub mod extract;
pub mod fusion;
pub mod graph;
pub mod ids;
pub mod kag;
pub mod models;
pub mod postprocess;
pub mod sanitize;
pub mod search;
pub mod store;
pub mod text;
pub mod validate;
