//! # Strata
//!
//! **Adaptive hybrid retrieval and knowledge-graph search for local document
//! collections.**
//!
//! A query is classified, then lexical, semantic and entity strategies run
//! in parallel under per-strategy timeouts. Their ranked lists are fused
//! with reciprocal rank fusion, boosted by cross-strategy agreement, and
//! post-processed (similarity floor, MMR diversification, rerank). When a
//! pass comes back empty the engine relaxes and tries again before it gives
//! up. A backend that is slow or down costs a strategy, not the answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ Filesystem  │──▶│   Ingest     │──▶│ SQLite               │
//! │ connector   │   │ chunk+embed  │   │ FTS5 · vectors · KG  │
//! └─────────────┘   └──────┬───────┘   └──────────┬───────────┘
//!                          │ pending              │
//!                          ▼                      │
//!                   ┌──────────────┐              │
//!                   │  Extraction  │──────────────┤
//!                   │ worker pool  │  entities    │
//!                   └──────────────┘  relations   ▼
//!                               ┌─────────────────────────────┐
//!                               │ SearchEngine · KagSearcher  │
//!                               └──────┬───────────────┬──────┘
//!                                      ▼               ▼
//!                                ┌──────────┐   ┌─────────────┐
//!                                │   CLI    │   │ HTTP + MCP  │
//!                                │ (strata) │   │  (server)   │
//!                                └──────────┘   └─────────────┘
//! ```
//!
//! The algorithms (classifier, agreement, fusion, MMR, validation, KAG
//! ranking) live in `strata-core` and are runtime-agnostic. This crate
//! supplies the storage adapters, providers, concurrency and front ends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`sqlite_store`] | Metadata and knowledge stores over SQLite |
//! | [`lexical`] | FTS5 lexical index with phrase, relaxed, stemmed and substring modes |
//! | [`vector`] | Brute-force cosine vector index, chunk and entity collections |
//! | [`backends`] | The set of collaborators an engine runs against |
//! | [`embedding`] | Embedding providers: OpenAI, Ollama, local fastembed |
//! | [`executor`] | Parallel strategy execution under a deadline |
//! | [`engine`] | The search engine: plan, run, fuse, cascade, post-process |
//! | [`kag`] | Entity and relation search |
//! | [`extraction`] | Entity/relation extraction providers and worker pool |
//! | [`connector_fs`] | Filesystem connector |
//! | [`ingest`] | Ingestion: items → documents → chunks → vectors |
//! | [`embed_cmd`] | Embedding backfill commands |
//! | [`sources`] | Source listing and ordered removal |
//! | [`search_cmd`] | `search` and `kag` commands |
//! | [`traits`] | `Tool` trait and the tool registry |
//! | [`server`] | HTTP tool endpoints and MCP endpoint (Axum) |
//! | [`mcp`] | MCP protocol bridge (rmcp) |

pub mod backends;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod executor;
pub mod extraction;
pub mod http;
pub mod ingest;
pub mod kag;
pub mod lexical;
pub mod mcp;
pub mod migrate;
pub mod search_cmd;
pub mod server;
pub mod sources;
pub mod sqlite_store;
pub mod traits;
pub mod vector;

pub use backends::Backends;
pub use engine::SearchEngine;
pub use error::EngineError;
pub use kag::KagSearcher;
pub use strata_core::store;
pub use traits::{Tool, ToolContext, ToolError, ToolRegistry};
