//! The set of collaborators the engine, extraction pipeline, and KAG
//! searcher run against.
//!
//! Capabilities are explicit: no embedder means no semantic strategy and
//! no entity vectors; no graph store means relation traversal falls back
//! to iterative lookups in the relational store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use strata_core::embedding::EmbeddingProvider;
use strata_core::store::memory::{InMemoryGraph, InMemoryStore};
use strata_core::store::{GraphStore, KnowledgeStore, LexicalIndex, MetadataStore, VectorIndex};

use crate::config::{Config, TimeoutConfig};
use crate::db;
use crate::embedding::create_provider;
use crate::lexical::SqliteLexicalIndex;
use crate::migrate::run_migrations;
use crate::sqlite_store::SqliteStore;
use crate::vector::SqliteVectorIndex;

#[derive(Clone)]
pub struct Backends {
    pub lexical: Arc<dyn LexicalIndex>,
    pub vectors: Arc<dyn VectorIndex>,
    pub metadata: Arc<dyn MetadataStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub graph: Option<Arc<dyn GraphStore>>,
    /// Bound on every call into `graph`.
    pub graph_timeout: Duration,
}

impl Backends {
    /// Open the configured SQLite database (migrating it if needed), the
    /// embedding provider, and the graph backend.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let mut backends = Backends {
            lexical: Arc::new(SqliteLexicalIndex::new(pool.clone())),
            vectors: Arc::new(SqliteVectorIndex::new(pool)),
            metadata: store.clone(),
            knowledge: store,
            embedder: create_provider(&config.embedding)?,
            graph: None,
            graph_timeout: config.timeouts.graph(),
        };

        if config.graph.backend == "memory" {
            backends.graph = Some(hydrated_graph(backends.knowledge.as_ref()).await?);
        }
        Ok(backends)
    }

    /// Everything in memory; no embedder, no graph.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Backends {
            lexical: store.clone(),
            vectors: store.clone(),
            metadata: store.clone(),
            knowledge: store,
            embedder: None,
            graph: None,
            graph_timeout: TimeoutConfig::default().graph(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_graph_timeout(mut self, timeout: Duration) -> Self {
        self.graph_timeout = timeout;
        self
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalIndex>) -> Self {
        self.lexical = lexical;
        self
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = vectors;
        self
    }
}

/// Build an in-memory graph from every stored relation.
async fn hydrated_graph(knowledge: &dyn KnowledgeStore) -> Result<Arc<dyn GraphStore>> {
    let graph = InMemoryGraph::new();
    let relations = knowledge.all_relations().await?;
    for relation in &relations {
        graph.upsert_edge(relation).await?;
    }
    tracing::info!(edges = graph.edge_count(), "hydrated in-memory graph");
    Ok(Arc::new(graph))
}
