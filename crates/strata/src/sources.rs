//! Listing and removing sources.
//!
//! Removal order matters. Vectors can only be filtered by source or
//! document while the relational rows that define those still exist, so
//! chunk vectors, entity vectors, and graph data go first, each confirmed
//! empty (with retries), and the relational rows go last in one
//! transaction. If the external deletions cannot be confirmed the
//! relational rows are left in place and the command can be re-run.

use anyhow::{anyhow, bail, Result};
use serde::Serialize;

use strata_core::models::RemovedRows;
use strata_core::store::{Collection, VectorFilter, VectorIndex};

use crate::backends::Backends;
use crate::config::Config;

const MAX_DELETE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub chunk_vectors: u64,
    pub entity_vectors: u64,
    pub graph_items: u64,
    pub rows: RemovedRows,
}

/// Remove every trace of `source`.
pub async fn remove_source(backends: &Backends, source: &str) -> Result<RemovalReport> {
    let document_ids = backends.metadata.source_document_ids(source).await?;

    let chunk_vectors = drain_vectors(
        backends.vectors.as_ref(),
        Collection::Chunks,
        &VectorFilter::source(source),
    )
    .await?;

    let entity_vectors = if document_ids.is_empty() {
        0
    } else {
        drain_vectors(
            backends.vectors.as_ref(),
            Collection::Entities,
            &VectorFilter::documents(document_ids.clone()),
        )
        .await?
    };

    let mut graph_items = 0;
    if let Some(graph) = &backends.graph {
        if !document_ids.is_empty() {
            let mut attempt = 0;
            graph_items = loop {
                attempt += 1;
                let result = tokio::time::timeout(backends.graph_timeout, graph.delete_documents(&document_ids))
                    .await
                    .unwrap_or_else(|_| {
                        Err(anyhow!("timed out after {}ms", backends.graph_timeout.as_millis()))
                    });
                match result {
                    Ok(n) => break n,
                    Err(e) if attempt < MAX_DELETE_ATTEMPTS => {
                        tracing::warn!(graph = graph.name(), attempt, error = %e, "graph delete failed; retrying");
                    }
                    Err(e) => bail!("graph delete for source '{}' failed: {:#}", source, e),
                }
            };
        }
    }

    let rows = backends.metadata.purge_source(source).await?;
    tracing::info!(
        source,
        chunk_vectors,
        entity_vectors,
        documents = rows.documents,
        chunks = rows.chunks,
        "source removed"
    );

    Ok(RemovalReport {
        chunk_vectors,
        entity_vectors,
        graph_items,
        rows,
    })
}

/// Delete by filter until `count` reports nothing left.
async fn drain_vectors(vectors: &dyn VectorIndex, collection: Collection, filter: &VectorFilter) -> Result<u64> {
    let mut deleted = 0;
    for attempt in 1..=MAX_DELETE_ATTEMPTS {
        match vectors.delete_by_filter(collection, filter).await {
            Ok(n) => deleted += n,
            Err(e) => tracing::warn!(?collection, attempt, error = %e, "vector delete failed"),
        }
        match vectors.count(collection, filter).await {
            Ok(0) => return Ok(deleted),
            Ok(left) => tracing::warn!(?collection, attempt, left, "vectors remain after delete"),
            Err(e) => tracing::warn!(?collection, attempt, error = %e, "vector count failed"),
        }
    }
    bail!(
        "could not confirm deletion of {:?} vectors after {} attempts; relational rows kept",
        collection,
        MAX_DELETE_ATTEMPTS
    )
}

/// `strata remove <source>`.
pub async fn run_remove(config: &Config, source: &str) -> Result<()> {
    let backends = Backends::open(config).await?;
    let report = remove_source(&backends, source).await?;

    println!("remove {}", source);
    println!("  chunk vectors deleted: {}", report.chunk_vectors);
    println!("  entity vectors deleted: {}", report.entity_vectors);
    if backends.graph.is_some() {
        println!("  graph items deleted: {}", report.graph_items);
    }
    println!("  documents: {}", report.rows.documents);
    println!("  chunks: {}", report.rows.chunks);
    println!("  entities: {}", report.rows.entities);
    println!("  relations: {}", report.rows.relations);
    println!("ok");
    Ok(())
}

/// `strata sources`: configured connectors and indexed sources.
pub async fn run_sources(config: &Config) -> Result<()> {
    let fs_status = match &config.connectors.filesystem {
        Some(fs) if fs.root.exists() => "OK",
        Some(_) => "ROOT MISSING",
        None => "NOT CONFIGURED",
    };
    println!("{:<16} STATUS", "CONNECTOR");
    println!("{:<16} {}", "filesystem", fs_status);

    let backends = Backends::open(config).await?;
    let indexed = backends.metadata.sources().await?;
    println!();
    println!("{:<16} DOCUMENTS", "SOURCE");
    if indexed.is_empty() {
        println!("(none indexed)");
    }
    for (source, docs) in indexed {
        println!("{:<16} {}", source, docs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::store::VectorPayload;

    #[tokio::test]
    async fn test_drain_vectors_counts_deleted() {
        let backends = Backends::in_memory();
        let payload = VectorPayload {
            document_id: "d1".to_string(),
            source: "filesystem".to_string(),
        };
        for id in ["c1", "c2"] {
            backends
                .vectors
                .upsert(Collection::Chunks, id, &[1.0, 0.0], &payload)
                .await
                .unwrap();
        }
        let filter = VectorFilter::source("filesystem");
        let deleted = drain_vectors(backends.vectors.as_ref(), Collection::Chunks, &filter)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(backends.vectors.count(Collection::Chunks, &filter).await.unwrap(), 0);
    }
}
