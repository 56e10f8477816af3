use anyhow::{bail, Result};

use strata_core::embedding::EmbeddingProvider;
use strata_core::models::ChunkContext;
use strata_core::store::{Collection, VectorIndex, VectorPayload};

use crate::backends::Backends;
use crate::config::Config;
use crate::extraction::pipeline::entity_embedding_text;

/// Embed chunks and store their vectors. Returns how many were stored.
pub async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    vectors: &dyn VectorIndex,
    chunks: &[ChunkContext],
) -> Result<usize> {
    if chunks.is_empty() {
        return Ok(0);
    }
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embedded = embedder.embed(&texts).await?;
    if embedded.len() != chunks.len() {
        bail!(
            "embedding provider returned {} vectors for {} chunks",
            embedded.len(),
            chunks.len()
        );
    }
    for (chunk, vector) in chunks.iter().zip(embedded.iter()) {
        let payload = VectorPayload {
            document_id: chunk.document_id.clone(),
            source: chunk.source.clone(),
        };
        vectors
            .upsert(Collection::Chunks, &chunk.chunk_id, vector, &payload)
            .await?;
    }
    Ok(chunks.len())
}

/// Embed chunks that have no vector. Edited documents lose their vectors
/// on re-sync, so this also covers stale content.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
) -> Result<()> {
    let backends = Backends::open(config).await?;
    let Some(embedder) = backends.embedder.clone() else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let batch_size = batch_size_override
        .unwrap_or(config.embedding.batch_size)
        .max(1);
    let limit = limit.unwrap_or(usize::MAX);

    let mut embedded = 0usize;
    while embedded < limit {
        let want = batch_size.min(limit - embedded);
        let batch = backends.metadata.chunks_missing_vectors(want).await?;
        if batch.is_empty() {
            break;
        }
        embedded += embed_chunks(embedder.as_ref(), backends.vectors.as_ref(), &batch).await?;
        tracing::debug!(embedded, "embedded chunk batch");
    }

    println!("embed pending");
    println!("  model: {}", embedder.model_name());
    println!("  embedded: {}", embedded);
    Ok(())
}

/// Embed entities that have no vector in the entity collection.
pub async fn run_embed_entities(config: &Config, limit: Option<usize>) -> Result<()> {
    let backends = Backends::open(config).await?;
    let Some(embedder) = backends.embedder.clone() else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let batch_size = config.embedding.batch_size.max(1);
    let limit = limit.unwrap_or(usize::MAX);

    let mut embedded = 0usize;
    while embedded < limit {
        let want = batch_size.min(limit - embedded);
        let batch = backends.knowledge.entities_missing_vectors(want).await?;
        if batch.is_empty() {
            break;
        }

        let chunk_ids: Vec<String> = batch.iter().map(|e| e.source_chunk_id.clone()).collect();
        let contexts = backends.metadata.chunk_contexts(&chunk_ids).await?;
        let texts: Vec<String> = batch.iter().map(entity_embedding_text).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} entities",
                vectors.len(),
                batch.len()
            );
        }

        for (entity, vector) in batch.iter().zip(vectors.iter()) {
            let source = contexts
                .get(&entity.source_chunk_id)
                .map(|c| c.source.clone())
                .unwrap_or_default();
            let payload = VectorPayload {
                document_id: entity.source_document_id.clone(),
                source,
            };
            backends
                .vectors
                .upsert(Collection::Entities, &entity.id, vector, &payload)
                .await?;
            embedded += 1;
        }
    }

    println!("embed entities");
    println!("  model: {}", embedder.model_name());
    println!("  embedded: {}", embedded);
    Ok(())
}
