//! Ingestion: connector items → cleaned documents → chunks → vectors and
//! extraction status.
//!
//! A document whose cleaned body hashes to the stored content hash is
//! skipped entirely. A changed document has its chunk vectors deleted
//! before its chunk rows are replaced, while the document-to-chunk mapping
//! that the vector filter relies on still exists.

use anyhow::{bail, Result};
use serde::Serialize;
use uuid::Uuid;

use strata_core::chunk::chunk_text;
use strata_core::models::{ChunkContext, Document, SourceItem};
use strata_core::store::{Collection, VectorFilter};
use strata_core::text::{clean_content, content_hash};

use crate::backends::Backends;
use crate::config::Config;
use crate::connector_fs;
use crate::embed_cmd;
use crate::extraction::{EnqueueError, ExtractionPipeline};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: u64,
    pub unchanged: u64,
    pub documents: u64,
    pub chunks: u64,
    pub embedded: u64,
    pub embed_pending: u64,
    /// Chunks newly marked `pending` for extraction.
    pub extraction_pending: u64,
    /// Of those, how many a running pipeline accepted right away.
    pub extraction_queued: u64,
    pub vectors_removed: u64,
}

/// How ingestion hands chunks to extraction.
pub enum ExtractionHandoff<'a> {
    None,
    /// Mark chunks `pending` for a later `extract run`.
    MarkPending,
    /// Mark them `pending` and offer them to a running pipeline.
    Enqueue(&'a ExtractionPipeline),
}

/// Store `items`, skipping unchanged documents.
pub async fn ingest_items(
    backends: &Backends,
    items: &[SourceItem],
    max_tokens: usize,
    handoff: ExtractionHandoff<'_>,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        fetched: items.len() as u64,
        ..Default::default()
    };
    let mut queue_full_logged = false;

    for item in items {
        let body = clean_content(&item.body);
        let hash = content_hash(&body);

        let existing = backends
            .metadata
            .find_document(&item.source, &item.source_id)
            .await?;
        let doc_id = match existing {
            Some(stored) if stored.content_hash == hash => {
                report.unchanged += 1;
                continue;
            }
            Some(stored) => {
                report.vectors_removed += backends
                    .vectors
                    .delete_by_filter(Collection::Chunks, &VectorFilter::documents(vec![stored.id.clone()]))
                    .await?;
                stored.id
            }
            None => Uuid::new_v4().to_string(),
        };

        let doc = Document {
            id: doc_id.clone(),
            source: item.source.clone(),
            source_id: item.source_id.clone(),
            source_url: item.source_url.clone(),
            title: item.title.clone(),
            content_type: item.content_type.clone(),
            body,
            content_hash: hash,
            updated_at: item.updated_at.timestamp(),
        };
        backends.metadata.upsert_document(&doc).await?;

        let chunks = chunk_text(&doc_id, &doc.body, max_tokens);
        backends.metadata.replace_chunks(&doc_id, &chunks).await?;
        report.documents += 1;
        report.chunks += chunks.len() as u64;

        if let Some(embedder) = &backends.embedder {
            let contexts: Vec<ChunkContext> = chunks
                .iter()
                .map(|c| ChunkContext {
                    chunk_id: c.id.clone(),
                    document_id: doc_id.clone(),
                    source: doc.source.clone(),
                    path: doc.source_id.clone(),
                    title: doc.title.clone(),
                    text: c.text.clone(),
                })
                .collect();
            match embed_cmd::embed_chunks(embedder.as_ref(), backends.vectors.as_ref(), &contexts).await {
                Ok(n) => report.embedded += n as u64,
                Err(e) => {
                    tracing::warn!(document = %doc.source_id, error = %e, "inline embedding failed; run `strata embed pending`");
                    report.embed_pending += contexts.len() as u64;
                }
            }
        }

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        match &handoff {
            ExtractionHandoff::None => {}
            ExtractionHandoff::MarkPending => {
                report.extraction_pending += backends.metadata.mark_pending(&chunk_ids).await?;
            }
            ExtractionHandoff::Enqueue(pipeline) => {
                report.extraction_pending += backends.metadata.mark_pending(&chunk_ids).await?;
                for chunk_id in chunk_ids {
                    match pipeline.enqueue(chunk_id) {
                        Ok(()) => report.extraction_queued += 1,
                        Err(EnqueueError::Full { capacity }) => {
                            if !queue_full_logged {
                                tracing::warn!(capacity, "extraction queue full; remaining chunks stay pending");
                                queue_full_logged = true;
                            }
                        }
                        Err(EnqueueError::Closed) => break,
                    }
                }
            }
        }
    }

    Ok(report)
}

/// `strata sync <connector>`.
pub async fn run_sync(config: &Config, connector: &str, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let mut items = match connector {
        "filesystem" => {
            let fs_config = config
                .connectors
                .filesystem
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Filesystem connector not configured"))?;
            connector_fs::scan_filesystem(fs_config)?
        }
        other => bail!("Unknown connector: '{}'. Available: filesystem", other),
    };
    if let Some(lim) = limit {
        items.truncate(lim);
    }

    if dry_run {
        let total_chunks: usize = items
            .iter()
            .map(|item| chunk_text("dry-run", &clean_content(&item.body), config.chunking.max_tokens).len())
            .sum();
        println!("sync {} (dry-run)", connector);
        println!("  items found: {}", items.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let backends = Backends::open(config).await?;
    let handoff = if config.extraction.is_enabled() && config.extraction.enqueue_on_sync {
        ExtractionHandoff::MarkPending
    } else {
        ExtractionHandoff::None
    };
    let report = ingest_items(&backends, &items, config.chunking.max_tokens, handoff).await?;

    println!("sync {}", connector);
    println!("  fetched: {} items", report.fetched);
    println!("  unchanged: {}", report.unchanged);
    println!("  upserted documents: {}", report.documents);
    println!("  chunks written: {}", report.chunks);
    if backends.embedder.is_some() {
        println!("  embeddings written: {}", report.embedded);
        println!("  embeddings pending: {}", report.embed_pending);
    }
    if report.extraction_pending > 0 {
        println!("  pending extraction: {}", report.extraction_pending);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(source_id: &str, body: &str) -> SourceItem {
        SourceItem {
            source: "filesystem".to_string(),
            source_id: source_id.to_string(),
            source_url: None,
            title: Some(source_id.to_string()),
            content_type: "text/markdown".to_string(),
            body: body.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unchanged_content_is_skipped() {
        let backends = Backends::in_memory();
        let items = vec![item("a.md", "Alpha paragraph.\n\nBeta paragraph.")];

        let first = ingest_items(&backends, &items, 200, ExtractionHandoff::MarkPending)
            .await
            .unwrap();
        assert_eq!(first.documents, 1);
        assert_eq!(first.extraction_pending, first.chunks);

        // Line-ending noise does not change the cleaned hash.
        let noisy = vec![item("a.md", "Alpha paragraph.\r\n\r\nBeta paragraph.   ")];
        let second = ingest_items(&backends, &noisy, 200, ExtractionHandoff::MarkPending)
            .await
            .unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.documents, 0);
    }

    #[tokio::test]
    async fn test_changed_content_replaces_chunks() {
        let backends = Backends::in_memory();
        ingest_items(&backends, &[item("a.md", "Old text.")], 200, ExtractionHandoff::None)
            .await
            .unwrap();
        let report = ingest_items(&backends, &[item("a.md", "New text.")], 200, ExtractionHandoff::None)
            .await
            .unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(backends.metadata.sources().await.unwrap(), vec![("filesystem".to_string(), 1)]);
    }
}
