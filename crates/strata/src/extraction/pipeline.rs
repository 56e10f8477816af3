//! Background entity extraction.
//!
//! A fixed pool of workers shares one bounded queue of chunk IDs. The
//! queue is only a work list: the durable state is the chunk's
//! `extraction_status` row, so a chunk that is still queued when the pool
//! shuts down stays `pending` and is picked up by the next run.
//!
//! ```text
//! enqueue ──try_send──▶ [bounded mpsc] ──▶ worker 1..N
//!                                            │ claim (pending → extracting)
//!                                            │ sanitize, provider call, validate
//!                                            │ merge-upsert entities/relations
//!                                            ▼
//!                                  completed | failed | released (cancel)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use strata_core::embedding::EmbeddingProvider;
use strata_core::extract::{ExtractionProvider, ExtractionRequest};
use strata_core::models::{
    ChunkContext, ClaimOutcome, Entity, ExtractionState, MergeOutcome, Relation,
};
use strata_core::sanitize::sanitize_for_extraction;
use strata_core::store::{Collection, GraphStore, KnowledgeStore, MetadataStore, VectorIndex, VectorPayload};
use strata_core::validate::{ExtractionValidator, ValidatorConfig};

use super::EnqueueError;
use crate::backends::Backends;

/// Pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
}

/// What happened to one dequeued chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Completed {
        entities: usize,
        relations: usize,
        rejected: usize,
    },
    /// Not pending when claimed (already done, or another worker has it).
    Skipped(ExtractionState),
    Failed(String),
    /// Cancelled mid-call; returned to `pending`.
    Released,
}

/// Running totals across all workers.
#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    released: AtomicU64,
    entities: AtomicU64,
    relations: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &ChunkOutcome) {
        match outcome {
            ChunkOutcome::Completed {
                entities,
                relations,
                rejected,
            } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.entities.fetch_add(*entities as u64, Ordering::Relaxed);
                self.relations.fetch_add(*relations as u64, Ordering::Relaxed);
                self.rejected.fetch_add(*rejected as u64, Ordering::Relaxed);
            }
            ChunkOutcome::Skipped(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            ChunkOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ChunkOutcome::Released => {
                self.released.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            entities: self.entities.load(Ordering::Relaxed),
            relations: self.relations.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Totals reported when the pool stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub released: u64,
    pub entities: u64,
    pub relations: u64,
    pub rejected: u64,
}

/// Everything a worker needs to process one chunk.
#[derive(Clone)]
pub struct ChunkProcessor {
    provider: Arc<dyn ExtractionProvider>,
    validator: Arc<ExtractionValidator>,
    metadata: Arc<dyn MetadataStore>,
    knowledge: Arc<dyn KnowledgeStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    graph: Option<Arc<dyn GraphStore>>,
    graph_timeout: Duration,
    provider_timeout: Duration,
}

impl ChunkProcessor {
    pub fn new(
        backends: &Backends,
        provider: Arc<dyn ExtractionProvider>,
        validator: ValidatorConfig,
        provider_timeout: Duration,
    ) -> Self {
        ChunkProcessor {
            provider,
            validator: Arc::new(ExtractionValidator::new(validator)),
            metadata: backends.metadata.clone(),
            knowledge: backends.knowledge.clone(),
            vectors: backends.vectors.clone(),
            embedder: backends.embedder.clone(),
            graph: backends.graph.clone(),
            graph_timeout: backends.graph_timeout,
            provider_timeout,
        }
    }

    /// Claim, extract, and store one chunk.
    ///
    /// Only storage errors while claiming or recording the final state
    /// escape as `Err`; provider and parse failures become
    /// [`ChunkOutcome::Failed`] and are recorded on the status row.
    pub async fn process(&self, chunk_id: &str, cancel: &CancellationToken) -> Result<ChunkOutcome> {
        match self.metadata.try_claim(chunk_id).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::NotPending(state) => return Ok(ChunkOutcome::Skipped(state)),
            ClaimOutcome::Missing => {
                self.metadata.mark_pending(&[chunk_id.to_string()]).await?;
                match self.metadata.try_claim(chunk_id).await? {
                    ClaimOutcome::Claimed => {}
                    ClaimOutcome::NotPending(state) => return Ok(ChunkOutcome::Skipped(state)),
                    ClaimOutcome::Missing => {
                        return Ok(ChunkOutcome::Failed("chunk has no status row".to_string()))
                    }
                }
            }
        }

        let contexts = self.metadata.chunk_contexts(&[chunk_id.to_string()]).await?;
        let Some(ctx) = contexts.get(chunk_id) else {
            let reason = "chunk no longer exists".to_string();
            self.metadata.fail_extraction(chunk_id, &reason).await?;
            return Ok(ChunkOutcome::Failed(reason));
        };

        let sanitized = sanitize_for_extraction(&ctx.text);
        if sanitized.neutralized > 0 {
            tracing::debug!(
                chunk_id,
                neutralized = sanitized.neutralized,
                "neutralized instruction-like text before extraction"
            );
        }
        let config = self.validator.config();
        let request = ExtractionRequest {
            content: sanitized.text,
            title: ctx.title.clone(),
            max_entities: config.max_entities,
            max_relations: config.max_relations,
            confidence_threshold: config.confidence_threshold,
        };

        let call = tokio::time::timeout(self.provider_timeout, self.provider.extract(&request));
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                self.metadata.release_claim(chunk_id).await?;
                return Ok(ChunkOutcome::Released);
            }
            result = call => match result {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => return self.fail(chunk_id, format!("{}: {:#}", self.provider.name(), e)).await,
                Err(_) => {
                    let reason = format!(
                        "{}: timed out after {}s",
                        self.provider.name(),
                        self.provider_timeout.as_secs()
                    );
                    return self.fail(chunk_id, reason).await;
                }
            },
        };

        let validated = self.validator.validate(raw, chunk_id, &ctx.document_id);
        for (name, reason) in &validated.rejected {
            tracing::debug!(chunk_id, candidate = %name, %reason, "rejected extraction candidate");
        }

        if let Err(e) = self.store(ctx, &validated.entities, &validated.relations).await {
            return self.fail(chunk_id, format!("storing extraction: {:#}", e)).await;
        }

        let (entities, relations) = (validated.entities.len(), validated.relations.len());
        self.metadata
            .complete_extraction(chunk_id, entities, relations)
            .await?;
        tracing::debug!(chunk_id, entities, relations, "chunk extracted");
        Ok(ChunkOutcome::Completed {
            entities,
            relations,
            rejected: validated.rejected.len(),
        })
    }

    async fn fail(&self, chunk_id: &str, reason: String) -> Result<ChunkOutcome> {
        tracing::warn!(chunk_id, error = %reason, "extraction failed");
        self.metadata.fail_extraction(chunk_id, &reason).await?;
        Ok(ChunkOutcome::Failed(reason))
    }

    async fn store(
        &self,
        ctx: &ChunkContext,
        entities: &[Entity],
        relations: &[Relation],
    ) -> Result<()> {
        let mut changed: Vec<&Entity> = Vec::new();
        for entity in entities {
            let outcome = self.knowledge.upsert_entity(entity).await?;
            self.knowledge.record_mention(&entity.id, &ctx.chunk_id).await?;
            if outcome != MergeOutcome::Unchanged {
                changed.push(entity);
            }
        }
        for relation in relations {
            self.knowledge.upsert_relation(relation).await?;
        }

        if let Some(graph) = &self.graph {
            let bound = self.graph_timeout;
            for entity in entities {
                match tokio::time::timeout(bound, graph.upsert_node(entity)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(graph = graph.name(), error = %e, "graph node upsert failed"),
                    Err(_) => tracing::warn!(graph = graph.name(), "graph node upsert timed out"),
                }
            }
            for relation in relations {
                match tokio::time::timeout(bound, graph.upsert_edge(relation)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(graph = graph.name(), error = %e, "graph edge upsert failed"),
                    Err(_) => tracing::warn!(graph = graph.name(), "graph edge upsert timed out"),
                }
            }
        }

        if let Some(embedder) = &self.embedder {
            if !changed.is_empty() {
                if let Err(e) = self.embed_entities(embedder.as_ref(), ctx, &changed).await {
                    tracing::warn!(error = %e, "entity embedding failed; `strata embed entities` will backfill");
                }
            }
        }
        Ok(())
    }

    async fn embed_entities(
        &self,
        embedder: &dyn EmbeddingProvider,
        ctx: &ChunkContext,
        entities: &[&Entity],
    ) -> Result<()> {
        let texts: Vec<String> = entities.iter().map(|e| entity_embedding_text(e)).collect();
        let vectors = embedder.embed(&texts).await?;
        let payload = VectorPayload {
            document_id: ctx.document_id.clone(),
            source: ctx.source.clone(),
        };
        for (entity, vector) in entities.iter().zip(vectors) {
            self.vectors
                .upsert(Collection::Entities, &entity.id, &vector, &payload)
                .await?;
        }
        Ok(())
    }
}

/// Text embedded for an entity: its name, plus the description when present.
pub fn entity_embedding_text(entity: &Entity) -> String {
    if entity.description.is_empty() {
        entity.name.clone()
    } else {
        format!("{}: {}", entity.name, entity.description)
    }
}

/// A running worker pool.
pub struct ExtractionPipeline {
    tx: mpsc::Sender<String>,
    capacity: usize,
    cancel: CancellationToken,
    workers: JoinSet<()>,
    counters: Arc<Counters>,
}

impl ExtractionPipeline {
    /// Spawn `settings.workers` workers on the current runtime.
    pub fn start(processor: ChunkProcessor, settings: &PipelineSettings) -> Self {
        let capacity = settings.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<String>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let mut workers = JoinSet::new();
        for worker in 0..settings.workers.max(1) {
            workers.spawn(worker_loop(
                worker,
                processor.clone(),
                rx.clone(),
                cancel.clone(),
                counters.clone(),
            ));
        }
        tracing::info!(workers = settings.workers.max(1), capacity, "extraction pipeline started");

        ExtractionPipeline {
            tx,
            capacity,
            cancel,
            workers,
            counters,
        }
    }

    /// Queue a chunk without waiting. A full queue is reported, never
    /// dropped silently; the chunk stays `pending` either way.
    pub fn enqueue(&self, chunk_id: impl Into<String>) -> Result<(), EnqueueError> {
        if self.cancel.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.tx.try_send(chunk_id.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Queue a chunk, waiting for room.
    pub async fn submit(&self, chunk_id: impl Into<String>) -> Result<(), EnqueueError> {
        let chunk_id = chunk_id.into();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EnqueueError::Closed),
            sent = self.tx.send(chunk_id) => sent.map_err(|_| EnqueueError::Closed),
        }
    }

    /// Queue up to `limit` pending chunks, first returning chunks left in
    /// `extracting` by a crashed run to `pending`. Returns how many were queued.
    pub async fn enqueue_pending(&self, metadata: &dyn MetadataStore, limit: usize) -> Result<usize> {
        let reset = metadata.reset_stale_claims().await?;
        if reset > 0 {
            tracing::info!(reset, "returned stale extracting chunks to pending");
        }
        let pending = metadata.pending_chunks(limit).await?;
        let mut queued = 0;
        for chunk_id in pending {
            self.submit(chunk_id)
                .await
                .map_err(|e| anyhow!("queueing pending chunks: {}", e))?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn finish(self) -> PipelineReport {
        let ExtractionPipeline {
            tx,
            mut workers,
            counters,
            ..
        } = self;
        drop(tx);
        join_all(&mut workers).await;
        counters.snapshot()
    }

    /// Stop now: in-flight provider calls are abandoned and their chunks
    /// released back to `pending`; queued chunks stay `pending`.
    pub async fn shutdown(self) -> PipelineReport {
        self.cancel.cancel();
        self.finish().await
    }

    /// Token that stops the pool when cancelled, e.g. from a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "extraction worker panicked");
        }
    }
}

async fn worker_loop(
    worker: usize,
    processor: ChunkProcessor,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(chunk_id) = next else {
            break;
        };

        match processor.process(&chunk_id, &cancel).await {
            Ok(outcome) => counters.record(&outcome),
            Err(e) => {
                tracing::error!(worker, chunk_id = %chunk_id, error = %e, "extraction status update failed");
                counters.record(&ChunkOutcome::Failed(e.to_string()));
            }
        }
    }
    tracing::debug!(worker, "extraction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strata_core::extract::{RawEntity, RawExtraction, RawRelation};
    use strata_core::models::{Chunk, Document};

    struct FixedExtractor;

    #[async_trait]
    impl ExtractionProvider for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<RawExtraction> {
            Ok(RawExtraction {
                entities: vec![
                    RawEntity {
                        name: "Tokio".into(),
                        kind: "library".into(),
                        description: "async runtime".into(),
                        confidence: 0.9,
                    },
                    RawEntity {
                        name: "Rust".into(),
                        kind: "language".into(),
                        description: String::new(),
                        confidence: 0.8,
                    },
                ],
                relations: vec![RawRelation {
                    subject: "Tokio".into(),
                    predicate: "built with".into(),
                    object: "Rust".into(),
                    confidence: 0.7,
                }],
            })
        }
    }

    async fn seeded() -> Backends {
        let backends = Backends::in_memory();
        let doc = Document {
            id: "doc-1".into(),
            source: "filesystem".into(),
            source_id: "a.md".into(),
            source_url: None,
            title: Some("A".into()),
            content_type: "text/markdown".into(),
            body: "Tokio is written in Rust.".into(),
            content_hash: "h".into(),
            updated_at: 0,
        };
        backends.metadata.upsert_document(&doc).await.unwrap();
        let chunk = Chunk {
            id: "chunk-1".into(),
            document_id: "doc-1".into(),
            chunk_index: 0,
            text: "Tokio is written in Rust.".into(),
            hash: "c".into(),
        };
        backends.metadata.replace_chunks("doc-1", &[chunk]).await.unwrap();
        backends.metadata.mark_pending(&["chunk-1".to_string()]).await.unwrap();
        backends
    }

    fn processor(backends: &Backends) -> ChunkProcessor {
        let validator = ValidatorConfig {
            confidence_threshold: 0.5,
            max_name_len: 100,
            max_description_len: 500,
            max_entities: 20,
            max_relations: 30,
        };
        ChunkProcessor::new(backends, Arc::new(FixedExtractor), validator, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_process_completes_then_skips() {
        let backends = seeded().await;
        let p = processor(&backends);
        let cancel = CancellationToken::new();

        let first = p.process("chunk-1", &cancel).await.unwrap();
        assert_eq!(
            first,
            ChunkOutcome::Completed {
                entities: 2,
                relations: 1,
                rejected: 0
            }
        );
        let second = p.process("chunk-1", &cancel).await.unwrap();
        assert_eq!(second, ChunkOutcome::Skipped(ExtractionState::Completed));
        assert_eq!(backends.knowledge.entity_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_cancel_is_closed() {
        let backends = seeded().await;
        let settings = PipelineSettings {
            workers: 1,
            queue_capacity: 1,
        };
        let pipeline = ExtractionPipeline::start(processor(&backends), &settings);
        pipeline.cancel_token().cancel();
        assert_eq!(pipeline.enqueue("chunk-1"), Err(EnqueueError::Closed));
        pipeline.shutdown().await;
    }

    #[test]
    fn test_entity_embedding_text() {
        let mut e = Entity {
            id: "e".into(),
            name: "Tokio".into(),
            entity_type: strata_core::models::EntityType::Technology,
            description: String::new(),
            confidence: 0.9,
            source_document_id: "d".into(),
            source_chunk_id: "c".into(),
        };
        assert_eq!(entity_embedding_text(&e), "Tokio");
        e.description = "async runtime".into();
        assert_eq!(entity_embedding_text(&e), "Tokio: async runtime");
    }
}
