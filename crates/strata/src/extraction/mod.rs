//! Entity and relation extraction.
//!
//! Providers implement [`strata_core::extract::ExtractionProvider`]:
//! - **[`OllamaExtractor`]**: local model via `/api/generate` in JSON mode.
//! - **[`OpenAIExtractor`]**: chat completions with a JSON response format.
//! - **[`AnthropicExtractor`]**: the Messages API.
//!
//! [`pipeline`] runs them over pending chunks with a bounded worker pool.

mod anthropic;
mod ollama;
mod openai;
pub mod pipeline;
pub mod prompt;

use std::sync::Arc;

use anyhow::{bail, Result};
use thiserror::Error;

use strata_core::extract::ExtractionProvider;

use crate::backends::Backends;
use crate::config::{Config, ExtractionConfig};

pub use anthropic::AnthropicExtractor;
pub use ollama::OllamaExtractor;
pub use openai::OpenAIExtractor;
pub use pipeline::{ChunkOutcome, ChunkProcessor, ExtractionPipeline, PipelineReport, PipelineSettings};

/// Why a chunk could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Backpressure: the chunk stays `pending` and is picked up later.
    #[error("extraction queue is full (capacity {capacity})")]
    Full { capacity: usize },
    #[error("extraction pipeline is shut down")]
    Closed,
}

/// Create the configured provider; `Ok(None)` when extraction is disabled.
pub fn create_provider(config: &ExtractionConfig) -> Result<Option<Arc<dyn ExtractionProvider>>> {
    let provider: Arc<dyn ExtractionProvider> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "ollama" => Arc::new(OllamaExtractor::new(config)?),
        "openai" => Arc::new(OpenAIExtractor::new(config)?),
        "anthropic" => Arc::new(AnthropicExtractor::new(config)?),
        other => bail!("Unknown extraction provider: {}", other),
    };
    Ok(Some(provider))
}

/// Build a worker pool from config over already-open backends.
pub fn start_pipeline(
    config: &ExtractionConfig,
    backends: &Backends,
    provider: Arc<dyn ExtractionProvider>,
) -> ExtractionPipeline {
    let processor = ChunkProcessor::new(backends, provider, config.validator(), config.timeout());
    let settings = PipelineSettings {
        workers: config.workers,
        queue_capacity: config.queue_capacity,
    };
    ExtractionPipeline::start(processor, &settings)
}

/// `strata extract run`: process pending chunks until the queue drains or
/// Ctrl-C is pressed.
pub async fn run_extract(config: &Config, limit: Option<usize>) -> Result<()> {
    let Some(provider) = create_provider(&config.extraction)? else {
        bail!("extraction is disabled; set [extraction] provider in the config");
    };
    if !provider.is_available().await {
        bail!("extraction provider '{}' is not reachable", provider.name());
    }

    let backends = Backends::open(config).await?;
    let pipeline = start_pipeline(&config.extraction, &backends, provider.clone());
    let stop = pipeline.cancel_token();
    let cancel = stop.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping extraction; in-flight chunks return to pending.");
            cancel.cancel();
        }
    });

    let queued = pipeline
        .enqueue_pending(backends.metadata.as_ref(), limit.unwrap_or(usize::MAX))
        .await;
    let report = pipeline.finish().await;
    ctrl_c.abort();
    let queued = match queued {
        Ok(n) => n,
        Err(_) if stop.is_cancelled() => 0,
        Err(e) => return Err(e),
    };

    println!("Extraction ({}):", provider.name());
    println!("  queued:    {}", queued);
    println!("  completed: {}", report.completed);
    println!("  failed:    {}", report.failed);
    println!("  skipped:   {}", report.skipped);
    if report.released > 0 {
        println!("  released:  {}", report.released);
    }
    println!("  entities:  {}", report.entities);
    println!("  relations: {}", report.relations);
    println!("  rejected:  {}", report.rejected);
    Ok(())
}

/// `strata extract status`.
pub async fn run_extract_status(config: &Config) -> Result<()> {
    let backends = Backends::open(config).await?;
    let backlog = backends.metadata.extraction_backlog().await?;
    let entities = backends.knowledge.entity_count().await?;

    println!("Extraction status:");
    println!("  pending:    {}", backlog.pending);
    println!("  extracting: {}", backlog.extracting);
    println!("  completed:  {}", backlog.completed);
    println!("  failed:     {}", backlog.failed);
    println!("  total:      {}", backlog.total());
    println!("  entities:   {}", entities);
    Ok(())
}

/// `strata extract retry`: return retryable failures to `pending`.
pub async fn run_extract_retry(config: &Config) -> Result<()> {
    let backends = Backends::open(config).await?;
    let reset = backends
        .metadata
        .reset_failed(config.extraction.max_attempts)
        .await?;
    println!(
        "Reset {} failed chunk(s) to pending (max attempts: {}).",
        reset, config.extraction.max_attempts
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_provider_is_none() {
        let config = ExtractionConfig::default();
        assert!(create_provider(&config).unwrap().is_none());
    }

    #[test]
    fn test_unknown_provider_errors() {
        let config = ExtractionConfig {
            provider: "carrier-pigeon".to_string(),
            ..ExtractionConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_enqueue_error_messages() {
        assert_eq!(
            EnqueueError::Full { capacity: 8 }.to_string(),
            "extraction queue is full (capacity 8)"
        );
    }
}
