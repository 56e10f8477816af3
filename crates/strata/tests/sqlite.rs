//! The same flows as the in-memory tests, against a real SQLite file.

mod common;

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use strata::config::{parse_config, Config};
use strata::engine::SearchEngine;
use strata::sources::remove_source;
use strata::{Backends, KagSearcher};
use strata_core::extract::RawExtraction;
use strata_core::ids::entity_id;
use strata_core::kag::KagRequest;
use strata_core::models::{Entity, EntityType};
use strata_core::search::{RetrievalParams, SearchOutcome, SearchRequest, Strategy};
use strata_core::store::{Collection, VectorFilter};

use common::*;

fn sqlite_config(tmp: &TempDir) -> Config {
    let path = tmp.path().join("strata.sqlite");
    parse_config(&format!(
        "[db]\npath = \"{}\"\n\n[chunking]\nmax_tokens = 200\n",
        path.display()
    ))
    .unwrap()
}

async fn open(config: &Config) -> Backends {
    Backends::open(config)
        .await
        .unwrap()
        .with_embedder(Arc::new(HashEmbedder))
}

fn sqlite_engine(backends: Backends) -> SearchEngine {
    SearchEngine::with_settings(backends, RetrievalParams::default(), timeouts(), true)
}

const DOCS: &[(&str, &str)] = &[
    (
        "oak.md",
        "Oak Ridge laboratories published new findings on reactor cooling.",
    ),
    (
        "deploy.md",
        "The deployment checklist covers kubernetes cluster upgrades and rollback plans.",
    ),
];

#[tokio::test]
async fn test_hybrid_search_on_sqlite() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);
    let backends = open(&config).await;
    ingest(&backends, DOCS).await;

    let chunk_vectors = backends
        .vectors
        .count(Collection::Chunks, &VectorFilter::default())
        .await
        .unwrap();
    assert_eq!(chunk_vectors, 2);

    let response = sqlite_engine(backends)
        .search(&SearchRequest::new("reactor cooling"))
        .await
        .unwrap();
    assert_eq!(response.outcome, SearchOutcome::Success);
    assert_eq!(response.hits[0].path, "oak.md");
    assert!(response.hits[0].strategies.contains(&Strategy::LexicalRelaxed));
    assert!(response.hits[0].strategies.contains(&Strategy::Semantic));
}

#[tokio::test]
async fn test_fts_operators_in_query_are_inert() {
    let tmp = TempDir::new().unwrap();
    let backends = open(&sqlite_config(&tmp)).await;
    ingest(&backends, DOCS).await;

    let response = sqlite_engine(backends)
        .search(&SearchRequest::new("kubernetes AND \"rollback* NEAR("))
        .await
        .unwrap();
    assert!(response.hits.iter().any(|h| h.path == "deploy.md"));
}

#[tokio::test]
async fn test_reopen_keeps_data_and_skips_unchanged() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);
    {
        let backends = open(&config).await;
        ingest(&backends, DOCS).await;
    }

    let backends = open(&config).await;
    let items: Vec<_> = DOCS.iter().map(|(p, b)| item(p, b)).collect();
    let report = strata::ingest::ingest_items(
        &backends,
        &items,
        200,
        strata::ingest::ExtractionHandoff::None,
    )
    .await
    .unwrap();
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.documents, 0);
    assert_eq!(
        backends.metadata.sources().await.unwrap(),
        vec![("filesystem".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_extraction_kag_and_removal_on_sqlite() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);
    let backends = open(&config).await;
    ingest(&backends, &[("threats.md", "The threat model uses STRIDE.")]).await;

    let backlog = backends.metadata.extraction_backlog().await.unwrap();
    assert_eq!(backlog.pending, 1);

    let provider = Arc::new(ScriptedExtractor::new(RawExtraction {
        entities: vec![
            entity("Threat Model", "concept", "Risks to the service", 0.9),
            entity("STRIDE", "framework", "", 0.8),
        ],
        relations: vec![relation("Threat Model", "uses", "STRIDE", 0.8)],
    }));
    let processor = processor(&backends, provider);
    for chunk_id in backends.metadata.pending_chunks(10).await.unwrap() {
        processor
            .process(&chunk_id, &CancellationToken::new())
            .await
            .unwrap();
    }
    let backlog = backends.metadata.extraction_backlog().await.unwrap();
    assert_eq!(backlog.completed, 1);
    assert_eq!(backends.knowledge.entity_count().await.unwrap(), 2);

    let kag = KagSearcher::new(backends.clone(), &config)
        .search(&KagRequest::new("threat model"))
        .await
        .unwrap();
    assert_eq!(kag.entities[0].name, "Threat Model");
    assert_eq!(kag.relations.len(), 1);

    let report = remove_source(&backends, "filesystem").await.unwrap();
    assert_eq!(report.rows.documents, 1);
    assert_eq!(report.rows.entities, 2);
    assert_eq!(
        backends
            .vectors
            .count(Collection::Chunks, &VectorFilter::default())
            .await
            .unwrap(),
        0
    );
    assert!(backends.metadata.sources().await.unwrap().is_empty());
    assert_eq!(backends.knowledge.entity_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_exact_entity_name_survives_description_matches() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);
    let backends = Backends::open(&config).await.unwrap();

    let stored = |name: &str, description: &str, confidence: f64| Entity {
        id: entity_id(name, EntityType::Technology, "doc"),
        name: name.to_string(),
        entity_type: EntityType::Technology,
        description: description.to_string(),
        confidence,
        source_document_id: "doc".to_string(),
        source_chunk_id: "chunk".to_string(),
    };
    for i in 0..20 {
        let e = stored(&format!("Crate{}", i), "a library written in rust", 0.95);
        backends.knowledge.upsert_entity(&e).await.unwrap();
    }
    backends
        .knowledge
        .upsert_entity(&stored("Rust", "", 0.6))
        .await
        .unwrap();

    let found = backends
        .knowledge
        .search_entities(&["rust".to_string()], None, 5)
        .await
        .unwrap();
    assert_eq!(found[0].name, "Rust");

    let request = KagRequest {
        limit: Some(5),
        ..KagRequest::new("rust")
    };
    let response = KagSearcher::new(backends, &config)
        .search(&request)
        .await
        .unwrap();
    let names: Vec<&str> = response.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names.len(), 5);
    assert_eq!(names[0], "Rust", "got {:?}", names);
}
