mod common;

use std::sync::Arc;
use std::time::Duration;

use strata::engine::SearchEngine;
use strata::error::EngineError;
use strata::search_cmd::exit_code;
use strata::config::TimeoutConfig;
use strata::Backends;
use strata_core::search::{
    FallbackStage, RetrievalParams, SearchMode, SearchOutcome, SearchRequest, SearchResponse,
    Strategy, StrategyStatus,
};

use common::*;

const CORPUS: &[(&str, &str)] = &[
    (
        "oak.md",
        "Oak Ridge laboratories published new findings on reactor cooling.",
    ),
    (
        "labs.md",
        "National research laboratories study reactor cooling and publish findings every year.",
    ),
    (
        "garden.md",
        "Oak trees grow on the ridge behind the garden.",
    ),
    (
        "deploy.md",
        "The deployment checklist covers kubernetes cluster upgrades and rollback plans.",
    ),
];

fn status(response: &SearchResponse, strategy: Strategy) -> Option<&StrategyStatus> {
    response
        .strategies
        .iter()
        .find(|r| r.strategy == strategy)
        .map(|r| &r.status)
}

async fn hybrid_backends() -> Backends {
    let backends = Backends::in_memory().with_embedder(Arc::new(HashEmbedder));
    ingest(&backends, CORPUS).await;
    backends
}

async fn lexical_backends() -> Backends {
    let backends = Backends::in_memory();
    ingest(&backends, CORPUS).await;
    backends
}

#[tokio::test]
async fn test_literal_phrase_beats_semantic_neighbour() {
    let engine = engine(hybrid_backends().await);
    let response = engine
        .search(&SearchRequest::new("Oak Ridge laboratories"))
        .await
        .unwrap();

    assert_eq!(response.outcome, SearchOutcome::Success);
    let top3: Vec<&str> = response.hits.iter().take(3).map(|h| h.path.as_str()).collect();
    assert!(top3.contains(&"oak.md"), "top 3 was {:?}", top3);

    let oak = response.hits.iter().find(|h| h.path == "oak.md").unwrap();
    assert!(oak.strategies.contains(&Strategy::LexicalExact));
    assert!(oak.strategies.len() >= 2);
}

#[tokio::test]
async fn test_semantic_disabled_still_answers_with_lower_confidence() {
    let engine = engine(lexical_backends().await);
    let response = engine
        .search(&SearchRequest::new("reactor cooling findings"))
        .await
        .unwrap();

    assert!(!response.hits.is_empty());
    assert_eq!(response.outcome, SearchOutcome::Success);
    assert!(matches!(
        status(&response, Strategy::Semantic),
        Some(StrategyStatus::Skipped { .. })
    ));
    assert_eq!(response.confidence, response.hits[0].confidence.downgrade());
    assert!(response.notes.iter().any(|n| n.contains("semantic")));
}

#[tokio::test]
async fn test_slow_semantic_times_out_without_stalling_lexical() {
    let backends = hybrid_backends()
        .await
        .with_embedder(Arc::new(SlowEmbedder {
            delay: Duration::from_secs(5),
        }));
    let mut timeouts = timeouts();
    timeouts.semantic_ms = 100;
    let engine = SearchEngine::with_settings(backends, RetrievalParams::default(), timeouts, true);

    let started = std::time::Instant::now();
    let response = engine
        .search(&SearchRequest::new("kubernetes rollback"))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(response.outcome, SearchOutcome::Partial);
    assert_eq!(exit_code(response.outcome), 2);
    assert!(matches!(
        status(&response, Strategy::Semantic),
        Some(StrategyStatus::TimedOut { .. })
    ));
    assert_eq!(response.hits[0].path, "deploy.md");
    assert!(response.notes.iter().any(|n| n.contains("rerank skipped")));
}

#[tokio::test]
async fn test_failing_embedder_is_partial() {
    let backends = hybrid_backends().await.with_embedder(Arc::new(FailingEmbedder));
    let response = engine(backends)
        .search(&SearchRequest::new("deployment checklist"))
        .await
        .unwrap();

    assert_eq!(response.outcome, SearchOutcome::Partial);
    match status(&response, Strategy::Semantic) {
        Some(StrategyStatus::Failed { error }) => assert!(error.contains("connection refused")),
        other => panic!("unexpected semantic status: {:?}", other),
    }
    assert!(!response.hits.is_empty());
}

#[tokio::test]
async fn test_all_strategies_failed_is_an_error() {
    let backends = hybrid_backends()
        .await
        .with_lexical(Arc::new(FailingLexical))
        .with_embedder(Arc::new(FailingEmbedder));
    let err = engine(backends)
        .search(&SearchRequest::new("deployment checklist"))
        .await
        .unwrap_err();

    match &err {
        EngineError::AllStrategiesFailed { failures } => {
            let failed: Vec<Strategy> = failures.iter().map(|(s, _)| *s).collect();
            assert!(failed.contains(&Strategy::LexicalExact));
            assert!(failed.contains(&Strategy::LexicalRelaxed));
            assert!(failed.contains(&Strategy::Semantic));
        }
        other => panic!("expected AllStrategiesFailed, got {:?}", other),
    }
    assert_eq!(err.code(), "all_strategies_failed");
}

#[tokio::test]
async fn test_every_store_hanging_fails_at_the_deadline() {
    let backends = hybrid_backends()
        .await
        .with_lexical(Arc::new(SlowLexical {
            delay: Duration::from_secs(30),
        }))
        .with_embedder(Arc::new(SlowEmbedder {
            delay: Duration::from_secs(30),
        }));
    let budgets = TimeoutConfig {
        lexical_ms: 10_000,
        semantic_ms: 10_000,
        entity_ms: 10_000,
        query_deadline_ms: 300,
        ..timeouts()
    };
    let engine = SearchEngine::with_settings(backends, RetrievalParams::default(), budgets, true);

    let started = std::time::Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        engine.search(&SearchRequest::new("deployment checklist")),
    )
    .await
    .expect("search returns by the deadline")
    .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    match &err {
        EngineError::AllStrategiesFailed { failures } => {
            assert!(failures.iter().all(|(_, reason)| reason.contains("timed out")));
            assert!(failures.iter().any(|(s, _)| *s == Strategy::Semantic));
        }
        other => panic!("expected AllStrategiesFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let engine = engine(lexical_backends().await);
    let err = engine.search(&SearchRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyQuery));
}

#[tokio::test]
async fn test_cascade_uses_stems() {
    let engine = engine(lexical_backends().await);
    let response = engine.search(&SearchRequest::new("deploying")).await.unwrap();

    assert_eq!(response.fallback_stage, FallbackStage::Relaxed);
    assert_eq!(response.hits[0].path, "deploy.md");
    assert!(response.notes.iter().any(|n| n.contains("stemmed")));
}

#[tokio::test]
async fn test_cascade_falls_back_to_substrings() {
    let engine = engine(lexical_backends().await);
    let response = engine.search(&SearchRequest::new("netes")).await.unwrap();

    assert_eq!(response.fallback_stage, FallbackStage::Substring);
    assert_eq!(response.outcome, SearchOutcome::Success);
    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].path, "deploy.md");
}

#[tokio::test]
async fn test_exhausted_cascade_is_empty_not_error() {
    let engine = engine(lexical_backends().await);
    let response = engine.search(&SearchRequest::new("zzqx")).await.unwrap();

    assert!(response.hits.is_empty());
    assert_eq!(response.fallback_stage, FallbackStage::Exhausted);
    assert_eq!(response.outcome, SearchOutcome::Empty);
    assert_eq!(exit_code(response.outcome), 3);
    assert!(!response.suggestions.is_empty());
}

#[tokio::test]
async fn test_fts_mode_runs_lexical_only() {
    let engine = engine(hybrid_backends().await);
    let mut request = SearchRequest::new("reactor cooling");
    request.mode = SearchMode::Fts;
    let response = engine.search(&request).await.unwrap();

    assert!(status(&response, Strategy::Semantic).is_none());
    for hit in &response.hits {
        assert!(hit.strategies.iter().all(|s| s.is_lexical()));
    }
}

#[tokio::test]
async fn test_semantic_weight_override() {
    let engine = engine(hybrid_backends().await);
    let mut request = SearchRequest::new("reactor cooling");
    request.semantic_weight = Some(0.9);
    let response = engine.search(&request).await.unwrap();

    assert!((response.weights.semantic - 0.9).abs() < 1e-9);
    assert!((response.weights.lexical - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_limit_and_explain() {
    let engine = engine(hybrid_backends().await);
    let mut request = SearchRequest::new("reactor cooling findings");
    request.limit = Some(1);
    request.explain = true;
    let response = engine.search(&request).await.unwrap();

    assert_eq!(response.hits.len(), 1);
    let explain = response.hits[0].explain.as_ref().unwrap();
    assert!(!explain.ranks.is_empty());
    assert!(explain.fused > 0.0);
}

#[tokio::test]
async fn test_source_filter() {
    let backends = lexical_backends().await;
    let mut wiki = item("cooling.md", "Reactor cooling loops in the wiki.");
    wiki.source = "wiki".to_string();
    strata::ingest::ingest_items(&backends, &[wiki], 200, strata::ingest::ExtractionHandoff::None)
        .await
        .unwrap();

    let mut request = SearchRequest::new("reactor cooling");
    request.source = Some("wiki".to_string());
    let response = engine(backends).search(&request).await.unwrap();

    assert_eq!(response.hits.len(), 1);
    assert_eq!(response.hits[0].source, "wiki");
}

#[tokio::test]
async fn test_identical_inputs_rank_identically() {
    let engine = engine(hybrid_backends().await);
    let request = SearchRequest::new("reactor cooling findings");
    let first = engine.search(&request).await.unwrap();
    let second = engine.search(&request).await.unwrap();

    let ids = |r: &SearchResponse| r.hits.iter().map(|h| h.chunk_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
}
