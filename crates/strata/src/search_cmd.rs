//! `strata search` and `strata kag`: run a query and print the answer.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use strata_core::kag::{KagRequest, KagResponse};
use strata_core::search::{SearchOutcome, SearchRequest, SearchResponse, StrategyStatus};

use crate::backends::Backends;
use crate::config::Config;
use crate::engine::SearchEngine;
use crate::kag::KagSearcher;

/// Process exit code for a search that returned normally.
///
/// Hard failures are errors and exit with 1 through `main`.
pub fn exit_code(outcome: SearchOutcome) -> u8 {
    match outcome {
        SearchOutcome::Success => 0,
        SearchOutcome::Partial => 2,
        SearchOutcome::Empty => 3,
    }
}

pub async fn run_search(config: &Config, request: &SearchRequest, json: bool) -> Result<SearchOutcome> {
    let backends = Backends::open(config).await?;
    let engine = SearchEngine::new(backends, config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    let result = engine.search_with_cancel(request, &cancel).await;
    watcher.abort();

    let response = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_search(&response);
    }
    Ok(response.outcome)
}

fn print_search(response: &SearchResponse) {
    if response.hits.is_empty() {
        println!("No results.");
    }

    for (i, hit) in response.hits.iter().enumerate() {
        let title = hit.title.as_deref().unwrap_or("(untitled)");
        let strategies: Vec<&str> = hit.strategies.iter().map(|s| s.as_str()).collect();
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, hit.source, title);
        println!("    path: {}", hit.path);
        println!(
            "    found by: {} (agreement {:.2}, {})",
            strategies.join(", "),
            hit.agreement,
            hit.confidence
        );
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        if let Some(explain) = &hit.explain {
            let ranks: Vec<String> = explain
                .ranks
                .iter()
                .map(|(s, r)| format!("{}#{}", s, r))
                .collect();
            println!("    fused: {:.5}  ranks: {}", explain.fused, ranks.join(" "));
            if explain.proper_noun_boost {
                println!("    proper-noun boost applied");
            }
            if let Some(sim) = explain.semantic_similarity {
                println!("    semantic similarity: {:.3}", sim);
            }
            if let Some(sim) = explain.rerank_similarity {
                println!("    rerank similarity: {:.3}", sim);
            }
        }
        println!("    id: {}", hit.chunk_id);
        println!();
    }

    println!(
        "query type: {}  confidence: {}  outcome: {:?}  ({} ms)",
        response.query_type, response.confidence, response.outcome, response.elapsed_ms
    );
    for report in &response.strategies {
        let status = match &report.status {
            StrategyStatus::Completed { hits } => format!("{} hits", hits),
            StrategyStatus::TimedOut { budget_ms } => format!("timed out after {}ms", budget_ms),
            StrategyStatus::Failed { error } => format!("failed: {}", error),
            StrategyStatus::Skipped { reason } => format!("skipped: {}", reason),
            StrategyStatus::Cancelled => "cancelled".to_string(),
        };
        println!("  {:<16} {}", report.strategy.as_str(), status);
    }
    for note in &response.notes {
        println!("note: {}", note);
    }
    if !response.suggestions.is_empty() {
        println!("try: {}", response.suggestions.join(" | "));
    }
}

pub async fn run_kag(config: &Config, request: &KagRequest, json: bool) -> Result<()> {
    let backends = Backends::open(config).await?;
    let searcher = KagSearcher::new(backends, config);
    let response = searcher.search(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_kag(&response);
    }
    Ok(())
}

fn print_kag(response: &KagResponse) {
    if response.entities.is_empty() {
        println!("No entities.");
    } else {
        println!("{}", response.context);
    }
    println!(
        "{} entities, {} relations, {} hops ({} ms)",
        response.entities.len(),
        response.relations.len(),
        response.hops,
        response.elapsed_ms
    );
    for note in &response.notes {
        println!("note: {}", note);
    }
}
