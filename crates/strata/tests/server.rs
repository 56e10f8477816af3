mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use strata::server::router;
use strata::{Backends, KagSearcher, ToolContext, ToolRegistry};

use common::*;

async fn spawn(backends: Backends) -> SocketAddr {
    let ctx = ToolContext::new(
        Arc::new(engine(backends.clone())),
        Arc::new(KagSearcher::new(backends.clone(), &test_config())),
        backends,
    );
    let app = router(ctx, Arc::new(ToolRegistry::with_builtins()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn seeded() -> Backends {
    let backends = Backends::in_memory();
    ingest(
        &backends,
        &[
            ("oak.md", "Oak Ridge laboratories published new findings on reactor cooling."),
            ("deploy.md", "The deployment checklist covers kubernetes rollback plans."),
        ],
    )
    .await;
    backends
}

async fn call(addr: SocketAddr, tool: &str, params: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{}/tools/{}", addr, tool))
        .json(&params)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health_and_tool_list() {
    let addr = spawn(seeded().await).await;

    let health: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let list: Value = reqwest::get(format!("http://{}/tools/list", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = list["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["search", "kag_search", "extraction_status"]);
}

#[tokio::test]
async fn test_search_tool() {
    let addr = spawn(seeded().await).await;

    let (status, body) = call(addr, "search", json!({ "query": "kubernetes rollback", "limit": 5 })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["outcome"], "success");
    assert_eq!(body["result"]["hits"][0]["path"], "deploy.md");

    let (status, body) = call(addr, "search", json!({ "query": "zzqx" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["outcome"], "empty");
    assert!(body["result"]["hits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_requests() {
    let addr = spawn(seeded().await).await;

    let (status, body) = call(addr, "search", json!({ "query": "   " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "empty_query");

    let (status, body) = call(addr, "search", json!({ "query": "x", "mode": "telepathy" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, body) = call(addr, "no_such_tool", json!({})).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_every_backend_down_is_503() {
    let backends = seeded()
        .await
        .with_lexical(Arc::new(FailingLexical))
        .with_embedder(Arc::new(FailingEmbedder));
    let addr = spawn(backends).await;

    let (status, body) = call(addr, "search", json!({ "query": "reactor cooling" })).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "all_strategies_failed");
}

#[tokio::test]
async fn test_extraction_status_tool() {
    let addr = spawn(seeded().await).await;

    let (status, body) = call(addr, "extraction_status", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["backlog"]["pending"], 2);
    assert_eq!(body["result"]["total_chunks"], 2);
    assert_eq!(body["result"]["entities"], 0);
}
