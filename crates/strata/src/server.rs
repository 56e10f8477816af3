//! HTTP server: JSON tool endpoints plus the MCP Streamable HTTP endpoint.
//!
//! | Route               | Purpose                                    |
//! |---------------------|--------------------------------------------|
//! | `GET /health`       | liveness and version                       |
//! | `GET /tools/list`   | tool names, descriptions, parameter schema |
//! | `POST /tools/{name}`| call a tool, answer is `{ "result": ... }` |
//! | `/mcp`              | MCP JSON-RPC over Streamable HTTP          |
//!
//! Errors use `{ "error": { "code", "message" } }`. A query that found
//! nothing is not an error: it is a 200 with `outcome: "empty"`. Only
//! `all_strategies_failed` (every backend down) maps to 503.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::backends::Backends;
use crate::config::Config;
use crate::engine::SearchEngine;
use crate::kag::KagSearcher;
use crate::mcp::McpBridge;
use crate::traits::{ToolContext, ToolError, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

/// `strata serve mcp`. Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backends = Backends::open(config).await?;
    let ctx = ToolContext::new(
        Arc::new(SearchEngine::new(backends.clone(), config)),
        Arc::new(KagSearcher::new(backends.clone(), config)),
        backends,
    );
    let tools = Arc::new(ToolRegistry::with_builtins());

    let app = router(ctx, tools.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    println!("strata server listening on http://{}", config.server.bind);
    for t in tools.tools() {
        println!("  POST /tools/{} - {}", t.name(), t.description());
    }
    println!("  MCP endpoint: http://{}/mcp", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// All routes, ready to serve.
pub fn router(ctx: ToolContext, tools: Arc<ToolRegistry>) -> Router {
    let bridge = McpBridge::new(tools.clone(), ctx.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        Arc::new(LocalSessionManager::default()),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(AppState { tools, ctx })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// HTTP status for a tool failure, keyed on its code.
fn status_for(code: &str) -> StatusCode {
    match code {
        "invalid_request" | "empty_query" => StatusCode::BAD_REQUEST,
        "all_strategies_failed" => StatusCode::SERVICE_UNAVAILABLE,
        "cancelled" => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn tool_error(tool_name: &str, err: ToolError) -> AppError {
    let code = err.code();
    let status = status_for(code);
    if status.is_server_error() {
        tracing::error!(tool = tool_name, code, error = %err, "tool call failed");
    }
    AppError {
        status,
        code: code.to_string(),
        message: format!("{}: {}", tool_name, err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_for("all_strategies_failed"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for("empty_query"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("invalid_request"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("storage_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
