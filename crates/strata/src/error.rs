//! Typed errors for the places where callers branch on the failure kind.
//!
//! Everything else uses `anyhow::Result`.

use thiserror::Error;

use strata_core::search::Strategy;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Every strategy that was attempted timed out or failed.
    #[error("all search strategies failed: {}", describe(.failures))]
    AllStrategiesFailed { failures: Vec<(Strategy, String)> },

    #[error("query is empty")]
    EmptyQuery,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("search cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable code for HTTP and MCP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::AllStrategiesFailed { .. } => "all_strategies_failed",
            EngineError::EmptyQuery => "empty_query",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::Cancelled => "cancelled",
            EngineError::Storage(_) => "storage_error",
        }
    }
}

fn describe(failures: &[(Strategy, String)]) -> String {
    failures
        .iter()
        .map(|(strategy, error)| format!("{}: {}", strategy, error))
        .collect::<Vec<_>>()
        .join("; ")
}
