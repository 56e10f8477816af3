//! Concurrent strategy execution under per-strategy budgets and a query
//! deadline.
//!
//! Each strategy runs as its own task on a [`JoinSet`]. A task resolves to
//! a [`StrategyStatus`] by itself: it stops at the earlier of its budget
//! and the query deadline, and stops early on cancellation. The collector
//! enforces the deadline again as a backstop, so a task that ignores its
//! own timer still cannot hold the query past the deadline.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use strata_core::search::{RankedChunk, Strategy, StrategyReport, StrategyResult, StrategyStatus};

/// One strategy to run: its future and its own time budget.
pub struct StrategyTask {
    pub strategy: Strategy,
    pub budget: Duration,
    pub future: BoxFuture<'static, Result<Vec<RankedChunk>>>,
}

impl StrategyTask {
    pub fn new<F>(strategy: Strategy, budget: Duration, future: F) -> Self
    where
        F: std::future::Future<Output = Result<Vec<RankedChunk>>> + Send + 'static,
    {
        StrategyTask {
            strategy,
            budget,
            future: Box::pin(future),
        }
    }
}

/// What a batch of strategies produced.
#[derive(Debug, Default)]
pub struct Execution {
    /// Completed strategies, in [`Strategy`] order.
    pub results: Vec<StrategyResult>,
    /// One report per attempted strategy, in [`Strategy`] order.
    pub reports: Vec<StrategyReport>,
}

impl Execution {
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn attempted(&self) -> usize {
        self.reports.len()
    }

    pub fn degraded(&self) -> bool {
        self.reports.iter().any(|r| r.status.is_degraded())
    }

    pub fn cancelled(&self) -> bool {
        self.reports
            .iter()
            .any(|r| r.status == StrategyStatus::Cancelled)
    }

    /// `(strategy, reason)` for every strategy that timed out or failed.
    pub fn failures(&self) -> Vec<(Strategy, String)> {
        self.reports
            .iter()
            .filter_map(|r| match &r.status {
                StrategyStatus::TimedOut { budget_ms } => {
                    Some((r.strategy, format!("timed out after {}ms", budget_ms)))
                }
                StrategyStatus::Failed { error } => Some((r.strategy, error.clone())),
                _ => None,
            })
            .collect()
    }
}

struct Finished {
    strategy: Strategy,
    status: StrategyStatus,
    hits: Option<Vec<RankedChunk>>,
    elapsed_ms: u64,
}

async fn run_one(task: StrategyTask, deadline: Instant, cancel: CancellationToken) -> Finished {
    let started = Instant::now();
    let stop_at = (started + task.budget).min(deadline);
    let budget_ms = stop_at.saturating_duration_since(started).as_millis() as u64;

    let (status, hits) = tokio::select! {
        _ = cancel.cancelled() => (StrategyStatus::Cancelled, None),
        outcome = tokio::time::timeout_at(stop_at, task.future) => match outcome {
            Ok(Ok(hits)) => (StrategyStatus::Completed { hits: hits.len() }, Some(hits)),
            Ok(Err(e)) => (StrategyStatus::Failed { error: format!("{:#}", e) }, None),
            Err(_) => (StrategyStatus::TimedOut { budget_ms }, None),
        },
    };

    Finished {
        strategy: task.strategy,
        status,
        hits,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Run every task concurrently and collect whatever finishes by `deadline`.
///
/// Never fails: a strategy that errors, times out, panics, or is cancelled
/// is reported with that status and contributes no hits.
pub async fn run_strategies(
    tasks: Vec<StrategyTask>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Execution {
    let started = Instant::now();
    let mut outstanding: BTreeMap<Strategy, u64> = BTreeMap::new();
    let mut set = JoinSet::new();

    for task in tasks {
        let budget_ms = task.budget.as_millis() as u64;
        outstanding.insert(task.strategy, budget_ms);
        set.spawn(run_one(task, deadline, cancel.child_token()));
    }

    let mut finished: Vec<Finished> = Vec::new();
    let mut panicked = false;
    let mut stop: Option<StrategyStatus> = None;

    while !set.is_empty() {
        tokio::select! {
            biased;
            joined = set.join_next() => match joined {
                Some(Ok(done)) => {
                    outstanding.remove(&done.strategy);
                    finished.push(done);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "strategy task panicked");
                    panicked = true;
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                stop = Some(StrategyStatus::Cancelled);
                break;
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    set.abort_all();

    // Anything still outstanding never reported: deadline, cancellation, or a panic.
    let elapsed_ms = started.elapsed().as_millis() as u64;
    for (strategy, budget_ms) in outstanding {
        let status = match &stop {
            Some(status) => status.clone(),
            None if panicked && Instant::now() < deadline => StrategyStatus::Failed {
                error: "strategy task panicked".to_string(),
            },
            None => StrategyStatus::TimedOut { budget_ms },
        };
        finished.push(Finished {
            strategy,
            status,
            hits: None,
            elapsed_ms,
        });
    }

    finished.sort_by_key(|f| f.strategy);
    let mut execution = Execution::default();
    for done in finished {
        match &done.status {
            StrategyStatus::Completed { hits } => {
                tracing::debug!(strategy = %done.strategy, hits, elapsed_ms = done.elapsed_ms, "strategy completed");
            }
            status if status.is_degraded() => {
                tracing::warn!(strategy = %done.strategy, ?status, elapsed_ms = done.elapsed_ms, "strategy degraded");
            }
            _ => {}
        }
        execution.reports.push(StrategyReport {
            strategy: done.strategy,
            status: done.status,
            elapsed_ms: done.elapsed_ms,
        });
        if let Some(hits) = done.hits {
            execution.results.push(StrategyResult {
                strategy: done.strategy,
                hits,
            });
        }
    }
    execution
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn hit(id: &str) -> RankedChunk {
        RankedChunk {
            chunk_id: id.to_string(),
            document_id: "d".to_string(),
            score: 1.0,
            snippet: String::new(),
            text: String::new(),
        }
    }

    #[tokio::test]
    async fn test_slow_strategy_times_out_without_blocking_others() {
        let tasks = vec![
            StrategyTask::new(Strategy::LexicalExact, Duration::from_millis(200), async {
                Ok(vec![hit("a")])
            }),
            StrategyTask::new(Strategy::Semantic, Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(vec![hit("b")])
            }),
        ];
        let started = Instant::now();
        let exec = run_strategies(
            tasks,
            Instant::now() + Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(exec.completed(), 1);
        assert!(exec.degraded());
        assert!(matches!(
            exec.reports[1].status,
            StrategyStatus::TimedOut { .. }
        ));
    }

    #[tokio::test]
    async fn test_failure_is_a_status() {
        let tasks = vec![
            StrategyTask::new(Strategy::LexicalRelaxed, Duration::from_millis(100), async {
                Err(anyhow!("fts5 unavailable"))
            }),
            StrategyTask::new(Strategy::LexicalExact, Duration::from_millis(100), async {
                Ok(vec![])
            }),
        ];
        let exec = run_strategies(
            tasks,
            Instant::now() + Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(exec.completed(), 1);
        let failures = exec.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Strategy::LexicalRelaxed);
        assert!(failures[0].1.contains("fts5"));
    }

    #[tokio::test]
    async fn test_deadline_caps_budget() {
        let tasks = vec![StrategyTask::new(
            Strategy::Semantic,
            Duration::from_secs(10),
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(vec![])
            },
        )];
        let started = Instant::now();
        let exec = run_strategies(
            tasks,
            Instant::now() + Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(exec.completed(), 0);
        assert!(matches!(
            exec.reports[0].status,
            StrategyStatus::TimedOut { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let tasks = vec![StrategyTask::new(
            Strategy::Semantic,
            Duration::from_secs(10),
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(vec![])
            },
        )];
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let exec = run_strategies(tasks, Instant::now() + Duration::from_secs(10), &cancel).await;
        assert!(exec.cancelled());
        assert_eq!(exec.completed(), 0);
    }
}
