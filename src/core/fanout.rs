//! Per-region fan-out with timeouts and cancellation.
//!
//! Every region runs as its own task; one region failing never cancels its
//! siblings. Only the caller's cancellation token stops the remaining work.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub(crate) const CANCELLED: &str = "cancelled";

/// Outcome of one region's share of a fan-out job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOutcome {
    /// Target region
    pub region_id: String,
    /// Did the operation succeed
    pub success: bool,
    /// Error detail on failure
    pub error: Option<String>,
    /// Wall time spent on this region (ms)
    pub duration_ms: u64,
}

impl RegionOutcome {
    /// Successful outcome.
    pub fn succeeded(region_id: &str, duration_ms: u64) -> Self {
        Self {
            region_id: region_id.to_string(),
            success: true,
            error: None,
            duration_ms,
        }
    }

    /// Failed outcome with the error text.
    pub fn failed(region_id: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            region_id: region_id.to_string(),
            success: false,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Aggregate status of a fan-out job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobStatus {
    /// Every region succeeded
    Success,
    /// At least one region failed
    PartialFailure { failed: Vec<String> },
}

impl JobStatus {
    /// Success iff every outcome succeeded.
    pub fn from_outcomes(outcomes: &[RegionOutcome]) -> Self {
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.region_id.clone())
            .collect();
        if failed.is_empty() {
            JobStatus::Success
        } else {
            JobStatus::PartialFailure { failed }
        }
    }

    /// Every region succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }

    /// Regions that failed.
    pub fn failed(&self) -> &[String] {
        match self {
            JobStatus::Success => &[],
            JobStatus::PartialFailure { failed } => failed,
        }
    }
}

fn dedup(targets: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

async fn timed<Fut>(region_id: &str, operation: &str, limit: Duration, fut: Fut) -> RegionOutcome
where
    Fut: Future<Output = Result<()>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(limit, fut).await;
    let elapsed = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => RegionOutcome::succeeded(region_id, elapsed),
        Ok(Err(e)) => RegionOutcome::failed(region_id, e.to_string(), elapsed),
        Err(_) => {
            let err = Error::Timeout {
                operation: operation.to_string(),
                after_ms: limit.as_millis() as u64,
            };
            RegionOutcome::failed(region_id, err.to_string(), elapsed)
        }
    }
}

/// Run `op` for every target concurrently and collect the outcomes in
/// target order.
pub(crate) async fn run_parallel<F, Fut>(
    operation: &'static str,
    targets: Vec<String>,
    limit: Duration,
    cancel: &CancellationToken,
    op: F,
) -> Vec<RegionOutcome>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let targets = dedup(targets);
    let mut join_set = JoinSet::new();
    let mut pending: HashSet<String> = HashSet::new();

    for region_id in &targets {
        let fut = op(region_id.clone());
        let region_id = region_id.clone();
        pending.insert(region_id.clone());
        join_set.spawn(async move { timed(&region_id, operation, limit, fut).await });
    }

    let mut outcomes = Vec::with_capacity(targets.len());
    let mut cancelled = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                join_set.abort_all();
                // Reap aborted tasks so nothing outlives the job.
                while join_set.join_next().await.is_some() {}
                break;
            }
            joined = join_set.join_next() => match joined {
                Some(Ok(outcome)) => {
                    pending.remove(&outcome.region_id);
                    outcomes.push(outcome);
                }
                Some(Err(e)) => tracing::error!("{} task panicked: {}", operation, e),
                None => break,
            }
        }
    }

    let reason = if cancelled { CANCELLED } else { "task aborted" };
    for region_id in pending {
        outcomes.push(RegionOutcome::failed(&region_id, reason, 0));
    }

    outcomes.sort_by_key(|o| targets.iter().position(|t| *t == o.region_id));
    outcomes
}

/// Run `op` for each target one after another.
pub(crate) async fn run_sequential<F, Fut>(
    operation: &'static str,
    targets: Vec<String>,
    limit: Duration,
    cancel: &CancellationToken,
    op: F,
) -> Vec<RegionOutcome>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut outcomes = Vec::new();

    for region_id in dedup(targets) {
        if cancel.is_cancelled() {
            outcomes.push(RegionOutcome::failed(&region_id, CANCELLED, 0));
            continue;
        }

        let fut = op(region_id.clone());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RegionOutcome::failed(&region_id, CANCELLED, 0),
            outcome = timed(&region_id, operation, limit, fut) => outcome,
        };
        outcomes.push(outcome);
    }

    outcomes
}
