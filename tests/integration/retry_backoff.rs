//! Retry behavior of the generation client inside a pipeline run.

use crate::integration::test_utils::write_problem;
use solvent::config::SolventConfig;
use solvent::error::GenerationError;
use solvent::pipeline::{Stage, StageState};
use solvent::provider::{RetryPolicy, RetryingClient, ScriptedClient};
use solvent::scheduler::{BatchOptions, BatchScheduler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay_ms: 20,
        backoff_factor: 2.0,
        max_delay_ms: 1_000,
        attempt_timeout_secs: 30,
    }
}

fn rate_limited() -> Result<String, GenerationError> {
    Err(GenerationError::RateLimited("429 Too Many Requests".into()))
}

#[tokio::test]
async fn test_rate_limited_search_recovers_after_backoff() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "06_retry", "Explain tidal locking.");

    let scripted = ScriptedClient::new()
        .sequence("search", vec![rate_limited(), rate_limited(), rate_limited()])
        .with_offline_rules();
    let client = Arc::new(RetryingClient::new(scripted, policy()));
    let sched = BatchScheduler::new(ws.path(), SolventConfig::default(), client.clone()).unwrap();

    let started = Instant::now();
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    // 20 + 40 + 80 ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(140));
    let outcome = &report.outcomes[0];
    assert!(outcome.succeeded(), "{:?}", outcome.error);
    assert_eq!(
        outcome.sub_problems[0].state_of(Stage::Search),
        Some(StageState::Succeeded)
    );
    assert_eq!(client.inner().calls_for("search").len(), 4);
}

#[tokio::test]
async fn test_exhausted_retries_degrade_search_only() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "07_retry", "Explain tidal locking.");

    let mut short = policy();
    short.max_attempts = 2;
    let scripted = ScriptedClient::new()
        .fail("search", GenerationError::Transient("connection reset".into()))
        .with_offline_rules();
    let client = Arc::new(RetryingClient::new(scripted, short));
    let sched = BatchScheduler::new(ws.path(), SolventConfig::default(), client.clone()).unwrap();
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.succeeded());
    assert_eq!(
        outcome.sub_problems[0].state_of(Stage::Search),
        Some(StageState::Degraded)
    );
    assert_eq!(client.inner().calls_for("search").len(), 2);
}

#[tokio::test]
async fn test_fatal_errors_are_not_retried() {
    let ws = TempDir::new().unwrap();
    write_problem(ws.path(), "08_retry", "Explain tidal locking.");

    let scripted = ScriptedClient::new()
        .fail("decompose", GenerationError::Fatal("401 Unauthorized".into()));
    let client = Arc::new(RetryingClient::new(scripted, policy()));
    let sched = BatchScheduler::new(ws.path(), SolventConfig::default(), client.clone()).unwrap();
    let report = sched.run(&BatchOptions::default()).await.unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(client.inner().calls_for("decompose").len(), 1);
}
