//! Fixed-size worker pool executing problem runs.

use crate::pipeline::{PipelineRunner, RunReport};
use crate::problem::{Problem, ProblemLifecycle};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

/// Run every problem on `workers` tasks and collect the reports in queue order.
///
/// Problem failures never stop a worker. A panicking run is reported as a failed problem
/// and the worker moves on; one report is returned per problem, always.
pub async fn run_pool(
    runner: Arc<PipelineRunner>,
    problems: Vec<Problem>,
    workers: usize,
) -> Vec<RunReport> {
    let total = problems.len();
    if total == 0 {
        return Vec::new();
    }
    let worker_count = workers.clamp(1, total);
    let ids: Vec<String> = problems.iter().map(|p| p.id.clone()).collect();
    let queue = Arc::new(Mutex::new(
        problems.into_iter().enumerate().collect::<VecDeque<_>>(),
    ));
    let (tx, mut rx) = mpsc::channel::<(usize, RunReport)>(total);

    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let queue = Arc::clone(&queue);
        let runner = Arc::clone(&runner);
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, queue, runner, tx).await;
        }));
    }
    drop(tx);
    info!(worker_count, problems = total, "Started problem workers");

    let mut slots: Vec<Option<RunReport>> = vec![None; total];
    while let Some((index, report)) = rx.recv().await {
        slots[index] = Some(report);
    }
    let mut worker_errors = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Problem worker terminated abnormally");
            worker_errors.push(e.to_string());
        }
    }

    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, id)| {
            slot.unwrap_or_else(|| {
                let reason = if worker_errors.is_empty() {
                    "worker stopped before reporting".to_string()
                } else {
                    format!("worker terminated abnormally: {}", worker_errors.join("; "))
                };
                error!(problem = %id, reason = %reason, "No report for problem");
                RunReport::aborted(&id, reason)
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<(usize, Problem)>>>,
    runner: Arc<PipelineRunner>,
    tx: mpsc::Sender<(usize, RunReport)>,
) {
    debug!(worker_id, "Worker started");
    loop {
        let next = {
            let mut guard = queue.lock().await;
            guard.pop_front()
        };
        let Some((index, mut problem)) = next else {
            break;
        };

        problem.lifecycle = ProblemLifecycle::Running;
        debug!(worker_id, problem = %problem.id, "Worker picked up problem");
        let report = match AssertUnwindSafe(runner.run(&problem)).catch_unwind().await {
            Ok(report) => report,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(worker_id, problem = %problem.id, panic = %message, "Problem run panicked");
                RunReport::aborted(&problem.id, format!("run panicked: {}", message))
            }
        };
        if tx.send((index, report)).await.is_err() {
            break;
        }
    }
    debug!(worker_id, "Worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::FsArtifactStore;
    use crate::config::SolventConfig;
    use crate::pipeline::prompts::PromptLibrary;
    use crate::pipeline::{PipelineContext, RerunPolicy};
    use crate::provider::{GenerationClient, ScriptedClient};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner(dir: &TempDir, client: Arc<dyn GenerationClient>) -> Arc<PipelineRunner> {
        Arc::new(PipelineRunner::new(PipelineContext {
            client,
            store: Arc::new(FsArtifactStore::new(dir.path()).unwrap()),
            prompts: Arc::new(PromptLibrary::builtin()),
            config: Arc::new(SolventConfig::default()),
            rerun: RerunPolicy::Resume,
            problem_files: Arc::new(Vec::new()),
        }))
    }

    fn problems(count: usize) -> Vec<Problem> {
        (1..=count)
            .map(|i| {
                Problem::new(
                    format!("{:02}_p", i),
                    format!("Explain thing {}.", i),
                    PathBuf::from(format!("/nonexistent/{:02}_p/problem.md", i)),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reports_keep_queue_order() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::offline().with_latency(Duration::from_millis(2));
        let reports = run_pool(runner(&dir, Arc::new(client)), problems(5), 3).await;
        let ids: Vec<_> = reports.iter().map(|r| r.problem_id.as_str()).collect();
        assert_eq!(ids, vec!["01_p", "02_p", "03_p", "04_p", "05_p"]);
        assert!(reports.iter().all(RunReport::succeeded));
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir, Arc::new(ScriptedClient::offline()));
        assert!(run_pool(runner, Vec::new(), 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_run_is_reported_as_failed() {
        let dir = TempDir::new().unwrap();
        let client = ScriptedClient::new()
            .respond_with("draft", |request| {
                if request.user.contains("thing 2") {
                    panic!("draft generator crashed");
                }
                Ok("Draft.".to_string())
            })
            .with_offline_rules();
        let reports = run_pool(runner(&dir, Arc::new(client)), problems(3), 2).await;

        assert_eq!(reports.len(), 3);
        let ids: Vec<_> = reports.iter().map(|r| r.problem_id.as_str()).collect();
        assert_eq!(ids, vec!["01_p", "02_p", "03_p"]);
        assert!(reports[0].succeeded());
        assert!(reports[2].succeeded());
        assert_eq!(reports[1].lifecycle, ProblemLifecycle::Failed);
        let error = reports[1].error.as_deref().unwrap();
        assert!(error.contains("draft generator crashed"), "{}", error);
    }
}
