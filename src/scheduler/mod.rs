//! Batch Scheduler
//!
//! Discovers problems in a workspace, applies the inclusion filter and runs the selected
//! problems on a fixed-size worker pool. A failing problem never aborts its siblings; the
//! batch itself fails only when discovery does.

pub mod discovery;
pub mod pool;

use crate::artifact::{ArtifactStore, FsArtifactStore};
use crate::config::SolventConfig;
use crate::error::PipelineError;
use crate::pipeline::prompts::PromptLibrary;
use crate::pipeline::{PipelineContext, PipelineRunner, RerunPolicy, RunReport};
use crate::problem::Problem;
use crate::provider::GenerationClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Per-problem outcome returned by the pool.
pub type ProblemOutcome = RunReport;

/// Options of one batch invocation; `None` falls back to configuration.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub pattern: Option<String>,
    pub include: Vec<String>,
    pub concurrency: Option<usize>,
    pub rerun: RerunPolicy,
}

/// Aggregated result of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub workspace: PathBuf,
    pub discovered: usize,
    pub outcomes: Vec<ProblemOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Entry point for discovering and running problems.
pub struct BatchScheduler {
    workspace: PathBuf,
    config: Arc<SolventConfig>,
    client: Arc<dyn GenerationClient>,
    store: Arc<dyn ArtifactStore>,
    prompts: Arc<PromptLibrary>,
}

impl BatchScheduler {
    /// Scheduler writing artifacts under `config.paths.output_root`.
    pub fn new(
        workspace: &Path,
        config: SolventConfig,
        client: Arc<dyn GenerationClient>,
    ) -> Result<Self, PipelineError> {
        let mut config = config;
        config.resolve_paths(workspace);
        let store: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(&config.paths.output_root)?);
        Self::with_store(workspace, config, client, store)
    }

    pub fn with_store(
        workspace: &Path,
        config: SolventConfig,
        client: Arc<dyn GenerationClient>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, PipelineError> {
        let prompts = PromptLibrary::load(config.paths.prompts_dir.as_deref())?;
        Ok(Self {
            workspace: workspace.to_path_buf(),
            config: Arc::new(config),
            client,
            store,
            prompts: Arc::new(prompts),
        })
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn config(&self) -> &SolventConfig {
        &self.config
    }

    /// Discover and filter problems without running them.
    pub fn discover(&self, options: &BatchOptions) -> Result<Vec<Problem>, PipelineError> {
        let pattern = options
            .pattern
            .as_deref()
            .unwrap_or(&self.config.scheduler.problem_pattern);
        let problems = discovery::discover(&self.workspace, pattern)?;
        Ok(discovery::filter(problems, &options.include, &self.workspace))
    }

    /// Run every selected problem.
    pub async fn run(&self, options: &BatchOptions) -> Result<BatchReport, PipelineError> {
        let started_at = Utc::now();
        let pattern = options
            .pattern
            .as_deref()
            .unwrap_or(&self.config.scheduler.problem_pattern);
        let discovered = discovery::discover(&self.workspace, pattern)?;
        let discovered_count = discovered.len();
        let problem_files: Vec<PathBuf> = discovered.iter().map(|p| p.path.clone()).collect();
        let selected = discovery::filter(discovered, &options.include, &self.workspace);
        let workers = options
            .concurrency
            .unwrap_or(self.config.scheduler.max_concurrency)
            .max(1);
        info!(
            discovered = discovered_count,
            selected = selected.len(),
            workers,
            "Batch started"
        );

        let runner = Arc::new(PipelineRunner::new(PipelineContext {
            client: self.client.clone(),
            store: self.store.clone(),
            prompts: self.prompts.clone(),
            config: self.config.clone(),
            rerun: options.rerun,
            problem_files: Arc::new(problem_files),
        }));
        let outcomes = pool::run_pool(runner, selected, workers).await;

        let report = BatchReport {
            workspace: self.workspace.clone(),
            discovered: discovered_count,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            completed = report.completed(),
            failed = report.failed(),
            duration_ms = report.duration().num_milliseconds(),
            "Batch finished"
        );
        Ok(report)
    }
}
