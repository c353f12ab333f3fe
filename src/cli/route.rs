//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::artifact::FsArtifactStore;
use crate::config::{ConfigLoader, SolventConfig};
use crate::error::PipelineError;
use crate::pipeline::status::inspect;
use crate::pipeline::RerunPolicy;
use crate::problem::Problem;
use crate::provider::build_client;
use crate::scheduler::{discovery, BatchOptions, BatchScheduler};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::cli::parse::Commands;
use crate::cli::presentation::{format_batch_report, format_discovered, format_status};

/// Runtime context for CLI execution: workspace and validated configuration.
/// Built from workspace path and optional config path using ConfigLoader only.
pub struct RunContext {
    workspace_root: PathBuf,
    config: SolventConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let mut config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        config.resolve_paths(&workspace_root);

        if let Err(errors) = config.validate() {
            let message = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::Config(message));
        }
        debug!(
            workspace = %workspace_root.display(),
            output_root = %config.paths.output_root.display(),
            "Configuration loaded"
        );

        Ok(Self {
            workspace_root,
            config,
        })
    }

    pub fn config(&self) -> &SolventConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, PipelineError> {
        match command {
            Commands::Run {
                pattern,
                include,
                concurrency,
                force,
                from_stage,
                offline,
                format,
            } => {
                let rerun = match (force, from_stage) {
                    (true, _) => RerunPolicy::Force,
                    (false, Some(stage)) => RerunPolicy::From(*stage),
                    (false, None) => RerunPolicy::Resume,
                };
                let options = BatchOptions {
                    pattern: pattern.clone(),
                    include: include.clone(),
                    concurrency: *concurrency,
                    rerun,
                };
                self.handle_run(&options, *offline, format)
            }
            Commands::Discover {
                pattern,
                include,
                format,
            } => {
                let problems = self.select(pattern.as_deref(), include)?;
                format_discovered(&problems, format)
            }
            Commands::Status {
                pattern,
                include,
                format,
            } => {
                let problems = self.select(pattern.as_deref(), include)?;
                let store = FsArtifactStore::new(&self.config.paths.output_root)?;
                let statuses = problems
                    .iter()
                    .map(|p| inspect(&store, &p.id))
                    .collect::<Result<Vec<_>, _>>()?;
                format_status(&statuses, format)
            }
            Commands::Config => self.config.to_toml(),
        }
    }

    fn handle_run(
        &self,
        options: &BatchOptions,
        offline: bool,
        format: &str,
    ) -> Result<String, PipelineError> {
        let client = build_client(&self.config.provider, &self.config.retry, offline)?;
        let scheduler = BatchScheduler::new(&self.workspace_root, self.config.clone(), client)?;
        info!(offline, rerun = ?options.rerun, "Starting run");

        let rt = tokio::runtime::Runtime::new().map_err(|e| {
            PipelineError::Config(format!("Failed to create async runtime: {}", e))
        })?;
        let report = rt.block_on(scheduler.run(options))?;
        format_batch_report(&report, format)
    }

    fn select(&self, pattern: Option<&str>, include: &[String]) -> Result<Vec<Problem>, PipelineError> {
        let pattern = pattern.unwrap_or(&self.config.scheduler.problem_pattern);
        let problems = discovery::discover(&self.workspace_root, pattern)?;
        Ok(discovery::filter(problems, include, &self.workspace_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let problem_dir = dir.path().join("problems").join("01_demo");
        fs::create_dir_all(&problem_dir).unwrap();
        fs::write(problem_dir.join("problem.md"), "How many moons does Mars have?").unwrap();
        dir
    }

    #[test]
    fn test_discover_and_status_without_runs() {
        let dir = workspace();
        let ctx = RunContext::new(dir.path().to_path_buf(), None).unwrap();

        let listing = ctx
            .execute(&Commands::Discover {
                pattern: None,
                include: Vec::new(),
                format: "text".into(),
            })
            .unwrap();
        assert!(listing.contains("01_demo"));

        let status = ctx
            .execute(&Commands::Status {
                pattern: None,
                include: Vec::new(),
                format: "json".into(),
            })
            .unwrap();
        assert!(status.contains("\"problem_id\": \"01_demo\""));
    }

    #[test]
    fn test_offline_run_writes_deliverable() {
        let dir = workspace();
        let ctx = RunContext::new(dir.path().to_path_buf(), None).unwrap();
        let output = ctx
            .execute(&Commands::Run {
                pattern: None,
                include: Vec::new(),
                concurrency: None,
                force: false,
                from_stage: None,
                offline: true,
                format: "json".into(),
            })
            .unwrap();
        assert!(output.contains("\"discovered\": 1"));
        assert!(dir
            .path()
            .join("outputs")
            .join("01_demo")
            .join("01_demo_answer.md")
            .exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = workspace();
        let cfg = dir.path().join("bad.toml");
        fs::write(&cfg, "[scheduler]\nmax_concurrency = 0\n").unwrap();
        let err = RunContext::new(dir.path().to_path_buf(), Some(cfg)).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
