//! Configuration System
//!
//! One immutable [`SolventConfig`] value is built at startup and threaded through the
//! scheduler, the engines and the retry wrapper. Sources are layered with the `config`
//! crate: merge-policy defaults, the global user file, the workspace files and finally
//! `SOLVENT__SECTION__KEY` environment variables.

use crate::error::PipelineError;
use crate::logging::LoggingConfig;
use crate::pipeline::stage::Stage;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use crate::provider::{ProviderConfig, ProviderType, RetryPolicy};

mod merge;
mod sources;

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolventConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub decomposition: DecompositionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-stage model selection and sampling temperatures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub decompose: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub data_analysis: Option<String>,
    #[serde(default)]
    pub draft: Option<String>,
    #[serde(default)]
    pub critique: Option<String>,
    #[serde(default)]
    pub revise: Option<String>,
    #[serde(default)]
    pub final_review: Option<String>,
    #[serde(default)]
    pub assemble: Option<String>,

    /// Temperature for generative stages
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Temperature for Critique and FinalReview
    #[serde(default = "default_critique_temperature")]
    pub critique_temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_critique_temperature() -> f32 {
    0.3
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            decompose: None,
            search: None,
            data_analysis: None,
            draft: None,
            critique: None,
            revise: None,
            final_review: None,
            assemble: None,
            temperature: default_temperature(),
            critique_temperature: default_critique_temperature(),
        }
    }
}

impl ModelsConfig {
    fn override_for(&self, stage: Stage) -> Option<&String> {
        match stage {
            Stage::Decompose => self.decompose.as_ref(),
            Stage::Search => self.search.as_ref(),
            Stage::DataAnalysis => self.data_analysis.as_ref(),
            Stage::Draft => self.draft.as_ref(),
            Stage::Critique => self.critique.as_ref(),
            Stage::Revise => self.revise.as_ref(),
            Stage::FinalReview => self.final_review.as_ref(),
            Stage::Assemble => self.assemble.as_ref(),
        }
    }

    /// Model for a stage, falling back to the provider default.
    pub fn model_for(&self, stage: Stage, default_model: &str) -> String {
        self.override_for(stage)
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| default_model.to_string())
    }

    pub fn temperature_for(&self, stage: Stage) -> f32 {
        match stage {
            Stage::Critique | Stage::FinalReview => self.critique_temperature,
            _ => self.temperature,
        }
    }
}

/// Decomposition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Generation attempts when the structured output is rejected
    #[serde(default = "default_max_schema_attempts")]
    pub max_schema_attempts: u32,
}

fn default_max_schema_attempts() -> u32 {
    3
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            max_schema_attempts: default_max_schema_attempts(),
        }
    }
}

/// Batch scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Glob locating one problem text per problem, relative to the workspace
    #[serde(default = "default_problem_pattern")]
    pub problem_pattern: String,

    /// Problems executed concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Sub-problems of one problem executed concurrently
    #[serde(default = "default_sub_problem_concurrency")]
    pub sub_problem_concurrency: usize,
}

fn default_problem_pattern() -> String {
    "problems/*/problem.md".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_sub_problem_concurrency() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            problem_pattern: default_problem_pattern(),
            max_concurrency: default_max_concurrency(),
            sub_problem_concurrency: default_sub_problem_concurrency(),
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Artifact store root
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Directory with `<purpose>_system.md` / `<purpose>_user.md` prompt overrides
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            prompts_dir: None,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub section: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(section: &'static str, message: impl Into<String>) -> Self {
        Self {
            section,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.section, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl SolventConfig {
    /// Validate the entire configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.provider.default_model.trim().is_empty() {
            errors.push(ValidationError::new("provider", "default_model cannot be empty"));
        }
        if self.provider.provider_type == ProviderType::Custom && self.provider.base_url.is_none() {
            errors.push(ValidationError::new(
                "provider",
                "base_url is required for provider_type 'custom'",
            ));
        }

        for (name, value) in [
            ("temperature", self.models.temperature),
            ("critique_temperature", self.models.critique_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                errors.push(ValidationError::new(
                    "models",
                    format!("{} must be between 0.0 and 2.0, got {}", name, value),
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            errors.push(ValidationError::new("retry", "max_attempts must be at least 1"));
        }
        if self.retry.backoff_factor < 1.0 {
            errors.push(ValidationError::new("retry", "backoff_factor must be >= 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push(ValidationError::new(
                "retry",
                "base_delay_ms cannot exceed max_delay_ms",
            ));
        }
        if self.retry.attempt_timeout_secs == 0 {
            errors.push(ValidationError::new("retry", "attempt_timeout_secs must be positive"));
        }

        if self.decomposition.max_schema_attempts == 0 {
            errors.push(ValidationError::new(
                "decomposition",
                "max_schema_attempts must be at least 1",
            ));
        }

        if let Err(e) = glob::Pattern::new(&self.scheduler.problem_pattern) {
            errors.push(ValidationError::new(
                "scheduler",
                format!("invalid problem_pattern: {}", e),
            ));
        }
        if self.scheduler.max_concurrency == 0 {
            errors.push(ValidationError::new("scheduler", "max_concurrency must be at least 1"));
        }
        if self.scheduler.sub_problem_concurrency == 0 {
            errors.push(ValidationError::new(
                "scheduler",
                "sub_problem_concurrency must be at least 1",
            ));
        }

        if self.paths.output_root.as_os_str().is_empty() {
            errors.push(ValidationError::new("paths", "output_root cannot be empty"));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(ValidationError::new(
                "logging",
                format!("format must be 'text' or 'json', got '{}'", self.logging.format),
            ));
        }
        if !matches!(self.logging.output.as_str(), "stdout" | "stderr" | "file") {
            errors.push(ValidationError::new(
                "logging",
                format!(
                    "output must be 'stdout', 'stderr' or 'file', got '{}'",
                    self.logging.output
                ),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Make relative paths absolute against the workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.paths.output_root.is_relative() {
            self.paths.output_root = workspace_root.join(&self.paths.output_root);
        }
        if let Some(dir) = &self.paths.prompts_dir {
            if dir.is_relative() {
                self.paths.prompts_dir = Some(workspace_root.join(dir));
            }
        }
        if let Some(file) = &self.logging.file {
            if file.is_relative() {
                self.logging.file = Some(workspace_root.join(file));
            }
        }
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to render configuration: {}", e)))
    }
}

/// Builds [`SolventConfig`] from layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the global file, then workspace files, then the environment.
    pub fn load(workspace_root: &Path) -> Result<SolventConfig, PipelineError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        Self::finish(builder)
    }

    /// Defaults, then a single explicit file, then the environment.
    pub fn load_from_file(path: &Path) -> Result<SolventConfig, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::Config(format!(
                "Configuration file {:?} not found",
                path
            )));
        }
        let builder = merge::merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true));
        Self::finish(builder)
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<SolventConfig, PipelineError> {
        let config: Config = builder
            .add_source(
                Environment::with_prefix("SOLVENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
