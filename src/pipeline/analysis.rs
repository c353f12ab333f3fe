//! DataAnalysis stage
//!
//! Resolves the sub-problem's data files, asks for an analysis plan, profiles the tabular
//! files and asks the generation service for a written summary that follows the plan.
//! The stage never blocks the pipeline: every failure still yields a results artifact
//! that Draft can read, and a failed plan is replaced by a deterministic default.

use crate::error::PipelineError;
use crate::pipeline::prompts::{PromptLibrary, PromptVars, RenderedPrompt, DATA_PLAN};
use crate::pipeline::stage::{Stage, StageOutcome};
use crate::problem::{Decomposition, SubProblem};
use crate::provider::{GenerationClient, GenerationRequest};
use crate::resolve::index::IndexedFile;
use crate::resolve::{DataResolver, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolution summary artifact.
pub const RESOLUTION_SUMMARY: &str = "resolution_summary.md";
/// Per-file profiles as JSON.
pub const FILE_PROFILES: &str = "file_profiles.json";
/// Plan the summary follows.
pub const ANALYSIS_PLAN: &str = "analysis_plan.md";
/// System instruction of the planning call.
pub const PLAN_SYSTEM_PROMPT: &str = "plan_system_prompt.md";
/// User prompt of the planning call.
pub const PLAN_USER_PROMPT: &str = "plan_user_prompt.txt";

const MAX_PROFILED_ROWS: u64 = 100_000;
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Delimited,
    Other,
}

/// Shape of one resolved data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProfile {
    pub name: String,
    pub relative_path: PathBuf,
    pub size_bytes: u64,
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Row counting stopped at the profiling limit.
    #[serde(default)]
    pub row_count_truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileProfile {
    fn unprofiled(file: &IndexedFile, kind: FileKind) -> Self {
        Self {
            name: file.name.clone(),
            relative_path: file.relative_path.clone(),
            size_bytes: file.size_bytes,
            kind,
            columns: Vec::new(),
            row_count: None,
            row_count_truncated: false,
            sample_rows: Vec::new(),
            error: None,
        }
    }
}

/// Delimiter for a file, sniffing the first line of `.txt` files.
fn delimiter_for(path: &Path, name: &str) -> Option<u8> {
    let lower = name.to_lowercase();
    if lower.ends_with(".csv") {
        return Some(b',');
    }
    if lower.ends_with(".tsv") || lower.ends_with(".tab") {
        return Some(b'\t');
    }
    if !lower.ends_with(".txt") {
        return None;
    }
    let file = std::fs::File::open(path).ok()?;
    let mut first = String::new();
    BufReader::new(file).read_line(&mut first).ok()?;
    if first.contains('\t') {
        Some(b'\t')
    } else if first.contains(',') {
        Some(b',')
    } else {
        None
    }
}

/// Profile one file. Read errors are recorded on the profile rather than returned.
pub fn profile_file(file: &IndexedFile) -> FileProfile {
    let Some(delimiter) = delimiter_for(&file.path, &file.name) else {
        return FileProfile::unprofiled(file, FileKind::Other);
    };
    let mut profile = FileProfile::unprofiled(file, FileKind::Delimited);
    if let Err(e) = profile_delimited(&file.path, delimiter, &mut profile) {
        profile.error = Some(e.to_string());
    }
    profile
}

fn profile_delimited(
    path: &Path,
    delimiter: u8,
    profile: &mut FileProfile,
) -> Result<(), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_path(path)?;
    profile.columns = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = 0u64;
    for record in reader.records() {
        let record = record?;
        if profile.sample_rows.len() < SAMPLE_ROWS {
            profile
                .sample_rows
                .push(record.iter().map(str::to_string).collect());
        }
        rows += 1;
        if rows >= MAX_PROFILED_ROWS {
            profile.row_count_truncated = true;
            break;
        }
    }
    profile.row_count = Some(rows);
    Ok(())
}

/// Markdown rendering of profiles used in prompts and fallback summaries.
pub fn profiles_markdown(profiles: &[FileProfile]) -> String {
    if profiles.is_empty() {
        return "No data files.\n".to_string();
    }
    let mut out = String::new();
    for p in profiles {
        let _ = writeln!(
            out,
            "### {} ({}, {} bytes)",
            p.name,
            p.relative_path.display(),
            p.size_bytes
        );
        match (&p.error, p.kind) {
            (Some(error), _) => {
                let _ = writeln!(out, "- could not be read: {}", error);
            }
            (None, FileKind::Other) => {
                out.push_str("- not a delimited text file; contents not profiled\n");
            }
            (None, FileKind::Delimited) => {
                let _ = writeln!(out, "- columns ({}): {}", p.columns.len(), p.columns.join(", "));
                if let Some(rows) = p.row_count {
                    let suffix = if p.row_count_truncated { "+" } else { "" };
                    let _ = writeln!(out, "- rows: {}{}", rows, suffix);
                }
                for row in &p.sample_rows {
                    let _ = writeln!(out, "- sample: {}", row.join(" | "));
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Results written when the sub-problem declares no data requirement.
pub fn no_data_required(sub_problem: &SubProblem) -> String {
    format!(
        "# Data Analysis Results\n\nNo data required for sub-problem {} ({}).\n",
        sub_problem.id, sub_problem.title
    )
}

/// Deterministic results used when the summary could not be generated.
pub fn fallback_results(profiles: &[FileProfile], reason: &str) -> String {
    format!(
        "# Data Analysis Results\n\nAutomated summary unavailable: {}\n\n## File profiles\n\n{}",
        reason,
        profiles_markdown(profiles)
    )
}

/// Plan produced before the summary, with the prompt that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPlan {
    pub prompt: Option<RenderedPrompt>,
    pub text: String,
}

/// Plan used when the planner produced nothing usable: every file in resolution order.
pub fn default_plan(sub_problem: &SubProblem, files: &[IndexedFile]) -> String {
    let mut out = format!(
        "# Analysis Plan\n\nDefault sequential plan for {} ({}).\n\n",
        sub_problem.id, sub_problem.title
    );
    for (i, file) in files.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. Profile {} and relate its contents to the task.",
            i + 1,
            file.relative_path.display()
        );
    }
    out
}

fn file_list(files: &[IndexedFile]) -> String {
    files
        .iter()
        .map(|f| {
            format!(
                "- {} (path: {}, {} bytes)",
                f.name,
                f.relative_path.display(),
                f.size_bytes
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Artifacts the stage writes; `results` is the stage output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisArtifacts {
    pub resolution_summary: String,
    pub file_profiles: String,
    /// Absent when no file was resolved.
    pub plan: Option<AnalysisPlan>,
    pub results: String,
}

impl AnalysisArtifacts {
    fn without_plan(resolution_summary: String, file_profiles: String, results: String) -> Self {
        Self {
            resolution_summary,
            file_profiles,
            plan: None,
            results,
        }
    }
}

fn outcome(
    artifacts: AnalysisArtifacts,
    reasons: Vec<PipelineError>,
) -> StageOutcome<AnalysisArtifacts> {
    if reasons.is_empty() {
        StageOutcome::Succeeded(artifacts)
    } else {
        StageOutcome::Degraded {
            partial: artifacts,
            reasons,
        }
    }
}

/// Runs resolution, planning, profiling and summarization for one sub-problem.
pub struct DataAnalyzer {
    resolver: DataResolver,
    client: Arc<dyn GenerationClient>,
    prompts: Arc<PromptLibrary>,
    model: String,
    temperature: f32,
}

impl DataAnalyzer {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        prompts: Arc<PromptLibrary>,
        model: String,
        temperature: f32,
    ) -> Self {
        let resolver = DataResolver::new(
            client.clone(),
            prompts.clone(),
            model.clone(),
            temperature,
        );
        Self {
            resolver,
            client,
            prompts,
            model,
            temperature,
        }
    }

    /// Produce the stage artifacts. Never returns [`StageOutcome::Failed`].
    pub async fn analyze(
        &self,
        decomposition: &Decomposition,
        sub_problem: &SubProblem,
        data_dir: &Path,
        exclude: &[PathBuf],
    ) -> StageOutcome<AnalysisArtifacts> {
        if !sub_problem.data_flag {
            debug!(sub_problem = %sub_problem.id, "No data required");
            return StageOutcome::Succeeded(AnalysisArtifacts::without_plan(
                "# Data Resolution\n\nNo data required.\n".to_string(),
                "[]".to_string(),
                no_data_required(sub_problem),
            ));
        }

        let resolution = match self
            .resolver
            .resolve(decomposition, sub_problem, data_dir, exclude)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(sub_problem = %sub_problem.id, error = %e, "Data directory unusable");
                let reason = e.to_string();
                return StageOutcome::Degraded {
                    partial: AnalysisArtifacts::without_plan(
                        Resolution::inaccessible_summary(data_dir, &reason),
                        "[]".to_string(),
                        fallback_results(&[], &reason),
                    ),
                    reasons: vec![e],
                };
            }
        };
        let mut reasons: Vec<PipelineError> = resolution.degradation().into_iter().collect();
        let resolution_summary = resolution.summary();

        if resolution.files.is_empty() {
            return outcome(
                AnalysisArtifacts::without_plan(
                    resolution_summary,
                    "[]".to_string(),
                    "# Data Analysis Results\n\nNo local data files matched this \
sub-problem; the answer proceeds without data.\n"
                        .to_string(),
                ),
                reasons,
            );
        }

        let plan = match self.plan(decomposition, sub_problem, &resolution.files).await {
            Ok(plan) => plan,
            Err((prompt, e)) => {
                warn!(sub_problem = %sub_problem.id, error = %e, "Analysis planner failed, using default plan");
                reasons.push(e);
                AnalysisPlan {
                    prompt,
                    text: default_plan(sub_problem, &resolution.files),
                }
            }
        };

        let files = resolution.files.clone();
        let profiles = match tokio::task::spawn_blocking(move || {
            files.iter().map(profile_file).collect::<Vec<_>>()
        })
        .await
        {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(error = %e, "File profiling task failed");
                Vec::new()
            }
        };
        let file_profiles =
            serde_json::to_string_pretty(&profiles).unwrap_or_else(|_| "[]".to_string());

        let results = match self
            .summarize(sub_problem, &plan.text, &resolution_summary, &profiles)
            .await
        {
            Ok(summary) => format!("# Data Analysis Results\n\n{}\n", summary.trim()),
            Err(e) => {
                warn!(sub_problem = %sub_problem.id, error = %e, "Data summary unavailable");
                let results = fallback_results(&profiles, &e.to_string());
                reasons.push(e);
                results
            }
        };
        outcome(
            AnalysisArtifacts {
                resolution_summary,
                file_profiles,
                plan: Some(plan),
                results,
            },
            reasons,
        )
    }

    /// Ask for an analysis plan over the resolved files. On failure the rendered prompt
    /// (if any) is handed back so the caller can still trace it.
    async fn plan(
        &self,
        decomposition: &Decomposition,
        sub_problem: &SubProblem,
        files: &[IndexedFile],
    ) -> Result<AnalysisPlan, (Option<RenderedPrompt>, PipelineError)> {
        let vars = PromptVars::new()
            .set(
                "main_problem_definition",
                decomposition.main_problem_definition.as_str(),
            )
            .set("sub_problem.title", sub_problem.title.as_str())
            .set("sub_problem.description", sub_problem.description.as_str())
            .set(
                "sub_problem.suggested_approach",
                sub_problem.suggested_approach.as_str(),
            )
            .set("file_list", file_list(files));
        let prompt = self
            .prompts
            .render(DATA_PLAN, &vars)
            .map_err(|e| (None, e))?;
        let request = GenerationRequest::text(
            DATA_PLAN,
            prompt.system.as_str(),
            prompt.user.as_str(),
            self.model.as_str(),
            self.temperature,
        );
        let text = match self.client.generate(request).await {
            Ok(generation) => generation.text,
            Err(e) => return Err((Some(prompt), e.into())),
        };
        if text.trim().is_empty() {
            return Err((
                Some(prompt),
                PipelineError::Schema("analysis plan is empty".to_string()),
            ));
        }
        Ok(AnalysisPlan {
            prompt: Some(prompt),
            text: format!("# Analysis Plan\n\n{}\n", text.trim()),
        })
    }

    async fn summarize(
        &self,
        sub_problem: &SubProblem,
        plan: &str,
        resolution_summary: &str,
        profiles: &[FileProfile],
    ) -> Result<String, PipelineError> {
        let vars = PromptVars::new()
            .set("sub_problem.title", sub_problem.title.as_str())
            .set("sub_problem.description", sub_problem.description.as_str())
            .set("analysis_plan", plan)
            .set("resolution_summary", resolution_summary)
            .set("file_profiles", profiles_markdown(profiles));
        let prompt = self.prompts.render(Stage::DataAnalysis.as_str(), &vars)?;
        let request = GenerationRequest::text(
            Stage::DataAnalysis.as_str(),
            prompt.system,
            prompt.user,
            self.model.as_str(),
            self.temperature,
        );
        Ok(self.client.generate(request).await?.text)
    }
}
