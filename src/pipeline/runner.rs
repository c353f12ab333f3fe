//! Pipeline runner
//!
//! Drives one problem through Decompose and then every sub-problem through the remaining
//! stages. A stage whose output artifact already exists is skipped unless the rerun
//! policy forces it, which is what makes interrupted runs resumable. The output artifact
//! is always written last, after the stage's trace artifacts. A failing stage is handled
//! according to [`Stage::failure_policy`].

use crate::artifact::{
    deliverable_name, ArtifactKey, ArtifactStore, WriteMode, WriteOutcome, COMPOSED, RUN_REPORT,
    SYSTEM_PROMPT, USER_PROMPT,
};
use crate::config::SolventConfig;
use crate::decompose::DecompositionEngine;
use crate::error::{ErrorClass, GenerationError, PipelineError};
use crate::pipeline::analysis::{
    fallback_results, AnalysisArtifacts, DataAnalyzer, ANALYSIS_PLAN, FILE_PROFILES,
    PLAN_SYSTEM_PROMPT, PLAN_USER_PROMPT, RESOLUTION_SUMMARY,
};
use crate::pipeline::assemble;
use crate::pipeline::prompts::{PromptLibrary, PromptVars};
use crate::pipeline::stage::{FailurePolicy, RerunPolicy, Stage, StageOutcome, StageState};
use crate::problem::{Decomposition, Problem, ProblemLifecycle, SubProblem};
use crate::provider::{GenerationClient, GenerationRequest};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Opening of the placeholder persisted when Search cannot run.
pub const SEARCH_UNAVAILABLE: &str = "Search unavailable";

/// Shared handles every problem run needs.
#[derive(Clone)]
pub struct PipelineContext {
    pub client: Arc<dyn GenerationClient>,
    pub store: Arc<dyn ArtifactStore>,
    pub prompts: Arc<PromptLibrary>,
    pub config: Arc<SolventConfig>,
    pub rerun: RerunPolicy,
    /// Statement files of every discovered problem; never indexed as data.
    pub problem_files: Arc<Vec<PathBuf>>,
}

/// Terminal state of one stage in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageRecord {
    fn new(stage: Stage, state: StageState, detail: Option<String>) -> Self {
        Self {
            stage,
            state,
            detail,
        }
    }

    /// Executed in this run, as opposed to skipped or never reached.
    pub fn executed(&self) -> bool {
        matches!(
            self.state,
            StageState::Succeeded | StageState::Degraded | StageState::FailedFatal
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubProblemReport {
    pub id: String,
    pub title: String,
    pub stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubProblemReport {
    pub fn state_of(&self, stage: Stage) -> Option<StageState> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.state)
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self
                .state_of(Stage::Assemble)
                .map_or(false, StageState::unblocks_successors)
    }
}

/// Outcome of one problem run, persisted as `run_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub problem_id: String,
    pub lifecycle: ProblemLifecycle,
    pub decompose: StageRecord,
    pub sub_problems: Vec<SubProblemReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable_blake3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn started(problem: &Problem) -> Self {
        let now = Utc::now();
        Self {
            problem_id: problem.id.clone(),
            lifecycle: ProblemLifecycle::Running,
            decompose: StageRecord::new(Stage::Decompose, StageState::Pending, None),
            sub_problems: Vec::new(),
            deliverable: None,
            deliverable_blake3: None,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Report for a problem whose run ended without producing one of its own.
    pub(crate) fn aborted(problem_id: &str, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            problem_id: problem_id.to_string(),
            lifecycle: ProblemLifecycle::Failed,
            decompose: StageRecord::new(Stage::Decompose, StageState::Pending, None),
            sub_problems: Vec::new(),
            deliverable: None,
            deliverable_blake3: None,
            error: Some(reason.into()),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.lifecycle == ProblemLifecycle::Completed
    }

    /// Number of stages (Decompose included) that actually executed in this run.
    pub fn executed_stages(&self) -> usize {
        let sub: usize = self
            .sub_problems
            .iter()
            .map(|sp| sp.stages.iter().filter(|r| r.executed()).count())
            .sum();
        sub + usize::from(self.decompose.executed())
    }
}

/// Per-sub-problem bookkeeping while its stages execute.
struct SubProblemRun<'a> {
    problem: &'a Problem,
    decomposition: &'a Decomposition,
    sub_problem: &'a SubProblem,
    states: BTreeMap<Stage, StageState>,
    records: Vec<StageRecord>,
}

impl<'a> SubProblemRun<'a> {
    fn new(
        problem: &'a Problem,
        decomposition: &'a Decomposition,
        sub_problem: &'a SubProblem,
        decompose_state: StageState,
    ) -> Self {
        let mut states = BTreeMap::new();
        states.insert(Stage::Decompose, decompose_state);
        Self {
            problem,
            decomposition,
            sub_problem,
            states,
            records: Vec::new(),
        }
    }

    fn key(&self, stage: Stage, name: &str) -> ArtifactKey {
        ArtifactKey::sub_problem(&self.problem.id, &self.sub_problem.id, stage, name)
    }

    fn ensure_ready(&self, stage: Stage) -> Result<(), PipelineError> {
        for pred in stage.predecessors() {
            let state = self.states.get(pred).copied().unwrap_or(StageState::Pending);
            if !state.unblocks_successors() {
                return Err(PipelineError::stage_fatal(
                    stage,
                    format!("predecessor {} is {}", pred, state),
                ));
            }
        }
        Ok(())
    }

    fn start(&mut self, stage: Stage) {
        debug!(
            problem = %self.problem.id,
            sub_problem = %self.sub_problem.id,
            stage = %stage,
            "Stage running"
        );
        self.states.insert(stage, StageState::Running);
    }

    fn record(&mut self, stage: Stage, state: StageState, detail: Option<String>) {
        debug!(
            problem = %self.problem.id,
            sub_problem = %self.sub_problem.id,
            stage = %stage,
            state = %state,
            "Stage finished"
        );
        self.states.insert(stage, state);
        self.records.push(StageRecord::new(stage, state, detail));
    }

    /// Record a fatal failure and wrap it for the caller.
    fn fail(&mut self, stage: Stage, err: PipelineError) -> PipelineError {
        let err = match err {
            e @ PipelineError::StageFatal { .. } => e,
            other => PipelineError::stage_fatal(stage, other),
        };
        self.record(stage, StageState::FailedFatal, Some(err.to_string()));
        err
    }

    fn base_vars(&self) -> PromptVars {
        PromptVars::new()
            .set(
                "original_problem_text",
                self.decomposition.original_problem_text.as_str(),
            )
            .set(
                "main_problem_definition",
                self.decomposition.main_problem_definition.as_str(),
            )
            .set("sub_problem.title", self.sub_problem.title.as_str())
            .set("sub_problem.description", self.sub_problem.description.as_str())
            .set(
                "sub_problem.suggested_approach",
                self.sub_problem.suggested_approach.as_str(),
            )
    }

    fn into_report(self, error: Option<String>) -> SubProblemReport {
        let mut stages = self.records;
        for stage in Stage::SUB_PROBLEM_STAGES {
            if !stages.iter().any(|r| r.stage == stage) {
                stages.push(StageRecord::new(stage, StageState::Pending, None));
            }
        }
        SubProblemReport {
            id: self.sub_problem.id.clone(),
            title: self.sub_problem.title.clone(),
            stages,
            error,
        }
    }
}

/// Runs problems through the stage pipeline.
pub struct PipelineRunner {
    ctx: PipelineContext,
    decomposer: DecompositionEngine,
    analyzer: DataAnalyzer,
}

impl PipelineRunner {
    pub fn new(ctx: PipelineContext) -> Self {
        let config = &ctx.config;
        let default_model = config.provider.default_model.as_str();
        let decomposer = DecompositionEngine::new(
            ctx.client.clone(),
            ctx.prompts.clone(),
            config.models.model_for(Stage::Decompose, default_model),
            config.models.temperature_for(Stage::Decompose),
            config.decomposition.max_schema_attempts,
        );
        let analyzer = DataAnalyzer::new(
            ctx.client.clone(),
            ctx.prompts.clone(),
            config.models.model_for(Stage::DataAnalysis, default_model),
            config.models.temperature_for(Stage::DataAnalysis),
        );
        Self {
            ctx,
            decomposer,
            analyzer,
        }
    }

    /// Run one problem to completion or failure. Never panics on stage errors; the
    /// returned report carries every stage's terminal state.
    pub async fn run(&self, problem: &Problem) -> RunReport {
        let mut report = RunReport::started(problem);
        info!(problem = %problem.id, rerun = ?self.ctx.rerun, "Problem run started");

        match self.decompose(problem).await {
            Ok((decomposition, state)) => {
                report.decompose = StageRecord::new(Stage::Decompose, state, None);
                self.run_sub_problems(problem, &decomposition, state, &mut report)
                    .await;
            }
            Err(e) => {
                error!(problem = %problem.id, error = %e, "Decomposition failed");
                report.decompose =
                    StageRecord::new(Stage::Decompose, StageState::FailedFatal, Some(e.to_string()));
                report.lifecycle = ProblemLifecycle::Failed;
                report.error = Some(e.to_string());
            }
        }

        report.finished_at = Utc::now();
        self.write_report(&report);
        info!(
            problem = %problem.id,
            lifecycle = %report.lifecycle,
            executed_stages = report.executed_stages(),
            "Problem run finished"
        );
        report
    }

    async fn run_sub_problems(
        &self,
        problem: &Problem,
        decomposition: &Decomposition,
        decompose_state: StageState,
        report: &mut RunReport,
    ) {
        let concurrency = self.ctx.config.scheduler.sub_problem_concurrency.max(1);
        let runs: Vec<_> = decomposition
            .sub_problems
            .iter()
            .map(|sp| self.run_sub_problem(problem, decomposition, sp, decompose_state))
            .collect();
        report.sub_problems = stream::iter(runs).buffered(concurrency).collect().await;

        let failed = report
            .sub_problems
            .iter()
            .filter(|sp| !sp.succeeded())
            .count();
        if failed > 0 {
            report.lifecycle = ProblemLifecycle::Failed;
            report.error = Some(format!(
                "{} of {} sub-problems failed",
                failed,
                report.sub_problems.len()
            ));
            return;
        }

        match self.write_deliverable(problem, decomposition) {
            Ok((path, digest)) => {
                report.deliverable = Some(path);
                report.deliverable_blake3 = Some(digest);
                report.lifecycle = ProblemLifecycle::Completed;
            }
            Err(e) => {
                error!(problem = %problem.id, error = %e, "Failed to write deliverable");
                report.lifecycle = ProblemLifecycle::Failed;
                report.error = Some(e.to_string());
            }
        }
    }

    async fn run_sub_problem(
        &self,
        problem: &Problem,
        decomposition: &Decomposition,
        sub_problem: &SubProblem,
        decompose_state: StageState,
    ) -> SubProblemReport {
        let mut run = SubProblemRun::new(problem, decomposition, sub_problem, decompose_state);
        match self.drive(&mut run).await {
            Ok(()) => run.into_report(None),
            Err(e) => {
                error!(
                    problem = %problem.id,
                    sub_problem = %sub_problem.id,
                    error = %e,
                    "Sub-problem terminated"
                );
                run.into_report(Some(e.to_string()))
            }
        }
    }

    async fn drive(&self, run: &mut SubProblemRun<'_>) -> Result<(), PipelineError> {
        let vars = run.base_vars();
        let search = self.step(run, Stage::Search, vars).await?;
        let analysis = self.data_analysis(run).await?;

        let vars = run
            .base_vars()
            .set("search_report", search.as_str())
            .set("data_analysis_results", analysis.as_str());
        let draft = self.step(run, Stage::Draft, vars).await?;

        let vars = run.base_vars().set("draft_report", draft.as_str());
        let critique = self.step(run, Stage::Critique, vars).await?;

        let vars = run
            .base_vars()
            .set("draft_report", draft.as_str())
            .set("critique", critique.as_str())
            .set("data_analysis_results", analysis.as_str());
        let revised = self.step(run, Stage::Revise, vars).await?;

        let vars = run.base_vars().set("revised_report", revised.as_str());
        let final_review = self.step(run, Stage::FinalReview, vars).await?;

        let references = if search.starts_with(SEARCH_UNAVAILABLE) {
            Vec::new()
        } else {
            assemble::extract_references(&search)
        };
        let vars = run
            .base_vars()
            .set("revised_report", revised.as_str())
            .set("references", assemble::references_prompt(&references));
        let raw = self.step(run, Stage::Assemble, vars).await?;

        // Derived from stored outputs, so it is rebuilt on every pass.
        let composed = assemble::compose(&raw, &final_review, &references);
        self.ctx
            .store
            .write(&run.key(Stage::Assemble, COMPOSED), &composed, WriteMode::Overwrite)
            .map_err(|e| run.fail(Stage::Assemble, e.into()))?;
        Ok(())
    }

    fn write_mode(&self, stage: Stage) -> WriteMode {
        if self.ctx.rerun.forces(stage) {
            WriteMode::Overwrite
        } else {
            WriteMode::Create
        }
    }

    /// Existing output of a stage that does not have to run again.
    fn reuse(&self, key: &ArtifactKey, stage: Stage) -> Result<Option<String>, PipelineError> {
        if self.ctx.rerun.forces(stage) || !self.ctx.store.exists(key)? {
            return Ok(None);
        }
        Ok(Some(self.ctx.store.read(key)?))
    }

    /// Write an output artifact, returning whatever the store holds afterwards.
    fn commit(&self, key: &ArtifactKey, content: String, stage: Stage) -> Result<String, PipelineError> {
        match self.ctx.store.write(key, &content, self.write_mode(stage))? {
            WriteOutcome::Written => Ok(content),
            WriteOutcome::Skipped => Ok(self.ctx.store.read(key)?),
        }
    }

    async fn decompose(&self, problem: &Problem) -> Result<(Decomposition, StageState), PipelineError> {
        let stage = Stage::Decompose;
        let key = ArtifactKey::problem(&problem.id, stage, stage.output_artifact());
        let mut corrupt = false;
        if let Some(existing) = self.reuse(&key, stage)? {
            match serde_json::from_str::<Decomposition>(&existing) {
                Ok(decomposition) => {
                    debug!(problem = %problem.id, "Reusing stored decomposition");
                    return Ok((decomposition, StageState::Skipped));
                }
                Err(e) => {
                    warn!(problem = %problem.id, error = %e, "Stored decomposition unreadable, decomposing again");
                    corrupt = true;
                }
            }
        }

        let decomposition = self.decomposer.decompose(problem).await?;
        let json = serde_json::to_string_pretty(&decomposition)
            .map_err(|e| PipelineError::Schema(e.to_string()))?;
        let mode = if corrupt {
            WriteMode::Overwrite
        } else {
            self.write_mode(stage)
        };
        self.ctx.store.write(&key, &json, mode)?;
        Ok((decomposition, StageState::Succeeded))
    }

    /// Render, trace, call and commit one traced stage. The raw reply is the output.
    async fn traced(
        &self,
        run: &mut SubProblemRun<'_>,
        stage: Stage,
        vars: PromptVars,
    ) -> Result<String, PipelineError> {
        run.ensure_ready(stage)?;
        let output_key = run.key(stage, stage.output_artifact());
        if let Some(existing) = self.reuse(&output_key, stage)? {
            run.record(stage, StageState::Skipped, None);
            return Ok(existing);
        }

        run.start(stage);
        let prompt = self.ctx.prompts.render(stage.as_str(), &vars)?;
        if stage.is_traced() {
            let store = &self.ctx.store;
            store.write(&run.key(stage, SYSTEM_PROMPT), &prompt.system, WriteMode::Overwrite)?;
            store.write(&run.key(stage, USER_PROMPT), &prompt.user, WriteMode::Overwrite)?;
        }

        let models = &self.ctx.config.models;
        let request = GenerationRequest::text(
            stage.as_str(),
            prompt.system,
            prompt.user,
            models.model_for(stage, &self.ctx.config.provider.default_model),
            models.temperature_for(stage),
        );
        let generation = self.ctx.client.generate(request).await?;
        let text = self.commit(&output_key, generation.text, stage)?;
        run.record(stage, StageState::Succeeded, None);
        Ok(text)
    }

    /// Run a traced stage and apply its failure policy.
    async fn step(
        &self,
        run: &mut SubProblemRun<'_>,
        stage: Stage,
        vars: PromptVars,
    ) -> Result<String, PipelineError> {
        let err = match self.traced(run, stage, vars).await {
            Ok(text) => return Ok(text),
            Err(err) => err,
        };
        match (stage.failure_policy(), err) {
            (FailurePolicy::Degrade, PipelineError::Remote(e)) => {
                warn!(
                    problem = %run.problem.id,
                    sub_problem = %run.sub_problem.id,
                    stage = %stage,
                    error = %e,
                    "Stage failed, continuing with placeholder output"
                );
                let text = self
                    .commit(&run.key(stage, stage.output_artifact()), placeholder(stage, &e), stage)
                    .map_err(|err| run.fail(stage, err))?;
                run.record(stage, StageState::Degraded, Some(e.to_string()));
                Ok(text)
            }
            (_, err) => Err(run.fail(stage, err)),
        }
    }

    async fn data_analysis(&self, run: &mut SubProblemRun<'_>) -> Result<String, PipelineError> {
        let stage = Stage::DataAnalysis;
        run.ensure_ready(stage).map_err(|e| run.fail(stage, e))?;
        let results_key = run.key(stage, stage.output_artifact());
        if let Some(existing) = self.reuse(&results_key, stage)? {
            run.record(stage, StageState::Skipped, None);
            return Ok(existing);
        }

        run.start(stage);
        let mut exclude = vec![
            run.problem.path.clone(),
            self.ctx.config.paths.output_root.clone(),
        ];
        exclude.extend(self.ctx.problem_files.iter().cloned());
        let outcome = self
            .analyzer
            .analyze(run.decomposition, run.sub_problem, &run.problem.data_dir, &exclude)
            .await;
        let (artifacts, state, detail) = match outcome {
            StageOutcome::Succeeded(artifacts) => (artifacts, StageState::Succeeded, None),
            StageOutcome::Degraded { partial, reasons } => {
                let detail = reasons
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                (partial, StageState::Degraded, Some(detail))
            }
            StageOutcome::Failed(reason) => {
                let artifacts = AnalysisArtifacts {
                    resolution_summary: String::new(),
                    file_profiles: "[]".to_string(),
                    plan: None,
                    results: fallback_results(&[], &reason.to_string()),
                };
                (artifacts, StageState::Degraded, Some(reason.to_string()))
            }
        };

        self.write_analysis_traces(run, &artifacts)
            .map_err(|e| run.fail(stage, e))?;
        let results = self
            .commit(&results_key, artifacts.results, stage)
            .map_err(|e| run.fail(stage, e))?;
        run.record(stage, state, detail);
        Ok(results)
    }

    fn write_analysis_traces(
        &self,
        run: &SubProblemRun<'_>,
        artifacts: &AnalysisArtifacts,
    ) -> Result<(), PipelineError> {
        let stage = Stage::DataAnalysis;
        let store = &self.ctx.store;
        let write = |name: &str, content: &str| {
            store.write(&run.key(stage, name), content, WriteMode::Overwrite)
        };
        write(RESOLUTION_SUMMARY, &artifacts.resolution_summary)?;
        write(FILE_PROFILES, &artifacts.file_profiles)?;
        if let Some(plan) = &artifacts.plan {
            if let Some(prompt) = &plan.prompt {
                write(PLAN_SYSTEM_PROMPT, &prompt.system)?;
                write(PLAN_USER_PROMPT, &prompt.user)?;
            }
            write(ANALYSIS_PLAN, &plan.text)?;
        }
        Ok(())
    }

    /// Concatenate the composed Assemble outputs into the problem deliverable.
    fn write_deliverable(
        &self,
        problem: &Problem,
        decomposition: &Decomposition,
    ) -> Result<(PathBuf, String), PipelineError> {
        let mut sections = Vec::with_capacity(decomposition.sub_problems.len());
        for sp in &decomposition.sub_problems {
            let key = ArtifactKey::sub_problem(&problem.id, &sp.id, Stage::Assemble, COMPOSED);
            sections.push(self.ctx.store.read(&key)?);
        }
        let content = if sections.len() == 1 {
            sections.remove(0)
        } else {
            sections
                .iter()
                .map(|s| s.trim_end())
                .collect::<Vec<_>>()
                .join("\n\n---\n\n")
                + "\n"
        };
        let path = self.ctx.store.write_problem_file(
            &problem.id,
            &deliverable_name(&problem.id),
            &content,
        )?;
        let digest = blake3::hash(content.as_bytes()).to_hex().to_string();
        info!(problem = %problem.id, path = %path.display(), "Deliverable written");
        Ok((path, digest))
    }

    fn write_report(&self, report: &RunReport) {
        let result = serde_json::to_string_pretty(report)
            .map_err(|e| PipelineError::Schema(e.to_string()))
            .and_then(|json| {
                self.ctx
                    .store
                    .write_problem_file(&report.problem_id, RUN_REPORT, &json)
                    .map_err(PipelineError::from)
            });
        if let Err(e) = result {
            warn!(problem = %report.problem_id, error = %e, "Failed to write run report");
        }
    }
}

/// Output persisted for a degradable stage whose call failed.
fn placeholder(stage: Stage, error: &GenerationError) -> String {
    let reason = match error.class() {
        ErrorClass::RateLimited => "rate limited",
        ErrorClass::Transient => "transient service failure",
        ErrorClass::Fatal => "service refused the request",
    };
    match stage {
        Stage::Search => format!(
            "{} ({}). No external sources were consulted for this sub-problem.\n",
            SEARCH_UNAVAILABLE, reason
        ),
        other => format!("{} unavailable ({}).\n", other, reason),
    }
}
