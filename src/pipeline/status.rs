//! Problem status derived from stored artifacts.
//!
//! A stage with its output artifact is done; one with trace artifacts but no output was
//! interrupted and will run again on the next resume.

use crate::artifact::{deliverable_name, ArtifactKey, ArtifactStore, Scope, RUN_REPORT};
use crate::error::PipelineError;
use crate::pipeline::runner::{RunReport, SEARCH_UNAVAILABLE};
use crate::pipeline::stage::{Stage, StageState};
use crate::problem::Decomposition;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Stored state of one sub-problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubProblemStatus {
    pub id: String,
    pub stages: Vec<(Stage, StageState)>,
}

impl SubProblemStatus {
    pub fn completed(&self) -> bool {
        self.stages
            .iter()
            .all(|(_, state)| state.unblocks_successors())
    }
}

/// Stored state of one problem.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemStatus {
    pub problem_id: String,
    pub decompose: StageState,
    pub sub_problems: Vec<SubProblemStatus>,
    pub has_deliverable: bool,
    pub last_run: Option<RunReport>,
}

impl ProblemStatus {
    /// Completed sub-problem stages out of the total known.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.sub_problems.len() * Stage::SUB_PROBLEM_STAGES.len();
        let done = self
            .sub_problems
            .iter()
            .flat_map(|sp| sp.stages.iter())
            .filter(|(_, state)| state.unblocks_successors())
            .count();
        (done, total)
    }
}

/// Inspect the artifact store for `problem_id`.
pub fn inspect(store: &dyn ArtifactStore, problem_id: &str) -> Result<ProblemStatus, PipelineError> {
    let keys = store.list(problem_id)?;

    let decompose_key =
        ArtifactKey::problem(problem_id, Stage::Decompose, Stage::Decompose.output_artifact());
    let decomposition: Option<Decomposition> = if store.exists(&decompose_key)? {
        serde_json::from_str(&store.read(&decompose_key)?).ok()
    } else {
        None
    };
    let decompose = if decomposition.is_some() {
        StageState::Succeeded
    } else if keys.iter().any(|k| k.stage == Stage::Decompose) {
        StageState::FailedRecoverable
    } else {
        StageState::Pending
    };

    // Stage -> artifact names, per sub-problem.
    let mut present: BTreeMap<String, BTreeMap<Stage, BTreeSet<String>>> = BTreeMap::new();
    for key in &keys {
        if let Scope::SubProblem(id) = &key.scope {
            present
                .entry(id.clone())
                .or_default()
                .entry(key.stage)
                .or_default()
                .insert(key.name.clone());
        }
    }

    let ids: Vec<String> = match &decomposition {
        Some(d) => d.sub_problems.iter().map(|sp| sp.id.clone()).collect(),
        None => present.keys().cloned().collect(),
    };

    let mut sub_problems = Vec::with_capacity(ids.len());
    for id in ids {
        let stored = present.get(&id);
        let mut stages = Vec::with_capacity(Stage::SUB_PROBLEM_STAGES.len());
        for stage in Stage::SUB_PROBLEM_STAGES {
            let names = stored.and_then(|s| s.get(&stage));
            let state = match names {
                Some(names) if names.contains(stage.output_artifact()) => {
                    stored_state(store, problem_id, &id, stage)?
                }
                Some(_) => StageState::FailedRecoverable,
                None => StageState::Pending,
            };
            stages.push((stage, state));
        }
        sub_problems.push(SubProblemStatus { id, stages });
    }

    let has_deliverable = store
        .read_problem_file(problem_id, &deliverable_name(problem_id))?
        .is_some();
    let last_run = store
        .read_problem_file(problem_id, RUN_REPORT)?
        .and_then(|json| serde_json::from_str(&json).ok());

    Ok(ProblemStatus {
        problem_id: problem_id.to_string(),
        decompose,
        sub_problems,
        has_deliverable,
        last_run,
    })
}

fn stored_state(
    store: &dyn ArtifactStore,
    problem_id: &str,
    sub_problem: &str,
    stage: Stage,
) -> Result<StageState, PipelineError> {
    if stage != Stage::Search {
        return Ok(StageState::Succeeded);
    }
    let key = ArtifactKey::sub_problem(problem_id, sub_problem, stage, stage.output_artifact());
    if store.read(&key)?.starts_with(SEARCH_UNAVAILABLE) {
        Ok(StageState::Degraded)
    } else {
        Ok(StageState::Succeeded)
    }
}
