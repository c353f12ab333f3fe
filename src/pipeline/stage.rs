//! Pipeline stages, their dependency table and per-stage state.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered steps of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decompose,
    Search,
    DataAnalysis,
    Draft,
    Critique,
    Revise,
    FinalReview,
    Assemble,
}

/// What happens when a stage cannot produce its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Aborts the whole problem run.
    FatalForProblem,
    /// Terminates the owning sub-problem only.
    FatalForSubProblem,
    /// Writes placeholder or partial content and lets the pipeline continue.
    Degrade,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Decompose,
        Stage::Search,
        Stage::DataAnalysis,
        Stage::Draft,
        Stage::Critique,
        Stage::Revise,
        Stage::FinalReview,
        Stage::Assemble,
    ];

    /// Stages executed once per sub-problem, in execution order.
    pub const SUB_PROBLEM_STAGES: [Stage; 7] = [
        Stage::Search,
        Stage::DataAnalysis,
        Stage::Draft,
        Stage::Critique,
        Stage::Revise,
        Stage::FinalReview,
        Stage::Assemble,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Decompose => "decompose",
            Stage::Search => "search",
            Stage::DataAnalysis => "data_analysis",
            Stage::Draft => "draft",
            Stage::Critique => "critique",
            Stage::Revise => "revise",
            Stage::FinalReview => "final_review",
            Stage::Assemble => "assemble",
        }
    }

    /// Position in the pipeline, starting at 1.
    pub fn ordinal(self) -> usize {
        self as usize + 1
    }

    /// Directory name used by the artifact store (`03_data_analysis`).
    pub fn dir_name(self) -> String {
        format!("{:02}_{}", self.ordinal(), self.as_str())
    }

    /// Declared predecessors; a stage starts only once all of them are terminal.
    pub fn predecessors(self) -> &'static [Stage] {
        match self {
            Stage::Decompose => &[],
            Stage::Search => &[Stage::Decompose],
            Stage::DataAnalysis => &[Stage::Decompose],
            Stage::Draft => &[Stage::Search, Stage::DataAnalysis],
            Stage::Critique => &[Stage::Draft],
            Stage::Revise => &[Stage::Draft, Stage::Critique, Stage::DataAnalysis],
            Stage::FinalReview => &[Stage::Revise],
            Stage::Assemble => &[
                Stage::Decompose,
                Stage::Search,
                Stage::Revise,
                Stage::FinalReview,
            ],
        }
    }

    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            Stage::Decompose => FailurePolicy::FatalForProblem,
            Stage::Search | Stage::DataAnalysis => FailurePolicy::Degrade,
            _ => FailurePolicy::FatalForSubProblem,
        }
    }

    /// Name of the artifact whose presence marks the stage as done.
    pub fn output_artifact(self) -> &'static str {
        match self {
            Stage::Decompose => "decomposition.json",
            Stage::DataAnalysis => "data_analysis_results.md",
            _ => "output.txt",
        }
    }

    /// Stages that persist system prompt, user prompt and raw output.
    pub fn is_traced(self) -> bool {
        !matches!(self, Stage::Decompose | Stage::DataAnalysis)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| PipelineError::Config(format!("Unknown stage: {}", s)))
    }
}

/// Execution state of one stage for one sub-problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    /// Output already present in the artifact store; treated as succeeded.
    Skipped,
    /// Completed with placeholder or partial content.
    Degraded,
    FailedRecoverable,
    FailedFatal,
}

impl StageState {
    /// Terminal states that let successors start.
    pub fn unblocks_successors(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Skipped | StageState::Degraded
        )
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::Skipped => "skipped",
            StageState::Degraded => "degraded",
            StageState::FailedRecoverable => "failed-recoverable",
            StageState::FailedFatal => "failed-fatal",
        };
        f.write_str(label)
    }
}

/// Result of executing one stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Succeeded(T),
    /// Usable but incomplete output; `reasons` is never empty.
    Degraded {
        partial: T,
        reasons: Vec<PipelineError>,
    },
    Failed(PipelineError),
}

/// Which stages are re-executed even when their artifacts exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerunPolicy {
    /// Skip every stage whose output artifact already exists.
    #[default]
    Resume,
    /// Re-execute every stage.
    Force,
    /// Re-execute the given stage and every stage that depends on it, directly or
    /// through other predecessors.
    From(Stage),
}

impl RerunPolicy {
    pub fn forces(self, stage: Stage) -> bool {
        match self {
            RerunPolicy::Resume => false,
            RerunPolicy::Force => true,
            RerunPolicy::From(start) => {
                stage == start || stage.predecessors().iter().any(|pred| self.forces(*pred))
            }
        }
    }
}
