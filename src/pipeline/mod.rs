//! Stage Pipeline
//!
//! Decompose runs once per problem; Search, DataAnalysis, Draft, Critique, Revise,
//! FinalReview and Assemble run once per sub-problem in dependency order.

pub mod analysis;
pub mod assemble;
pub mod prompts;
pub mod runner;
pub mod stage;
pub mod status;

pub use runner::{
    PipelineContext, PipelineRunner, RunReport, StageRecord, SubProblemReport, SEARCH_UNAVAILABLE,
};
pub use stage::{FailurePolicy, RerunPolicy, Stage, StageOutcome, StageState};
