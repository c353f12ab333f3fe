//! Artifact Store
//!
//! Per-problem, per-stage store of immutable named artifacts. Presence of a stage's
//! output artifact is what makes a re-run skip that stage.

pub mod key;
pub mod store;

pub use key::{ArtifactKey, Scope};
pub use store::{ArtifactStore, FsArtifactStore, WriteMode, WriteOutcome};

/// Trace artifact holding the system instruction of a stage call.
pub const SYSTEM_PROMPT: &str = "system_prompt.md";
/// Trace artifact holding the user prompt of a stage call.
pub const USER_PROMPT: &str = "user_prompt.txt";
/// Raw model output of a traced stage.
pub const OUTPUT: &str = "output.txt";
/// Assemble output combined with the final review and references.
pub const COMPOSED: &str = "composed.md";
/// Per-problem run report.
pub const RUN_REPORT: &str = "run_report.json";

/// Deterministic deliverable file name for a problem.
pub fn deliverable_name(problem: &str) -> String {
    format!("{}_answer.md", problem)
}
