//! Artifact keys
//!
//! An artifact is addressed by the problem it belongs to, the sub-problem scope, the
//! stage that produced it and a file name. Every segment becomes a path component, so
//! keys are validated before they reach the filesystem.

use crate::error::StorageError;
use crate::pipeline::stage::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which unit of work an artifact belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Problem-wide artifacts (decomposition).
    Problem,
    /// Artifacts of one sub-problem.
    SubProblem(String),
}

/// Address of one immutable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub problem: String,
    pub scope: Scope,
    pub stage: Stage,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(problem: &str, scope: Scope, stage: Stage, name: &str) -> Self {
        Self {
            problem: problem.to_string(),
            scope,
            stage,
            name: name.to_string(),
        }
    }

    /// Key of a problem-wide artifact.
    pub fn problem(problem: &str, stage: Stage, name: &str) -> Self {
        Self::new(problem, Scope::Problem, stage, name)
    }

    /// Key of a sub-problem artifact.
    pub fn sub_problem(problem: &str, sub_problem: &str, stage: Stage, name: &str) -> Self {
        Self::new(problem, Scope::SubProblem(sub_problem.to_string()), stage, name)
    }

    /// Relative path `<problem>/<NN_stage>/[<sub>/]<name>`.
    pub fn relative_path(&self) -> Result<PathBuf, StorageError> {
        validate_segment(&self.problem)?;
        validate_segment(&self.name)?;
        let mut path = PathBuf::from(&self.problem).join(self.stage.dir_name());
        if let Scope::SubProblem(id) = &self.scope {
            validate_segment(id)?;
            path.push(id);
        }
        path.push(&self.name);
        Ok(path)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Problem => write!(f, "{}/{}/{}", self.problem, self.stage, self.name),
            Scope::SubProblem(id) => {
                write!(f, "{}/{}/{}/{}", self.problem, id, self.stage, self.name)
            }
        }
    }
}

/// Reject anything that is not a single, plain path component.
pub fn validate_segment(segment: &str) -> Result<(), StorageError> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.starts_with('.')
        || segment
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
    if invalid {
        return Err(StorageError::InvalidKey(format!(
            "'{}' is not a valid path segment",
            segment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_problem_path_layout() {
        let key = ArtifactKey::sub_problem("01_demo", "SUB_02", Stage::Draft, "output.txt");
        assert_eq!(
            key.relative_path().unwrap(),
            PathBuf::from("01_demo/04_draft/SUB_02/output.txt")
        );
    }

    #[test]
    fn problem_scope_has_no_sub_directory() {
        let key = ArtifactKey::problem("01_demo", Stage::Decompose, "decomposition.json");
        assert_eq!(
            key.relative_path().unwrap(),
            PathBuf::from("01_demo/01_decompose/decomposition.json")
        );
        assert_eq!(key.scope, Scope::Problem);
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let key = ArtifactKey::sub_problem("01_demo", "../x", Stage::Draft, "output.txt");
        assert!(matches!(key.relative_path(), Err(StorageError::InvalidKey(_))));
        assert!(validate_segment("..").is_err());
        assert!(validate_segment(".hidden").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("").is_err());
    }

    #[test]
    fn display_names_scope_before_stage() {
        let key = ArtifactKey::sub_problem("p", "SUB_01", Stage::Draft, "system_prompt.md");
        assert_eq!(key.to_string(), "p/SUB_01/draft/system_prompt.md");
    }
}
