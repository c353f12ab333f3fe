//! Data Resolution Engine
//!
//! Decides which local data files are relevant to a sub-problem by combining a semantic
//! extraction (the generation service reads the text) with a deterministic pattern scan.
//! Every candidate is cross-checked against the directory index, so the result is always
//! a subset of what exists on disk. Only an unreadable data directory is an error.

pub mod extract;
pub mod index;

use crate::error::PipelineError;
use crate::pipeline::prompts::{PromptLibrary, PromptVars, DATA_EXTRACTION};
use crate::problem::{Decomposition, SubProblem};
use crate::provider::{GenerationClient, GenerationRequest};
use index::{fold, DataIndex, IndexedFile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of resolving one sub-problem's data requirement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub data_dir: PathBuf,
    pub semantic_candidates: Vec<String>,
    pub structural_candidates: Vec<String>,
    pub files: Vec<IndexedFile>,
    /// Candidates with no match on disk.
    pub dropped: Vec<String>,
    /// Why semantic extraction did not contribute, when it did not.
    pub degraded: Option<String>,
}

impl Resolution {
    /// The semantic strategy's failure as a non-fatal error, when it did not contribute.
    pub fn degradation(&self) -> Option<PipelineError> {
        self.degraded.clone().map(PipelineError::ResolutionDegraded)
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }

    /// Human-readable summary, written as `resolution_summary.md`.
    pub fn summary(&self) -> String {
        let mut out = String::from("# Data Resolution\n\n");
        let _ = writeln!(out, "- Data directory: {}", self.data_dir.display());
        let _ = writeln!(
            out,
            "- Semantic candidates ({}): {}",
            self.semantic_candidates.len(),
            join_or_none(&self.semantic_candidates)
        );
        let _ = writeln!(
            out,
            "- Structural candidates ({}): {}",
            self.structural_candidates.len(),
            join_or_none(&self.structural_candidates)
        );
        match &self.degraded {
            Some(reason) => {
                let _ = writeln!(out, "- Status: degraded to pattern matching ({})", reason);
            }
            None => {
                let _ = writeln!(out, "- Status: complete");
            }
        }

        out.push_str("\n## Resolved files\n\n");
        if self.files.is_empty() {
            out.push_str("No data files could be matched for this sub-problem.\n");
        }
        for file in &self.files {
            let _ = writeln!(
                out,
                "- {} ({}, {} bytes)",
                file.name,
                file.relative_path.display(),
                file.size_bytes
            );
        }

        if !self.dropped.is_empty() {
            out.push_str("\n## Dropped candidates (not found on disk)\n\n");
            for name in &self.dropped {
                let _ = writeln!(out, "- {}", name);
            }
        }
        out
    }

    /// Summary for a data directory that could not be read at all.
    pub fn inaccessible_summary(data_dir: &Path, reason: &str) -> String {
        format!(
            "# Data Resolution\n\n- Data directory: {}\n- Status: failed ({})\n\n## Resolved files\n\n\
No data files could be matched for this sub-problem.\n",
            data_dir.display(),
            reason
        )
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Text the extraction strategies look at for one sub-problem.
pub fn resolution_text(decomposition: &Decomposition, sub_problem: &SubProblem) -> String {
    let mut text = format!(
        "{}\n{}\n{}\n{}",
        sub_problem.title,
        sub_problem.description,
        sub_problem.suggested_approach,
        sub_problem.data_list.join(", ")
    );
    if decomposition.is_atomic() || decomposition.sub_problems.len() == 1 {
        text.push_str("\n\n");
        text.push_str(&decomposition.original_problem_text);
    }
    text
}

/// Two-strategy data resolver.
pub struct DataResolver {
    client: Arc<dyn GenerationClient>,
    prompts: Arc<PromptLibrary>,
    model: String,
    temperature: f32,
}

impl DataResolver {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        prompts: Arc<PromptLibrary>,
        model: String,
        temperature: f32,
    ) -> Self {
        Self {
            client,
            prompts,
            model,
            temperature,
        }
    }

    /// Resolve the data files for `sub_problem` from `data_dir`, never returning paths
    /// listed in `exclude`.
    pub async fn resolve(
        &self,
        decomposition: &Decomposition,
        sub_problem: &SubProblem,
        data_dir: &Path,
        exclude: &[PathBuf],
    ) -> Result<Resolution, PipelineError> {
        let index = DataIndex::build(data_dir, exclude)?;
        let text = resolution_text(decomposition, sub_problem);

        let (semantic, degraded) = match self.extract_semantic(sub_problem, &text).await {
            Ok(candidates) if candidates.is_empty() => {
                (candidates, Some("semantic extraction found no candidates".to_string()))
            }
            Ok(candidates) => (candidates, None),
            Err(e) => (Vec::new(), Some(format!("semantic extraction failed: {}", e))),
        };
        let structural = extract::scan_text(&text);

        let mut resolution = match_candidates(&index, &text, &semantic, &structural);
        resolution.data_dir = data_dir.to_path_buf();
        resolution.semantic_candidates = semantic;
        resolution.structural_candidates = structural;
        resolution.degraded = degraded;
        if let Some(err) = resolution.degradation() {
            warn!(sub_problem = %sub_problem.id, error = %err, "Falling back to pattern matching");
        }
        debug!(
            sub_problem = %sub_problem.id,
            resolved = resolution.files.len(),
            dropped = resolution.dropped.len(),
            "Data resolution finished"
        );
        Ok(resolution)
    }

    async fn extract_semantic(
        &self,
        sub_problem: &SubProblem,
        text: &str,
    ) -> Result<Vec<String>, PipelineError> {
        let vars = PromptVars::new()
            .set("sub_problem.description", text)
            .set("data_list", sub_problem.data_list.join(", "));
        let prompt = self.prompts.render(DATA_EXTRACTION, &vars)?;
        let request = GenerationRequest::text(
            DATA_EXTRACTION,
            prompt.system,
            prompt.user,
            self.model.as_str(),
            self.temperature,
        );
        let generation = self.client.generate(request).await?;
        Ok(extract::parse_extraction_reply(&generation.text))
    }
}

/// Union both candidate sets and keep what exists in the index.
///
/// Question identifiers alone (`Q5`) are hints for prefixed names, not candidates.
pub fn match_candidates(
    index: &DataIndex,
    text: &str,
    semantic: &[String],
    structural: &[String],
) -> Resolution {
    let question_ids = extract::question_ids(text);
    let question_keys: HashSet<String> = question_ids.iter().map(|q| fold(q)).collect();

    let mut seen_candidates = HashSet::new();
    let mut seen_files = HashSet::new();
    let mut resolution = Resolution::default();

    for candidate in semantic.iter().chain(structural.iter()) {
        let key = fold(candidate);
        if key.is_empty() || question_keys.contains(&key) || !seen_candidates.insert(key) {
            continue;
        }
        let matches = index.lookup(candidate, &question_ids);
        if matches.is_empty() {
            resolution.dropped.push(candidate.clone());
            continue;
        }
        for file in matches {
            if seen_files.insert(file.relative_path.clone()) {
                resolution.files.push(file.clone());
            }
        }
    }
    resolution
}
