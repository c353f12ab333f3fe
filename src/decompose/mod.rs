//! Decomposition Engine
//!
//! Turns raw problem text into a validated [`Decomposition`]. Explicit labels found in the
//! text are detected up front and bind the result: one sub-problem per label, in label
//! order. Structured output that fails validation is re-generated a bounded number of
//! times; remote failures surface unchanged (retrying them is the wrapper's job).

pub mod labels;
pub mod sanitize;

use crate::error::PipelineError;
use crate::pipeline::prompts::{PromptLibrary, PromptVars};
use crate::pipeline::stage::Stage;
use crate::problem::{Decomposition, Problem, SubProblem, ATOMIC_ID};
use crate::provider::{GenerationClient, GenerationRequest};
use labels::{detect_labels, label_index_for, Label};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// JSON schema sent with the decomposition request.
pub fn decomposition_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "problem_id": { "type": "string" },
            "main_problem_definition": { "type": "string" },
            "sub_problems": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "suggested_approach": { "type": "string" },
                        "data_flag": { "type": "integer", "enum": [0, 1] },
                        "data_list": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["id", "title", "description", "suggested_approach", "data_flag", "data_list"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["problem_id", "main_problem_definition", "sub_problems"],
        "additionalProperties": false
    })
}

/// Classifies and splits problems into sub-problems.
pub struct DecompositionEngine {
    client: Arc<dyn GenerationClient>,
    prompts: Arc<PromptLibrary>,
    model: String,
    temperature: f32,
    max_schema_attempts: u32,
}

impl DecompositionEngine {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        prompts: Arc<PromptLibrary>,
        model: String,
        temperature: f32,
        max_schema_attempts: u32,
    ) -> Self {
        Self {
            client,
            prompts,
            model,
            temperature,
            max_schema_attempts: max_schema_attempts.max(1),
        }
    }

    /// Decompose one problem.
    pub async fn decompose(&self, problem: &Problem) -> Result<Decomposition, PipelineError> {
        let labels = detect_labels(&problem.text);
        let label_list = if labels.is_empty() {
            "none".to_string()
        } else {
            labels
                .iter()
                .map(|l| l.text.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        debug!(problem = %problem.id, labels = %label_list, "Detected explicit labels");

        let vars = PromptVars::new()
            .set("original_problem_text", problem.text.as_str())
            .set("labels", label_list.as_str());
        let prompt = self.prompts.render(Stage::Decompose.as_str(), &vars)?;

        let mut last_rejection = String::new();
        for attempt in 1..=self.max_schema_attempts {
            let mut user = prompt.user.clone();
            if !last_rejection.is_empty() {
                user.push_str(&format!(
                    "\n\nYour previous answer was rejected: {}. Return corrected JSON.",
                    last_rejection
                ));
            }

            let request = GenerationRequest::text(
                Stage::Decompose.as_str(),
                prompt.system.as_str(),
                user,
                self.model.as_str(),
                self.temperature,
            )
            .with_schema("decomposition", decomposition_schema());

            let generation = self.client.generate(request).await?;
            match validate(generation.json, problem, &labels) {
                Ok(decomposition) => {
                    info!(
                        problem = %problem.id,
                        sub_problems = decomposition.sub_problems.len(),
                        atomic = decomposition.is_atomic(),
                        "Decomposition accepted"
                    );
                    return Ok(decomposition);
                }
                Err(reason) => {
                    warn!(
                        problem = %problem.id,
                        attempt,
                        max_attempts = self.max_schema_attempts,
                        reason = %reason,
                        "Decomposition output rejected"
                    );
                    last_rejection = reason;
                }
            }
        }

        Err(PipelineError::Schema(format!(
            "decomposition for '{}' rejected after {} attempts: {}",
            problem.id, self.max_schema_attempts, last_rejection
        )))
    }
}

/// Check the structural contract and normalize the accepted output.
pub fn validate(
    json: Option<Value>,
    problem: &Problem,
    labels: &[Label],
) -> Result<Decomposition, String> {
    let value = json.ok_or_else(|| "response is not valid JSON".to_string())?;
    let mut decomposition: Decomposition =
        serde_json::from_value(value).map_err(|e| format!("structure mismatch: {}", e))?;

    if decomposition.sub_problems.is_empty() {
        return Err("sub_problems is empty".to_string());
    }
    for (i, sp) in decomposition.sub_problems.iter().enumerate() {
        if sp.title.trim().is_empty() || sp.description.trim().is_empty() {
            return Err(format!("sub-problem {} is missing a title or description", i + 1));
        }
    }
    if !labels.is_empty() && decomposition.sub_problems.len() != labels.len() {
        return Err(format!(
            "expected {} sub-problems (one per label), got {}",
            labels.len(),
            decomposition.sub_problems.len()
        ));
    }

    if !labels.is_empty() {
        reorder_by_labels(&mut decomposition.sub_problems, labels);
    }
    normalize_ids(&mut decomposition.sub_problems, !labels.is_empty());

    for sp in &mut decomposition.sub_problems {
        sp.data_list = sanitize::sanitize_data_list(&sp.data_list, &problem.text);
        sp.data_flag |= !sp.data_list.is_empty();
    }

    decomposition.problem_id = problem.id.clone();
    decomposition.original_problem_text = problem.text.clone();
    if decomposition.main_problem_definition.trim().is_empty() {
        decomposition.main_problem_definition = problem.text.clone();
    }
    Ok(decomposition)
}

/// Sort into label order when every sub-problem maps to a distinct label.
fn reorder_by_labels(sub_problems: &mut Vec<SubProblem>, labels: &[Label]) {
    let indices: Vec<Option<usize>> = sub_problems
        .iter()
        .map(|sp| label_index_for(sp, labels))
        .collect();
    let distinct: HashSet<usize> = indices.iter().flatten().copied().collect();
    if distinct.len() != sub_problems.len() {
        return;
    }
    let mut paired: Vec<(usize, SubProblem)> = indices
        .into_iter()
        .flatten()
        .zip(sub_problems.drain(..))
        .collect();
    paired.sort_by_key(|(index, _)| *index);
    sub_problems.extend(paired.into_iter().map(|(_, sp)| sp));
}

fn normalize_ids(sub_problems: &mut [SubProblem], labeled: bool) {
    if !labeled && sub_problems.len() == 1 {
        sub_problems[0].id = ATOMIC_ID.to_string();
        return;
    }
    for (i, sp) in sub_problems.iter_mut().enumerate() {
        sp.id = format!("SUB_{:02}", i + 1);
    }
}
