//! Prompt templates
//!
//! Every generation call renders a system and a user template keyed by its purpose
//! (`decompose`, `data_extraction`, `search`, ...). Templates use `{name}` placeholders;
//! unknown placeholders are left untouched and substituted values are never re-expanded.
//! Built-in templates can be replaced per purpose by `<purpose>_system.md` and
//! `<purpose>_user.md` files in a prompts directory.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_.]*)\}").expect("Invalid regex pattern"));

/// Purpose of the data-file extraction call made during resolution.
pub const DATA_EXTRACTION: &str = "data_extraction";
/// Purpose of the planning call that precedes the data summary.
pub const DATA_PLAN: &str = "data_plan";

/// Every purpose with a template.
pub const PURPOSES: [&str; 10] = [
    "decompose",
    DATA_EXTRACTION,
    DATA_PLAN,
    "data_analysis",
    "search",
    "draft",
    "critique",
    "revise",
    "final_review",
    "assemble",
];

/// System/user template pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

/// Rendered prompts ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Placeholder values for one render.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    values: HashMap<String, String>,
}

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Substitute `{name}` placeholders in a single pass.
pub fn substitute(template: &str, vars: &PromptVars) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Template set used by every stage.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, PromptTemplate>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        let templates = PURPOSES
            .iter()
            .map(|purpose| {
                let (system, user) = builtin_template(purpose);
                (
                    purpose.to_string(),
                    PromptTemplate {
                        system: system.to_string(),
                        user: user.to_string(),
                    },
                )
            })
            .collect();
        Self { templates }
    }

    /// Built-in templates with any overrides found in `dir`.
    pub fn load(dir: Option<&Path>) -> Result<Self, PipelineError> {
        let mut library = Self::builtin();
        let Some(dir) = dir else {
            return Ok(library);
        };
        if !dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "Prompts directory {:?} does not exist",
                dir
            )));
        }

        for purpose in PURPOSES {
            let Some(template) = library.templates.get_mut(purpose) else {
                continue;
            };
            if let Some(system) = read_override(dir, &format!("{}_system.md", purpose))? {
                template.system = system;
            }
            if let Some(user) = read_override(dir, &format!("{}_user.md", purpose))? {
                template.user = user;
            }
        }
        Ok(library)
    }

    pub fn template(&self, purpose: &str) -> Option<&PromptTemplate> {
        self.templates.get(purpose)
    }

    pub fn render(&self, purpose: &str, vars: &PromptVars) -> Result<RenderedPrompt, PipelineError> {
        let template = self.template(purpose).ok_or_else(|| {
            PipelineError::Config(format!("No prompt template for '{}'", purpose))
        })?;
        Ok(RenderedPrompt {
            system: substitute(&template.system, vars),
            user: substitute(&template.user, vars),
        })
    }
}

fn read_override(dir: &Path, name: &str) -> Result<Option<String>, PipelineError> {
    let path = dir.join(name);
    if !path.is_file() {
        return Ok(None);
    }
    tracing::debug!(path = %path.display(), "Loading prompt override");
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| PipelineError::Config(format!("Failed to read prompt {:?}: {}", path, e)))
}

fn builtin_template(purpose: &str) -> (&'static str, &'static str) {
    match purpose {
        "decompose" => (
            "You are a research lead who plans how a problem will be solved. Classify the \
problem and split it into sub-problems.\n\nRules, in priority order:\n\
- If the problem contains explicitly enumerated labels, create exactly one sub-problem per \
label in the original order. Never merge labeled sub-problems.\n\
- Otherwise, if the problem is a single conceptual ask, return exactly one sub-problem \
with id \"ATOMIC\".\n\
- Otherwise split along sequential dependencies and distinct domains. Group trivial \
sequential micro-steps, group data-analysis questions over the same dataset, and keep all \
numbered requirements of one deliverable together.\n\n\
For each sub-problem set data_flag to 1 only if its text explicitly names input files or \
data sources, and list in data_list only file or dataset names that literally appear in the \
problem text. Do not list public databases unless the problem asks to use them as input.\n\
Respond with JSON only.",
            "Explicit labels detected: {labels}\n\nProblem text:\n\n{original_problem_text}",
        ),
        DATA_EXTRACTION => (
            "You extract data references from research problems. Answer with a single \
comma-separated list and nothing else.",
            "Extract every data file name, folder name and dataset identifier mentioned in \
the problem, including question identifiers combined with names (for example \
Q5.exhaustion_signature) and file names with extensions.\n\nAlready known: {data_list}\n\n\
Problem text:\n\n{sub_problem.description}\n\n\
Your response (comma-separated list only):",
        ),
        DATA_PLAN => (
            "You are a data analysis planner. Given a task and the data files available for \
it, write a short numbered plan: which files to examine first, what to compute or compare, \
and how the results answer the task. Reference only the listed files.",
            "Main problem:\n{main_problem_definition}\n\nSub-problem: {sub_problem.title}\n\
{sub_problem.description}\n\nSuggested approach:\n{sub_problem.suggested_approach}\n\n\
Available files:\n{file_list}",
        ),
        "data_analysis" => (
            "You are a data analyst. Summarize what the available data files contain and \
what they can and cannot support for the task, following the analysis plan. Do not invent \
values that are not in the profiles.",
            "Task: {sub_problem.title}\n{sub_problem.description}\n\nAnalysis plan:\n\
{analysis_plan}\n\nResolution summary:\n{resolution_summary}\n\nFile profiles:\n\
{file_profiles}",
        ),
        "search" => (
            "You are a literature researcher. Report the background knowledge, methods and \
prior findings relevant to the task. Cite sources with numbered markers like [1] and end \
with a numbered reference list. Only cite sources you are confident exist.",
            "Main problem:\n{main_problem_definition}\n\nSub-problem: {sub_problem.title}\n\
{sub_problem.description}\n\nSuggested approach:\n{sub_problem.suggested_approach}",
        ),
        "draft" => (
            "You are a domain scientist writing a complete answer to one sub-problem. Use \
the research report and the data analysis results where they apply.",
            "Original problem:\n{original_problem_text}\n\nSub-problem: {sub_problem.title}\n\
{sub_problem.description}\n\nSuggested approach:\n{sub_problem.suggested_approach}\n\n\
Research report:\n{search_report}\n\nData analysis results:\n{data_analysis_results}",
        ),
        "critique" => (
            "You are a rigorous reviewer. Identify factual errors, unsupported claims, gaps \
and deviations from what the problem asks. Be specific and actionable.",
            "Original problem:\n{original_problem_text}\n\nCompleted report:\n{draft_report}",
        ),
        "revise" => (
            "You revise a scientific report so that every point of the review is \
addressed while keeping what was correct.",
            "Original problem:\n{original_problem_text}\n\nSub-problem: {sub_problem.title}\n\n\
Report:\n{draft_report}\n\nReview feedback:\n{critique}\n\nData analysis results:\n\
{data_analysis_results}",
        ),
        "final_review" => (
            "You are the final reviewer. Check the revised report against the original \
problem and state any remaining limitations or caveats concisely.",
            "Original problem:\n{original_problem_text}\n\nRevised report:\n{revised_report}",
        ),
        "assemble" => (
            "You format a final deliverable. Preserve the structure and numbering the \
original problem requires. Use only the provided content; do not add references or \
citation markers that are not in the provided reference list.",
            "Original problem:\n{original_problem_text}\n\nSub-problem: {sub_problem.title}\n\n\
Content:\n{revised_report}\n\nAvailable references:\n{references}",
        ),
        _ => ("", ""),
    }
}
