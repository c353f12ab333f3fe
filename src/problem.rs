//! Problem and sub-problem data model.
//!
//! A [`Problem`] is discovered on disk and owned by exactly one scheduler task. The
//! decomposition engine turns it into a [`Decomposition`] holding one or more immutable
//! [`SubProblem`]s.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Sentinel sub-problem id for problems that need no decomposition.
pub const ATOMIC_ID: &str = "ATOMIC";

/// Lifecycle of a discovered problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemLifecycle {
    Discovered,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ProblemLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProblemLifecycle::Discovered => "discovered",
            ProblemLifecycle::Running => "running",
            ProblemLifecycle::Completed => "completed",
            ProblemLifecycle::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A raw problem statement discovered on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// Stable identifier derived from the problem's location (directory name).
    pub id: String,
    /// Leading numeric id of the identifier, if any (`03_t_cells` -> 3).
    pub numeric_id: Option<u32>,
    /// Raw problem text.
    pub text: String,
    /// Path of the problem text file.
    pub path: PathBuf,
    /// Directory holding the problem file and its data files.
    pub data_dir: PathBuf,
    pub lifecycle: ProblemLifecycle,
}

impl Problem {
    pub fn new(id: impl Into<String>, text: impl Into<String>, path: PathBuf) -> Self {
        let id = id.into();
        let data_dir = path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            numeric_id: leading_number(&id),
            id,
            text: text.into(),
            path,
            data_dir,
            lifecycle: ProblemLifecycle::Discovered,
        }
    }
}

/// Parse the leading digits of an identifier.
pub fn leading_number(id: &str) -> Option<u32> {
    let digits: String = id.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// One unit of decomposed work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProblem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub suggested_approach: String,
    /// True when the sub-problem names input files or data sources.
    #[serde(
        alias = "DB_flag",
        serialize_with = "flag_as_int",
        deserialize_with = "flag_from_any"
    )]
    pub data_flag: bool,
    /// Data filenames referenced by the sub-problem text.
    #[serde(alias = "DB_list", default, deserialize_with = "list_from_any")]
    pub data_list: Vec<String>,
}

impl SubProblem {
    pub fn is_atomic(&self) -> bool {
        self.id == ATOMIC_ID
    }
}

/// Output of the decomposition engine for one problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    pub problem_id: String,
    pub main_problem_definition: String,
    pub sub_problems: Vec<SubProblem>,
    /// Raw problem text, injected after generation.
    #[serde(default)]
    pub original_problem_text: String,
}

impl Decomposition {
    pub fn is_atomic(&self) -> bool {
        self.sub_problems.len() == 1 && self.sub_problems[0].is_atomic()
    }
}

fn flag_as_int<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*flag))
}

fn flag_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    use serde::de::Error;
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        serde_json::Value::String(s) => match s.trim() {
            "1" | "true" | "True" | "yes" => Ok(true),
            "0" | "false" | "False" | "no" | "" => Ok(false),
            other => Err(D::Error::custom(format!("invalid data_flag '{}'", other))),
        },
        serde_json::Value::Null => Ok(false),
        other => Err(D::Error::custom(format!("invalid data_flag {}", other))),
    }
}

/// Accept either a JSON array of names or a comma-separated string.
fn list_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    use serde::de::Error;
    let names = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) => s.split(',').map(str::to_string).collect(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                other => Err(D::Error::custom(format!("invalid data_list entry {}", other))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(D::Error::custom(format!("invalid data_list {}", other))),
    };
    Ok(names
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
