//! Explicit sub-problem label detection.
//!
//! A label is a line-leading marker such as `Q1.`, `Question 2:`, `Part A`, `Task 3`,
//! `Sub-problem 1` or `(a)`. Only the family of the first label found counts as top level,
//! so `(a)`/`(b)` items nested under `Q1`/`Q2` do not become sub-problems of their own.

use crate::problem::SubProblem;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static LABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t>#*_\-]*(?P<label>Q\s?\d+|(?i:question)\s+(?:\d+|[A-Z])|(?i:part)\s+(?:\d+|[A-Z]|[IVX]+)|(?i:task)\s+\d+|(?i:sub-?(?:problem|question))\s+\d+|\([a-h]\))(?:[ \t.:)*_\-]|$)",
    )
    .expect("Invalid regex pattern")
});

/// Family a label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Q,
    Question,
    Part,
    Task,
    SubProblem,
    Letter,
}

/// One detected label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub kind: LabelKind,
    /// Label as written (`Q1`, `Part A`, `(b)`).
    pub text: String,
    /// Normalized comparison key (`Q1`, `PART A`, `(B)`).
    pub key: String,
    /// Byte offset of the line holding the label.
    pub offset: usize,
}

/// Text belonging to one label, from its line up to the next label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub label: String,
    pub body: String,
}

fn classify(label: &str) -> LabelKind {
    let lower = label.to_ascii_lowercase();
    if lower.starts_with('(') {
        LabelKind::Letter
    } else if lower.starts_with("question") {
        LabelKind::Question
    } else if lower.starts_with("part") {
        LabelKind::Part
    } else if lower.starts_with("task") {
        LabelKind::Task
    } else if lower.starts_with("sub") {
        LabelKind::SubProblem
    } else {
        LabelKind::Q
    }
}

fn normalize(label: &str) -> String {
    let upper = label.to_ascii_uppercase();
    let collapsed: Vec<&str> = upper.split_whitespace().collect();
    let joined = collapsed.join(" ");
    // `Q 1` and `Q1` are the same label
    match joined.strip_prefix("Q ") {
        Some(rest) if rest.chars().all(|c| c.is_ascii_digit()) => format!("Q{}", rest),
        _ => joined,
    }
}

/// Detect top-level labels in order of appearance.
///
/// Returns an empty list unless at least two distinct labels of the same family exist.
pub fn detect_labels(text: &str) -> Vec<Label> {
    let mut found: Vec<Label> = Vec::new();
    let mut family: Option<LabelKind> = None;
    let mut seen = HashSet::new();

    for captures in LABEL_REGEX.captures_iter(text) {
        let Some(m) = captures.name("label") else {
            continue;
        };
        let raw = m.as_str().trim();
        let kind = classify(raw);
        let family = *family.get_or_insert(kind);
        if kind != family {
            continue;
        }
        let key = normalize(raw);
        if !seen.insert(key.clone()) {
            continue;
        }
        let offset = captures.get(0).map(|whole| whole.start()).unwrap_or(m.start());
        found.push(Label {
            kind,
            text: raw.split_whitespace().collect::<Vec<_>>().join(" "),
            key,
            offset,
        });
    }

    if found.len() < 2 {
        return Vec::new();
    }
    found
}

/// Split `text` into one section per top-level label.
pub fn split_sections(text: &str) -> Vec<Section> {
    let labels = detect_labels(text);
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let end = labels.get(i + 1).map(|next| next.offset).unwrap_or(text.len());
            Section {
                label: label.text.clone(),
                body: text[label.offset..end].trim().to_string(),
            }
        })
        .collect()
}

/// True when `haystack` mentions `label` as a standalone token (case-insensitive).
pub fn mentions_label(haystack: &str, label: &Label) -> bool {
    let hay = haystack.to_ascii_uppercase();
    let hay = normalize_spacing(&hay);
    let needle = label.key.as_str();
    let bytes = hay.as_bytes();
    let mut start = 0;
    while let Some(pos) = hay[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = begin == 0 || !bytes[begin - 1].is_ascii_alphanumeric();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
        while start < hay.len() && !hay.is_char_boundary(start) {
            start += 1;
        }
    }
    false
}

fn normalize_spacing(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Index of the label a sub-problem refers to: title first, then id, then description.
pub fn label_index_for(sub_problem: &SubProblem, labels: &[Label]) -> Option<usize> {
    [
        sub_problem.title.as_str(),
        sub_problem.id.as_str(),
        sub_problem.description.as_str(),
    ]
    .iter()
    .find_map(|field| labels.iter().position(|label| mentions_label(field, label)))
}
