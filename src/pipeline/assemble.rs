//! Assemble stage composition
//!
//! The final sub-problem answer is the restructured Revise content, the FinalReview text
//! under its own heading and, only when the Search report actually cited sources, a
//! numbered reference list. Citation markers that point at no listed reference are removed.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Heading under which the FinalReview content is appended.
pub const FINAL_REVIEW_HEADING: &str = "## Final Review";
/// Heading of the reference list.
pub const REFERENCES_HEADING: &str = "## References";

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d{1,3})\]").expect("Invalid regex pattern"));

static URL_OR_DOI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://\S+|\bdoi:\s*10\.\d{4,9}/\S+|\b10\.\d{4,9}/[^\s\]]+")
        .expect("Invalid regex pattern")
});

static REFERENCE_SECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:#{1,6}\s*)?(?:\*\*)?(references|bibliography|sources|citations)(?:\*\*)?:?\s*$")
        .expect("Invalid regex pattern")
});

static NUMBERED_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\[(\d{1,3})\]|(\d{1,3})[.)])\s+(.+?)\s*$").expect("Invalid regex pattern")
});

/// True when the search report carries citations worth listing.
pub fn has_citation_markers(search_report: &str) -> bool {
    CITATION_MARKER.is_match(search_report) || URL_OR_DOI.is_match(search_report)
}

/// Reference entries of a search report, in listed order.
///
/// Prefers numbered entries after a references heading; without one, any line carrying
/// a URL or DOI is taken as an entry.
pub fn extract_references(search_report: &str) -> Vec<String> {
    if !has_citation_markers(search_report) {
        return Vec::new();
    }

    if let Some(heading) = REFERENCE_SECTION_HEADING.find_iter(search_report).last() {
        let section = &search_report[heading.end()..];
        let entries: Vec<String> = section
            .lines()
            .filter_map(|line| NUMBERED_ENTRY.captures(line))
            .filter_map(|caps| caps.get(3).map(|m| m.as_str().to_string()))
            .collect();
        if !entries.is_empty() {
            return entries;
        }
    }

    let numbered: Vec<String> = search_report
        .lines()
        .filter_map(|line| NUMBERED_ENTRY.captures(line))
        .filter(|caps| caps.get(1).is_some())
        .filter_map(|caps| caps.get(3).map(|m| m.as_str().to_string()))
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    search_report
        .lines()
        .map(str::trim)
        .filter(|line| URL_OR_DOI.is_match(line))
        .map(|line| line.trim_start_matches(['-', '*', ' ']).to_string())
        .collect()
}

/// Remove `[n]` markers with no matching reference (all of them when `reference_count` is 0).
pub fn strip_unmatched_markers(text: &str, reference_count: usize) -> String {
    let mut current = text.to_string();
    // Removing `[2]` from `[1[2]]` exposes `[1]`, so repeat until stable.
    loop {
        let next = CITATION_MARKER
            .replace_all(&current, |caps: &Captures| {
                let valid = caps[1]
                    .parse::<usize>()
                    .map(|n| n >= 1 && n <= reference_count)
                    .unwrap_or(false);
                if valid {
                    caps[0].to_string()
                } else {
                    String::new()
                }
            })
            .into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Drop a trailing reference section the model may have written itself.
fn strip_reference_section(text: &str) -> &str {
    match REFERENCE_SECTION_HEADING.find_iter(text).last() {
        Some(heading) => text[..heading.start()].trim_end(),
        None => text.trim_end(),
    }
}

/// Compose the final answer for one sub-problem.
pub fn compose(content: &str, final_review: &str, references: &[String]) -> String {
    let body = strip_unmatched_markers(strip_reference_section(content), references.len());
    let mut out = String::new();
    out.push_str(body.trim());
    out.push_str("\n\n");
    out.push_str(FINAL_REVIEW_HEADING);
    out.push_str("\n\n");
    out.push_str(final_review.trim());
    out.push('\n');

    if !references.is_empty() {
        out.push('\n');
        out.push_str(REFERENCES_HEADING);
        out.push_str("\n\n");
        for (i, reference) in references.iter().enumerate() {
            out.push_str(&format!("[{}] {}\n", i + 1, reference));
        }
    }
    out
}

/// Reference list as given to the assemble prompt.
pub fn references_prompt(references: &[String]) -> String {
    if references.is_empty() {
        return "None. Do not include citation markers or a reference section.".to_string();
    }
    references
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n")
}
