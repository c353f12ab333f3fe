//! Candidate extraction: parsing the semantic extractor's reply and the deterministic
//! pattern scan used as the structural fallback.

use crate::decompose::sanitize::clean_name;
use crate::resolve::index::supported_extension;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static EXTENSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[A-Za-z0-9_\-./]*[A-Za-z0-9_\-]\.[A-Za-z0-9]+(?:\.gz)?")
        .expect("Invalid regex pattern")
});

static QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"\n]{1,200})"|'([^'\n]{1,200})'|`([^`\n]{1,200})`"#)
        .expect("Invalid regex pattern")
});

static QUESTION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bQ\d+\b").expect("Invalid regex pattern"));

static BULLET_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[-*•]\s+`?([A-Za-z0-9][A-Za-z0-9\-.]*_[A-Za-z0-9_\-.]*)`?")
        .expect("Invalid regex pattern")
});

/// Parse the extractor's reply: the last non-empty line, split on commas.
pub fn parse_extraction_reply(reply: &str) -> Vec<String> {
    let Some(line) = reply.lines().map(str::trim).filter(|l| !l.is_empty()).last() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    line.split(',')
        .map(clean_name)
        .filter(|name| {
            !name.is_empty()
                && !name.eq_ignore_ascii_case("none")
                && !name.eq_ignore_ascii_case("n/a")
        })
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

/// Question identifiers (`Q1`, `Q5`) mentioned in the text, in order of appearance.
pub fn question_ids(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    QUESTION_ID
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Deterministic scan for filename-like tokens.
///
/// Collects tokens carrying a supported data extension, quoted strings that look like
/// paths, and underscore identifiers listed as bullets (dataset or folder names).
pub fn scan_text(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut push = |name: String| {
        let name = name.trim_end_matches(['.', ',', ';', ':']).to_string();
        if !name.is_empty() && seen.insert(name.to_lowercase()) {
            candidates.push(name);
        }
    };

    for m in EXTENSION_TOKEN.find_iter(text) {
        let token = m.as_str().trim_start_matches("./");
        if supported_extension(token).is_some() {
            push(token.to_string());
        }
    }

    for caps in QUOTED.captures_iter(text) {
        let Some(inner) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let inner = clean_name(inner.as_str());
        let path_like = !inner.contains(' ')
            && (inner.contains('/') || supported_extension(&inner).is_some());
        if path_like {
            push(inner);
        }
    }

    for caps in BULLET_IDENTIFIER.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            push(m.as_str().to_string());
        }
    }

    candidates
}
