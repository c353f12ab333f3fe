//! `data_list` sanitization.
//!
//! A sub-problem's data list may only name things literally present in the problem text.
//! Well-known public databases are dropped unless the text asks for them as direct input.

use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Public databases that are usually background knowledge rather than input data.
pub const GENERIC_DATABASES: &[&str] = &[
    "GEO",
    "TCGA",
    "UniProt",
    "PDB",
    "KEGG",
    "Ensembl",
    "NCBI",
    "GTEx",
    "GenBank",
    "RefSeq",
    "dbSNP",
    "ClinVar",
    "Reactome",
    "STRING",
    "Pfam",
    "ArrayExpress",
    "SRA",
    "ENCODE",
    "gnomAD",
    "MSigDB",
    "Gene Ontology",
    "GO",
    "COSMIC",
    "cBioPortal",
    "Human Protein Atlas",
    "PubMed",
];

/// NFC-normalize and trim a candidate name, removing wrapping quotes and backticks.
pub fn clean_name(name: &str) -> String {
    let normalized: String = name.nfc().collect();
    normalized
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
        .trim()
        .to_string()
}

pub fn is_generic_database(name: &str) -> bool {
    let name = name.trim();
    GENERIC_DATABASES.iter().any(|db| {
        name.eq_ignore_ascii_case(db)
            || name
                .to_ascii_lowercase()
                .strip_suffix(" database")
                .is_some_and(|stem| stem.eq_ignore_ascii_case(db))
    })
}

/// True when `text` contains `name` (case-insensitive, NFC).
pub fn literally_present(text: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let text: String = text.nfc().collect::<String>().to_lowercase();
    let name: String = name.nfc().collect::<String>().to_lowercase();
    text.contains(&name)
}

/// True when the text asks to use `name` as a direct input source.
pub fn requested_as_input(text: &str, name: &str) -> bool {
    let pattern = format!(
        r"(?i)\b(?:use|using|download(?:ed)?\s+from|from|provided|input|load|loaded|retrieve(?:d)?\s+from|obtain(?:ed)?\s+from|query|querying)\b[^.\n]{{0,60}}\b{}\b",
        regex::escape(name)
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Apply every data_list rule, preserving first-seen order.
pub fn sanitize_data_list(names: &[String], text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for raw in names {
        let name = clean_name(raw);
        if name.is_empty() || !seen.insert(name.to_lowercase()) {
            continue;
        }
        if !literally_present(text, &name) {
            tracing::debug!(name = %name, "Dropping data_list entry absent from problem text");
            continue;
        }
        if is_generic_database(&name) && !requested_as_input(text, &name) {
            tracing::debug!(name = %name, "Dropping generic database from data_list");
            continue;
        }
        kept.push(name);
    }
    kept
}
