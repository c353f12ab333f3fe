//! Directory index of locally available data files.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

/// Extensions recognised as data, matched case-insensitively against the file name suffix.
/// Longer suffixes come first so `.vcf.gz` wins over `.gz`.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".fastq.gz", ".fq.gz", ".fasta.gz", ".fa.gz", ".fna.gz", ".vcf.gz", ".csv", ".tsv", ".txt",
    ".tab", ".xlsx", ".xls", ".json", ".parquet", ".feather", ".hdf5", ".h5", ".fastq",
    ".fq", ".fasta", ".fa", ".fna", ".ffn", ".faa", ".frn", ".sam", ".bam", ".cram", ".pod5",
    ".fast5", ".blow5", ".vcf", ".bcf", ".gff", ".gff3", ".gtf", ".bed", ".bedgraph", ".bigwig",
    ".bw", ".maf", ".psl", ".chain", ".wig",
];

const MAX_DEPTH: usize = 6;

/// Supported extension of `name`, lowercase, if any.
pub fn supported_extension(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    SUPPORTED_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| lower.ends_with(ext) && lower.len() > ext.len())
}

/// Case-folded NFC form used for every comparison.
pub fn fold(name: &str) -> String {
    name.nfc().collect::<String>().trim().to_lowercase()
}

/// One data file found under the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub name: String,
    /// Path relative to the data directory
    pub relative_path: PathBuf,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl IndexedFile {
    fn folders(&self) -> impl Iterator<Item = String> + '_ {
        self.relative_path
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .map(|c| fold(&c.as_os_str().to_string_lossy()))
    }
}

/// Index of the data files available to one problem.
#[derive(Debug, Clone, Default)]
pub struct DataIndex {
    files: Vec<IndexedFile>,
}

impl DataIndex {
    /// Walk `dir`, keeping supported files and skipping hidden entries and anything at or
    /// below an `exclude`d path.
    ///
    /// Fails only when `dir` itself cannot be read.
    pub fn build(dir: &Path, exclude: &[PathBuf]) -> Result<Self, PipelineError> {
        std::fs::read_dir(dir).map_err(|e| {
            PipelineError::ResolutionInaccessible(format!("{}: {}", dir.display(), e))
        })?;

        let excluded: Vec<PathBuf> = exclude
            .iter()
            .map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.clone()))
            .collect();

        let mut files = Vec::new();
        let walker = WalkDir::new(dir)
            .max_depth(MAX_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry in data directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if supported_extension(&name).is_none() {
                continue;
            }
            let canonical =
                dunce::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
            if excluded.iter().any(|ex| canonical.starts_with(ex)) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(IndexedFile {
                name,
                relative_path: relative.to_path_buf(),
                path: entry.path().to_path_buf(),
                size_bytes,
            });
        }

        Ok(Self { files })
    }

    pub fn files(&self) -> &[IndexedFile] {
        &self.files
    }

    /// Files matching one candidate name.
    ///
    /// Tried in order: exact file name or relative path, question-prefixed file name
    /// (`Q5.signature.csv` for `signature.csv` when `Q5` is among `question_ids`), and
    /// finally every file inside a folder of that name.
    pub fn lookup(&self, candidate: &str, question_ids: &[String]) -> Vec<&IndexedFile> {
        let wanted = fold(candidate).trim_matches('/').to_string();
        if wanted.is_empty() {
            return Vec::new();
        }

        let exact: Vec<&IndexedFile> = self
            .files
            .iter()
            .filter(|f| {
                fold(&f.name) == wanted
                    || fold(&f.relative_path.to_string_lossy().replace('\\', "/")) == wanted
            })
            .collect();
        if !exact.is_empty() {
            return exact;
        }

        let prefixed: Vec<&IndexedFile> = self
            .files
            .iter()
            .filter(|f| {
                let name = fold(&f.name);
                question_ids
                    .iter()
                    .any(|q| name == format!("{}.{}", fold(q), wanted))
            })
            .collect();
        if !prefixed.is_empty() {
            return prefixed;
        }

        self.files
            .iter()
            .filter(|f| f.folders().any(|folder| folder == wanted))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "a,b\n1,2\n").unwrap();
    }

    #[test]
    fn test_supported_extension_prefers_longest() {
        assert_eq!(supported_extension("calls.VCF.gz"), Some(".vcf.gz"));
        assert_eq!(supported_extension("reads.bam"), Some(".bam"));
        assert_eq!(supported_extension("script.py"), None);
        assert_eq!(supported_extension(".csv"), None);
    }

    #[test]
    fn test_index_skips_hidden_unsupported_and_excluded() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "counts.csv");
        touch(dir.path(), "01_rates.md");
        touch(dir.path(), "02_yields.txt");
        touch(dir.path(), "notes.py");
        touch(dir.path(), ".cache/hidden.csv");
        touch(dir.path(), "sig/genes.tsv");

        let index = DataIndex::build(dir.path(), &[dir.path().join("02_yields.txt")]).unwrap();
        let names: Vec<_> = index.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["counts.csv", "genes.tsv"]);
    }

    #[test]
    fn test_lookup_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "Q5.exhaustion_signature.csv");
        touch(dir.path(), "counts.csv");
        touch(dir.path(), "polyA_data/run1.pod5");
        touch(dir.path(), "polyA_data/run2.pod5");
        let index = DataIndex::build(dir.path(), &[]).unwrap();
        let q = vec!["Q5".to_string()];

        assert_eq!(index.lookup("COUNTS.csv", &q).len(), 1);
        assert_eq!(
            index.lookup("exhaustion_signature.csv", &q)[0].name,
            "Q5.exhaustion_signature.csv"
        );
        assert!(index.lookup("exhaustion_signature.csv", &[]).is_empty());
        assert_eq!(index.lookup("polyA_data", &q).len(), 2);
        assert_eq!(index.lookup("polyA_data/run1.pod5", &q).len(), 1);
        assert!(index.lookup("missing.bam", &q).is_empty());
    }

    #[test]
    fn test_missing_directory_is_inaccessible() {
        let result = DataIndex::build(Path::new("/definitely/missing/dir"), &[]);
        assert!(matches!(
            result,
            Err(PipelineError::ResolutionInaccessible(_))
        ));
    }
}
