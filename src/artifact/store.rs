//! Filesystem artifact store
//!
//! Artifacts live at `{root}/{problem}/{NN_stage}/[{sub_problem}/]{name}`. Writes go to a
//! uniquely named temp file in the target directory and are renamed into place, so a
//! reader never observes a half-written artifact and concurrent writers to disjoint keys
//! never share a temp path.

use crate::artifact::key::{validate_segment, ArtifactKey, Scope};
use crate::error::StorageError;
use crate::pipeline::stage::Stage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

/// How a write treats an existing artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep the existing artifact; the write becomes a no-op.
    Create,
    /// Replace the existing artifact (explicit re-run).
    Overwrite,
}

/// What a write actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped,
}

/// Keyed store of immutable stage artifacts.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, key: &ArtifactKey) -> Result<bool, StorageError>;

    fn read(&self, key: &ArtifactKey) -> Result<String, StorageError>;

    fn write(
        &self,
        key: &ArtifactKey,
        content: &str,
        mode: WriteMode,
    ) -> Result<WriteOutcome, StorageError>;

    /// Every artifact stored for a problem, sorted by path.
    fn list(&self, problem: &str) -> Result<Vec<ArtifactKey>, StorageError>;

    /// Write a problem-level file (`run_report.json`, the deliverable). Always replaces.
    fn write_problem_file(
        &self,
        problem: &str,
        name: &str,
        content: &str,
    ) -> Result<PathBuf, StorageError>;

    fn read_problem_file(&self, problem: &str, name: &str) -> Result<Option<String>, StorageError>;
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Artifact store rooted at a directory on the local filesystem.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create the store, creating the root directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create artifact root {:?}: {}", root, e),
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an artifact.
    pub fn path_of(&self, key: &ArtifactKey) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(key.relative_path()?))
    }

    /// Path of a problem-level file.
    pub fn problem_file_path(&self, problem: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_segment(problem)?;
        validate_segment(name)?;
        Ok(self.root.join(problem).join(name))
    }

    fn write_atomic(path: &Path, content: &str) -> Result<(), StorageError> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(format!("{:?} has no parent", path)))?;
        fs::create_dir_all(parent).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create directory {:?}: {}", parent, e),
            ))
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = parent.join(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp_path, content.as_bytes()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to write {:?}: {}", temp_path, e),
            ))
        })?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to rename temp file to {:?}: {}", path, e),
            ))
        })
    }

    fn key_from_relative(problem: &str, relative: &Path) -> Option<ArtifactKey> {
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let stage = |dir: &str| Stage::ALL.into_iter().find(|s| s.dir_name() == dir);
        match parts.as_slice() {
            [stage_dir, name] => Some(ArtifactKey::new(
                problem,
                Scope::Problem,
                stage(stage_dir)?,
                name,
            )),
            [stage_dir, sub, name] => Some(ArtifactKey::new(
                problem,
                Scope::SubProblem(sub.clone()),
                stage(stage_dir)?,
                name,
            )),
            _ => None,
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, key: &ArtifactKey) -> Result<bool, StorageError> {
        Ok(self.path_of(key)?.is_file())
    }

    fn read(&self, key: &ArtifactKey) -> Result<String, StorageError> {
        let path = self.path_of(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to read {:?}: {}", path, e),
            ))),
        }
    }

    fn write(
        &self,
        key: &ArtifactKey,
        content: &str,
        mode: WriteMode,
    ) -> Result<WriteOutcome, StorageError> {
        let path = self.path_of(key)?;
        if mode == WriteMode::Create && path.is_file() {
            tracing::debug!(artifact = %key, "Artifact exists, keeping it");
            return Ok(WriteOutcome::Skipped);
        }
        Self::write_atomic(&path, content)?;
        tracing::trace!(artifact = %key, bytes = content.len(), "Artifact written");
        Ok(WriteOutcome::Written)
    }

    fn list(&self, problem: &str) -> Result<Vec<ArtifactKey>, StorageError> {
        validate_segment(problem)?;
        let problem_dir = self.root.join(problem);
        if !problem_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&problem_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to walk {:?}: {}", problem_dir, e),
                ))
            })?;
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.')
            {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&problem_dir) else {
                continue;
            };
            if let Some(key) = Self::key_from_relative(problem, relative) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn write_problem_file(
        &self,
        problem: &str,
        name: &str,
        content: &str,
    ) -> Result<PathBuf, StorageError> {
        let path = self.problem_file_path(problem, name)?;
        Self::write_atomic(&path, content)?;
        Ok(path)
    }

    fn read_problem_file(&self, problem: &str, name: &str) -> Result<Option<String>, StorageError> {
        let path = self.problem_file_path(problem, name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }
}
