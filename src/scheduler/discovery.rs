//! Problem discovery and the inclusion filter.

use crate::error::PipelineError;
use crate::problem::Problem;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Directory the pattern's wildcards start from: the longest literal path prefix.
pub fn pattern_root(workspace: &Path, pattern: &str) -> PathBuf {
    let mut root = workspace.to_path_buf();
    let components: Vec<Component> = Path::new(pattern).components().collect();
    // The final component names the file, never a directory.
    for component in components.iter().take(components.len().saturating_sub(1)) {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        root.push(component);
    }
    root
}

/// Identifier of a matched problem file.
///
/// Files directly under the pattern root are named by their stem; otherwise the
/// containing directory names the problem.
pub fn problem_id(path: &Path, root: &Path) -> Option<String> {
    let parent = path.parent()?;
    let name = if parent == root {
        path.file_stem()?
    } else {
        parent.file_name()?
    };
    Some(name.to_string_lossy().into_owned())
}

/// Find every problem matching `pattern` (relative to `workspace`), sorted by numeric id
/// then name. Unreadable or empty problem files are skipped with a warning.
pub fn discover(workspace: &Path, pattern: &str) -> Result<Vec<Problem>, PipelineError> {
    let full = workspace.join(pattern);
    let full = full.to_string_lossy();
    let entries = glob::glob(&full)
        .map_err(|e| PipelineError::Discovery(format!("invalid pattern '{}': {}", pattern, e)))?;
    let root = pattern_root(workspace, pattern);

    let mut seen = HashSet::new();
    let mut problems = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable match");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let Some(id) = problem_id(&path, &root) else {
            continue;
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable problem file");
                continue;
            }
        };
        if text.trim().is_empty() {
            warn!(path = %path.display(), "Skipping empty problem file");
            continue;
        }
        if !seen.insert(id.clone()) {
            warn!(problem = %id, path = %path.display(), "Duplicate problem id, keeping the first");
            continue;
        }
        let path = dunce::canonicalize(&path).unwrap_or(path);
        debug!(problem = %id, path = %path.display(), "Discovered problem");
        problems.push(Problem::new(id, text, path));
    }

    problems.sort_by(|a, b| {
        (a.numeric_id.unwrap_or(u32::MAX), &a.id).cmp(&(b.numeric_id.unwrap_or(u32::MAX), &b.id))
    });
    Ok(problems)
}

/// Keep problems named by `include` (numeric id, exact id, or path). An empty list keeps
/// everything. Entries matching nothing are reported and ignored.
pub fn filter(problems: Vec<Problem>, include: &[String], workspace: &Path) -> Vec<Problem> {
    if include.is_empty() {
        return problems;
    }

    let mut used = vec![false; include.len()];
    let selected: Vec<Problem> = problems
        .into_iter()
        .filter(|problem| {
            let mut hit = false;
            for (i, entry) in include.iter().enumerate() {
                if matches_entry(problem, entry, workspace) {
                    used[i] = true;
                    hit = true;
                }
            }
            hit
        })
        .collect();

    for (entry, used) in include.iter().zip(used) {
        if !used {
            warn!(entry = %entry, "Inclusion entry matched no discovered problem");
        }
    }
    selected
}

fn matches_entry(problem: &Problem, entry: &str, workspace: &Path) -> bool {
    let entry = entry.trim();
    if let Ok(number) = entry.parse::<u32>() {
        if problem.numeric_id == Some(number) {
            return true;
        }
    }
    if problem.id == entry {
        return true;
    }
    let candidate = workspace.join(entry);
    match dunce::canonicalize(&candidate) {
        Ok(canonical) => canonical == problem.path || canonical == problem.data_dir,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, text: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_pattern_root() {
        let ws = Path::new("/ws");
        assert_eq!(pattern_root(ws, "problems/*/problem.md"), PathBuf::from("/ws/problems"));
        assert_eq!(pattern_root(ws, "problems/*.md"), PathBuf::from("/ws/problems"));
        assert_eq!(pattern_root(ws, "*.txt"), PathBuf::from("/ws"));
    }

    #[test]
    fn test_discover_directory_layout_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "problems/10_late/problem.md", "late");
        write(dir.path(), "problems/2_early/problem.md", "early");
        write(dir.path(), "problems/empty/problem.md", "  ");
        write(dir.path(), "problems/named/problem.md", "named");

        let problems = discover(dir.path(), "problems/*/problem.md").unwrap();
        let ids: Vec<_> = problems.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2_early", "10_late", "named"]);
        assert_eq!(problems[0].numeric_id, Some(2));
        assert!(problems[0].data_dir.ends_with("2_early"));
    }

    #[test]
    fn test_discover_flat_files_use_stem() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "problems/01_alpha.md", "a");
        write(dir.path(), "problems/02_beta.md", "b");
        let problems = discover(dir.path(), "problems/*.md").unwrap();
        let ids: Vec<_> = problems.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["01_alpha", "02_beta"]);
    }

    #[test]
    fn test_invalid_pattern_is_discovery_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            discover(dir.path(), "problems/[/problem.md"),
            Err(PipelineError::Discovery(_))
        ));
    }

    #[test]
    fn test_filter_by_number_name_and_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "problems/01_a/problem.md", "a");
        write(dir.path(), "problems/02_b/problem.md", "b");
        write(dir.path(), "problems/03_c/problem.md", "c");
        let all = discover(dir.path(), "problems/*/problem.md").unwrap();

        let selected = filter(
            all,
            &["1".into(), "03_c".into(), "problems/02_b".into(), "99".into()],
            dir.path(),
        );
        assert_eq!(selected.len(), 3);

        let all = discover(dir.path(), "problems/*/problem.md").unwrap();
        let selected = filter(all, &["2".into()], dir.path());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "02_b");
    }
}
