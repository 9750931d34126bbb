//! Clone validation and source-file enumeration.

use std::collections::HashSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::config::{FileFilterConfig, RepoFilterConfig};
use crate::discovery::RepoId;
use crate::error::PipelineError;
use crate::queue::FileJob;

/// Directories never worth descending into: VCS metadata, dependency trees,
/// build output, and per-language caches.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "third_party",
    "target",
    "build",
    "dist",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".idea",
    ".vscode",
];

/// Whether `path` holds a valid clone: a non-empty directory containing
/// `.git`. This doubles as the acquirer's skip-check and the post-clone
/// validation.
pub fn is_valid_clone(path: &Path) -> bool {
    if !path.is_dir() || !path.join(".git").exists() {
        return false;
    }
    // Non-empty beyond the .git entry itself.
    std::fs::read_dir(path)
        .map(|mut entries| {
            entries.any(|e| {
                e.map(|e| e.file_name() != ".git")
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Extension and size gates for the walk.
#[derive(Debug, Clone)]
pub struct WalkConfig {
    extensions: HashSet<&'static str>,
    min_size_bytes: u64,
    max_size_bytes: u64,
}

impl WalkConfig {
    /// Derives the gates from the configured target languages and file
    /// filter bounds.
    pub fn from_config(repo_filter: &RepoFilterConfig, file_filter: &FileFilterConfig) -> Self {
        Self {
            extensions: crate::analyze::extensions_for_languages(&repo_filter.target_languages),
            min_size_bytes: file_filter.min_size_bytes,
            max_size_bytes: file_filter.max_size_bytes,
        }
    }

    fn accepts(&self, path: &Path, size: u64) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions.contains(ext.to_lowercase().as_str())
            && size >= self.min_size_bytes
            && size <= self.max_size_bytes
    }
}

/// Walks a clone and emits one file job per acceptable regular file.
///
/// Directory-walk order is deterministic (sorted by file name), so within
/// one repository files are enqueued in a stable order. A repository with
/// zero acceptable files yields an empty vector; that is a successful
/// acquisition, not an error.
pub fn enumerate_source_files(
    repo: &RepoId,
    root: &Path,
    config: &WalkConfig,
) -> Result<Vec<FileJob>, PipelineError> {
    let mut jobs = Vec::new();

    let walk = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                !SKIP_DIRS.contains(&name.as_ref())
            } else {
                true
            }
        });

    for entry in walk {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // A single unreadable subtree should not fail the repo.
                tracing::warn!(repo = %repo, error = %e, "Skipping unreadable walk entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if !config.accepts(entry.path(), size) {
            continue;
        }

        let rel_path = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| PipelineError::new(
                crate::error::ErrorKind::ValidationFailed,
                format!("walk escaped clone root: {e}"),
            ))?
            .to_path_buf();

        jobs.push(FileJob::new(
            repo.clone(),
            entry.path().to_path_buf(),
            rel_path,
        ));
    }

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo_id() -> RepoId {
        RepoId::parse("alice/good-lib").expect("valid identity")
    }

    fn walk_config() -> WalkConfig {
        let config = crate::config::PipelineConfig::default();
        let mut wc = WalkConfig::from_config(&config.repo_filter, &config.file_filter);
        wc.min_size_bytes = 1;
        wc
    }

    fn make_clone(root: &Path) {
        fs::create_dir_all(root.join(".git")).expect("git dir");
        fs::create_dir_all(root.join("pkg")).expect("pkg dir");
        fs::write(root.join("main.go"), "package main\n").expect("main.go");
        fs::write(root.join("pkg/conn.go"), "package pkg\n").expect("conn.go");
        fs::write(root.join("README.md"), "# readme\n").expect("readme");
    }

    #[test]
    fn valid_clone_detection() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("repo");

        assert!(!is_valid_clone(&root), "missing directory");

        fs::create_dir_all(&root).expect("mkdir");
        assert!(!is_valid_clone(&root), "no .git");

        fs::create_dir_all(root.join(".git")).expect("git dir");
        assert!(!is_valid_clone(&root), ".git alone is not a clone");

        fs::write(root.join("main.go"), "package main\n").expect("file");
        assert!(is_valid_clone(&root));
    }

    #[test]
    fn walk_emits_source_files_in_sorted_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("repo");
        make_clone(&root);

        let jobs = enumerate_source_files(&repo_id(), &root, &walk_config()).expect("walk");
        let rel: Vec<String> = jobs
            .iter()
            .map(|j| j.rel_path.to_string_lossy().into_owned())
            .collect();

        assert_eq!(rel, vec!["main.go", "pkg/conn.go"]);
    }

    #[test]
    fn walk_skips_vendor_and_git_dirs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("repo");
        make_clone(&root);
        fs::create_dir_all(root.join("node_modules/dep")).expect("nm");
        fs::write(root.join("node_modules/dep/index.js"), "x\n".repeat(10)).expect("dep file");
        fs::create_dir_all(root.join("vendor/lib")).expect("vendor");
        fs::write(root.join("vendor/lib/lib.go"), "package lib\n").expect("vendor file");

        let jobs = enumerate_source_files(&repo_id(), &root, &walk_config()).expect("walk");
        assert!(jobs
            .iter()
            .all(|j| !j.rel_path.starts_with("node_modules") && !j.rel_path.starts_with("vendor")));
    }

    #[test]
    fn walk_applies_size_gate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("repo");
        fs::create_dir_all(root.join(".git")).expect("git dir");
        fs::write(root.join("big.go"), "x".repeat(4096)).expect("big");
        fs::write(root.join("small.go"), "package s\n").expect("small");

        let config = crate::config::PipelineConfig::default();
        let mut wc = WalkConfig::from_config(&config.repo_filter, &config.file_filter);
        wc.min_size_bytes = 1;
        wc.max_size_bytes = 1024;

        let jobs = enumerate_source_files(&repo_id(), &root, &wc).expect("walk");
        let rel: Vec<_> = jobs
            .iter()
            .map(|j| j.rel_path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rel, vec!["small.go"]);
    }

    #[test]
    fn empty_repo_yields_zero_jobs() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("repo");
        fs::create_dir_all(root.join(".git")).expect("git dir");
        fs::write(root.join("README.md"), "docs only\n").expect("readme");

        let jobs = enumerate_source_files(&repo_id(), &root, &walk_config()).expect("walk");
        assert!(jobs.is_empty());
    }

    #[test]
    fn abs_and_rel_paths_agree() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("repo");
        make_clone(&root);

        let jobs = enumerate_source_files(&repo_id(), &root, &walk_config()).expect("walk");
        for job in jobs {
            assert_eq!(root.join(&job.rel_path), job.abs_path);
            assert_eq!(job.repo_identity, repo_id());
        }
    }
}
