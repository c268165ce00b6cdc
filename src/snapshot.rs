//! Repository snapshots for prompts: a file listing plus clipped contents of
//! the files that usually explain a project.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::default_ignore_dirs;
use crate::text::clip_with_marker;

/// Maximum number of paths in [`RepoSnapshot::tree`].
pub const MAX_TREE_ENTRIES: usize = 800;

/// Maximum characters kept per important file.
pub const MAX_FILE_CHARS: usize = 12_000;

const TRUNCATION_MARKER: &str = "\n...<truncated>...\n";

/// Root-relative patterns for files worth showing a model in full.
pub const IMPORTANT_PATTERNS: &[&str] = &[
    "README.md",
    "pyproject.toml",
    "package.json",
    "requirements.txt",
    "Makefile",
    "docker-compose.yml",
    "Dockerfile",
    ".env.example",
    "tsconfig.json",
    "vite.config.*",
    "next.config.*",
    "Cargo.toml",
    "src/main.*",
    "src/index.*",
    "src/app.*",
    "main.py",
    "app.py",
];

/// What a model is told about the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub repo_path: PathBuf,
    /// Sorted relative file paths.
    pub tree: Vec<String>,
    /// Relative path to clipped content.
    pub important_files: BTreeMap<String, String>,
}

impl RepoSnapshot {
    /// Tree as newline-separated text, at most `limit` entries.
    #[must_use]
    pub fn tree_text(&self, limit: usize) -> String {
        self.tree
            .iter()
            .take(limit)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Important files as `--- path ---` sections.
    #[must_use]
    pub fn important_text(&self) -> String {
        self.important_files
            .iter()
            .filter(|(_, content)| !content.trim().is_empty())
            .map(|(path, content)| format!("--- {path} ---\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Source of repository snapshots.
pub trait SnapshotProvider: Send + Sync {
    /// Snapshot the repository at `repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be read.
    fn snapshot(&self, repo: &Path) -> Result<RepoSnapshot>;
}

/// Filesystem scanner honouring `.gitignore`.
#[derive(Debug)]
pub struct RepoScanner {
    ignore_dirs: HashSet<&'static str>,
    important: GlobSet,
    max_tree: usize,
}

impl RepoScanner {
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in IMPORTANT_PATTERNS {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .with_context(|| format!("invalid pattern {pattern}"))?;
            builder.add(glob);
        }
        Ok(Self {
            ignore_dirs: default_ignore_dirs(),
            important: builder.build().context("invalid important-file patterns")?,
            max_tree: MAX_TREE_ENTRIES,
        })
    }

    #[must_use]
    pub fn with_max_tree(mut self, max_tree: usize) -> Self {
        self.max_tree = max_tree;
        self
    }
}

impl SnapshotProvider for RepoScanner {
    fn snapshot(&self, repo: &Path) -> Result<RepoSnapshot> {
        let root = repo
            .canonicalize()
            .with_context(|| format!("Repository not found: {}", repo.display()))?;

        let ignore_dirs = self.ignore_dirs.clone();
        let walker = WalkBuilder::new(&root)
            .hidden(false)
            .require_git(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| ignore_dirs.contains(name)))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker.flatten() {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        files.sort();

        let mut important_files = BTreeMap::new();
        for rel in &files {
            if self.important.is_match(rel) {
                if let Ok(text) = std::fs::read(root.join(rel)) {
                    let text = String::from_utf8_lossy(&text);
                    important_files.insert(
                        rel.clone(),
                        clip_with_marker(&text, MAX_FILE_CHARS, TRUNCATION_MARKER),
                    );
                }
            }
        }

        files.truncate(self.max_tree);
        debug!(
            "Snapshot of {}: {} paths, {} important files",
            root.display(),
            files.len(),
            important_files.len()
        );

        Ok(RepoSnapshot {
            repo_path: root,
            tree: files,
            important_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_tree_skips_ignored_dirs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/lib.rs", "x");
        write(temp.path(), "node_modules/pkg/index.js", "x");
        write(temp.path(), "target/debug/out", "x");
        write(temp.path(), ".env.example", "KEY=");

        let snap = RepoScanner::new().unwrap().snapshot(temp.path()).unwrap();
        assert_eq!(snap.tree, vec![".env.example".to_string(), "src/lib.rs".to_string()]);
    }

    #[test]
    fn test_honours_gitignore() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), ".gitignore", "secret.txt\n");
        write(temp.path(), "secret.txt", "x");
        write(temp.path(), "kept.txt", "x");

        let snap = RepoScanner::new().unwrap().snapshot(temp.path()).unwrap();
        assert!(snap.tree.contains(&"kept.txt".to_string()));
        assert!(!snap.tree.contains(&"secret.txt".to_string()));
    }

    #[test]
    fn test_important_files_matched_at_root_only() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "README.md", "# Demo");
        write(temp.path(), "docs/README.md", "# Nested");
        write(temp.path(), "src/main.ts", "main()");
        write(temp.path(), "vite.config.ts", "export default {}");

        let snap = RepoScanner::new().unwrap().snapshot(temp.path()).unwrap();
        let keys: Vec<_> = snap.important_files.keys().cloned().collect();
        assert_eq!(keys, vec!["README.md", "src/main.ts", "vite.config.ts"]);
        assert!(snap.important_text().contains("--- README.md ---\n# Demo"));
    }

    #[test]
    fn test_important_files_are_clipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "README.md", &"a".repeat(MAX_FILE_CHARS + 10));
        let snap = RepoScanner::new().unwrap().snapshot(temp.path()).unwrap();
        let readme = &snap.important_files["README.md"];
        assert!(readme.ends_with(TRUNCATION_MARKER));
        assert_eq!(readme.chars().count(), MAX_FILE_CHARS + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_tree_is_capped() {
        let temp = TempDir::new().unwrap();
        for i in 0..20 {
            write(temp.path(), &format!("f{i:02}.txt"), "x");
        }
        let snap = RepoScanner::new()
            .unwrap()
            .with_max_tree(5)
            .snapshot(temp.path())
            .unwrap();
        assert_eq!(snap.tree.len(), 5);
        assert_eq!(snap.tree[0], "f00.txt");
        assert_eq!(snap.tree_text(2), "f00.txt\nf01.txt");
    }
}
