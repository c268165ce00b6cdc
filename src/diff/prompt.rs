//! Prompts for diff generation and repair.

use std::path::Path;

use crate::snapshot::RepoSnapshot;
use crate::text::clip_with_marker;

pub const DIFF_ONLY_SYSTEM: &str = "You are a code-change engine.\n\
You MUST return ONLY a unified diff that can be applied with `git apply`.\n\
No explanations. No prose.\n\
Prefer `diff --git a/... b/...` format.\n\
If you include a code fence, it must be a single ```diff or ```patch block.\n\
The diff must be a valid unified diff.\n";

const TRUNCATED: &str = "\n\n(TRUNCATED)\n";
const ARCHITECTURE_CHARS: usize = 20_000;
const PREVIOUS_DIFF_CHARS: usize = 12_000;
const ERROR_CHARS: usize = 2_000;
const TREE_ENTRIES: usize = 300;

/// Repository files whose current content is always shown, with their
/// character budgets.
const KEY_FILES: &[(&str, usize)] = &[("index.html", 18_000), ("README.md", 12_000)];

/// Current state of the repository as shown to the change engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeContext {
    pub architecture: String,
    pub has_package_json: bool,
    pub has_pyproject_toml: bool,
    /// `(path, clipped content)` for each key file; empty when absent.
    pub files: Vec<(String, String)>,
    pub tree: String,
}

impl ChangeContext {
    /// Read key files from `repo` and clip everything to its budget.
    #[must_use]
    pub fn gather(repo: &Path, architecture: &str, snapshot: Option<&RepoSnapshot>) -> Self {
        let files = KEY_FILES
            .iter()
            .map(|(name, limit)| {
                let content = std::fs::read_to_string(repo.join(name)).unwrap_or_default();
                ((*name).to_string(), clip_with_marker(&content, *limit, TRUNCATED))
            })
            .collect();

        Self {
            architecture: clip_with_marker(architecture, ARCHITECTURE_CHARS, TRUNCATED),
            has_package_json: repo.join("package.json").is_file(),
            has_pyproject_toml: repo.join("pyproject.toml").is_file(),
            files,
            tree: snapshot.map(|s| s.tree_text(TREE_ENTRIES)).unwrap_or_default(),
        }
    }
}

/// First-attempt prompt for a task.
#[must_use]
pub fn build_change_prompt(title: &str, description: &str, context: &ChangeContext) -> String {
    let description = if description.trim().is_empty() {
        "(no description)"
    } else {
        description.trim()
    };

    let mut prompt = format!(
        "Return a unified diff suitable for `git apply`.\n\
         Rules:\n\
         - Output ONLY the diff.\n\
         - Prefer `diff --git a/... b/...` format.\n\
         - No explanations.\n\
         - The diff MUST apply to the CURRENT repo state shown below.\n\n\
         Task title:\n{title}\n\n\
         Task description:\n{description}\n\n\
         Repo hints:\n\
         - has_package_json: {pkg}\n\
         - has_pyproject_toml: {py}\n\n",
        pkg = context.has_package_json,
        py = context.has_pyproject_toml,
    );

    if !context.tree.is_empty() {
        prompt.push_str(&format!("Repo tree (truncated):\n{}\n\n", context.tree));
    }
    for (name, content) in &context.files {
        prompt.push_str(&format!("CURRENT {name}:\n-----\n{content}\n-----\n\n"));
    }
    prompt.push_str(&format!(
        "Project architecture (may be truncated):\n{}\n",
        context.architecture
    ));
    prompt
}

/// Prompt asking for a corrected version of a diff that failed to apply.
#[must_use]
pub fn build_repair_prompt(previous_diff: &str, error: &str) -> String {
    format!(
        "The previous diff was invalid and could not be applied with `git apply`.\n\
         Return ONLY a corrected unified diff that applies cleanly.\n\
         No explanations.\n\n\
         git apply error:\n{error}\n\n\
         Previous diff to repair:\n{previous}\n",
        error = clip_with_marker(error, ERROR_CHARS, "\n(TRUNCATED)\n"),
        previous = clip_with_marker(previous_diff, PREVIOUS_DIFF_CHARS, TRUNCATED),
    )
}
