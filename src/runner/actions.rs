//! Canned local actions tried before asking a model for a diff.
//!
//! An action is keyed on a title pattern and only fires when the files it
//! would create are missing; otherwise the task falls through to the diff
//! engine so a title like "Add footer to index.html" is not swallowed.

use regex::Regex;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::task::Task;

/// Action body: create files under the repository root. Returns whether
/// anything was written.
type ActionFn = fn(&Path, &Task) -> std::io::Result<bool>;

/// A title pattern bound to a local action.
pub struct LocalAction {
    pub name: &'static str,
    pattern: Regex,
    run: ActionFn,
}

impl std::fmt::Debug for LocalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAction")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl LocalAction {
    #[must_use]
    pub fn matches(&self, title: &str) -> bool {
        self.pattern.is_match(title)
    }
}

/// Ordered catalogue of local actions.
#[derive(Debug)]
pub struct LocalActions {
    actions: Vec<LocalAction>,
}

impl Default for LocalActions {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LocalActions {
    /// The built-in catalogue.
    #[must_use]
    pub fn builtin() -> Self {
        let table: [(&'static str, &str, ActionFn); 2] = [
            (
                "initialize-repository",
                r"(?i)\b(initiali[sz]e|init|bootstrap|set ?up)\b.*\b(repo|repository)\b",
                init_repository,
            ),
            (
                "base-page",
                r"(?i)\b(base|landing|home) page\b|\bindex\.html\b",
                base_page,
            ),
        ];
        let actions = table
            .into_iter()
            .filter_map(|(name, pattern, run)| {
                Regex::new(pattern)
                    .ok()
                    .map(|pattern| LocalAction { name, pattern, run })
            })
            .collect();
        Self { actions }
    }

    /// A catalogue that never matches.
    #[must_use]
    pub fn none() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Run the first action matching the task title.
    ///
    /// Returns the action name when one wrote files, `None` when no action
    /// applies.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a matching action fails to write.
    pub fn try_apply(&self, task: &Task, repo: &Path) -> Result<Option<&'static str>> {
        for action in self.actions.iter().filter(|a| a.matches(&task.title)) {
            if (action.run)(repo, task)? {
                info!("Task {} handled by local action {}", task.id, action.name);
                return Ok(Some(action.name));
            }
        }
        Ok(None)
    }
}

fn repo_name(repo: &Path) -> String {
    repo.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

/// Write `content` to `path` unless it exists. Returns whether it wrote.
fn create_if_missing(path: &Path, content: &str) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(path, content)?;
    Ok(true)
}

fn init_repository(repo: &Path, task: &Task) -> std::io::Result<bool> {
    let mut readme = format!("# {}\n", repo_name(repo));
    if !task.description.is_empty() {
        readme.push('\n');
        readme.push_str(&task.description);
        readme.push('\n');
    }
    let wrote_readme = create_if_missing(&repo.join("README.md"), &readme)?;
    let wrote_ignore = create_if_missing(
        &repo.join(".gitignore"),
        ".DS_Store\nnode_modules/\n.venv/\n__pycache__/\ndist/\nbuild/\n.env\n",
    )?;
    Ok(wrote_readme || wrote_ignore)
}

fn base_page(repo: &Path, _task: &Task) -> std::io::Result<bool> {
    let name = repo_name(repo);
    let html = format!(
        "<!doctype html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         \x20 <meta charset=\"utf-8\" />\n\
         \x20 <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n\
         \x20 <title>{name}</title>\n\
         </head>\n\
         <body>\n\
         \x20 <main>\n\
         \x20   <h1>{name}</h1>\n\
         \x20 </main>\n\
         </body>\n\
         </html>\n"
    );
    create_if_missing(&repo.join("index.html"), &html)
}
