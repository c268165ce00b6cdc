//! Pull-request hosting via the GitHub CLI.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

use super::git::describe_failure;
use super::PrHost;
use crate::error::TanukiError;

/// A pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
}

/// [`PrHost`] backed by `gh pr create`.
#[derive(Debug, Clone)]
pub struct GhCli {
    repo: PathBuf,
}

impl GhCli {
    #[must_use]
    pub fn new(repo: impl AsRef<Path>) -> Self {
        Self {
            repo: repo.as_ref().to_path_buf(),
        }
    }
}

impl PrHost for GhCli {
    fn name(&self) -> &str {
        "gh"
    }

    fn available(&self) -> bool {
        which::which("gh").is_ok()
    }

    fn create(&self, request: &PullRequest) -> Result<String> {
        let mut args = vec![
            "pr",
            "create",
            "--base",
            &request.base,
            "--head",
            &request.head,
            "--title",
            &request.title,
            "--body",
            &request.body,
        ];
        if request.draft {
            args.push("--draft");
        }

        debug!("gh pr create --base {} --head {}", request.base, request.head);
        let output = Command::new("gh")
            .args(&args)
            .current_dir(&self.repo)
            .env("GH_PROMPT_DISABLED", "1")
            .output()
            .context("Failed to run gh")?;

        if !output.status.success() {
            bail!("{}", describe_failure("gh pr create", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Build the PR host named by `provider`. `none` (or blank) disables PRs.
///
/// # Errors
///
/// Returns a validation error for an unknown provider name.
pub fn create_pr_host(provider: &str, repo: &Path) -> crate::Result<Option<Arc<dyn PrHost>>> {
    match provider.trim().to_lowercase().as_str() {
        "gh" | "github" => Ok(Some(Arc::new(GhCli::new(repo)))),
        "" | "none" => Ok(None),
        other => Err(TanukiError::validation(format!(
            "Unsupported PR provider: {other}"
        ))),
    }
}
