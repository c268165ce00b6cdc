//! Version-control and pull-request hosting surfaces.
//!
//! These traits abstract the two external command surfaces the runner
//! drives, so runner logic can be tested without real repositories or a
//! hosting CLI. Implementations return `anyhow::Result`; the runner maps
//! failures into [`crate::error::TanukiError::GitState`].

pub mod git;
pub mod pr;

use anyhow::Result;

pub use git::GitCli;
pub use pr::{create_pr_host, GhCli, PullRequest};

/// Abstraction for the git operations the runner needs.
///
/// # Example
///
/// ```rust,ignore
/// use tanuki::vcs::Vcs;
///
/// fn ready(vcs: &dyn Vcs) -> bool {
///     vcs.is_clean().unwrap_or(false)
/// }
/// ```
pub trait Vcs: Send + Sync {
    /// Output of `git status --porcelain`.
    ///
    /// # Errors
    ///
    /// Returns an error if not in a repository.
    fn status_porcelain(&self) -> Result<String>;

    /// Whether the working tree has no changes at all (untracked included).
    ///
    /// # Errors
    ///
    /// Returns an error if status cannot be read.
    fn is_clean(&self) -> Result<bool> {
        Ok(self.status_porcelain()?.trim().is_empty())
    }

    /// Name of the checked-out branch.
    ///
    /// # Errors
    ///
    /// Returns an error on a detached HEAD or outside a repository.
    fn current_branch(&self) -> Result<String>;

    /// Default branch advertised by `remote`, if known locally.
    fn default_remote_branch(&self, remote: &str) -> Option<String>;

    /// Whether `remote` is configured.
    fn has_remote(&self, remote: &str) -> bool;

    /// Whether a local branch named `branch` exists.
    fn branch_exists(&self, branch: &str) -> bool;

    /// Fetch all remotes, pruning deleted branches.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    fn fetch(&self, remote: &str) -> Result<()>;

    /// Check out an existing branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch does not exist or checkout fails.
    fn checkout(&self, branch: &str) -> Result<()>;

    /// Create and check out a new branch from HEAD.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch exists or creation fails.
    fn checkout_new(&self, branch: &str) -> Result<()>;

    /// Fast-forward `branch` from `remote`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull is not a fast-forward or fails.
    fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()>;

    /// Stage everything, untracked files included.
    ///
    /// # Errors
    ///
    /// Returns an error if staging fails.
    fn add_all(&self) -> Result<()>;

    /// Paths currently staged for commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    fn staged_files(&self) -> Result<Vec<String>>;

    /// Commit the staged changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn commit(&self, message: &str) -> Result<()>;

    /// Push `branch` to `remote`, setting upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the push is rejected or the remote is unreachable.
    fn push(&self, remote: &str, branch: &str) -> Result<()>;

    /// Dry-run a patch against the working tree.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the full command output if the patch does
    /// not apply.
    fn apply_check(&self, patch: &str) -> Result<()>;

    /// Apply a patch to the working tree.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the full command output on failure.
    fn apply(&self, patch: &str) -> Result<()>;

    /// Drop uncommitted changes and untracked files. Ignored files stay.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset or clean fails.
    fn discard_changes(&self) -> Result<()>;
}

/// Abstraction for a pull/merge request hosting service.
pub trait PrHost: Send + Sync {
    /// Provider name as configured (e.g. `gh`).
    fn name(&self) -> &str;

    /// Whether the provider's tooling is usable right now.
    fn available(&self) -> bool;

    /// Open a request and return its reference (usually a URL).
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request.
    fn create(&self, request: &PullRequest) -> Result<String>;
}
