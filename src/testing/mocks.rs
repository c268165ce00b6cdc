//! Mock implementations of the external command surfaces.
//!
//! These mocks provide controllable test doubles for git, the PR host and
//! the repository scanner, enabling deterministic runner tests.

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::snapshot::{RepoSnapshot, SnapshotProvider};
use crate::vcs::{PrHost, PullRequest, Vcs};

fn locked<T: Clone + Default>(mutex: &Mutex<T>) -> T {
    mutex.lock().map(|g| g.clone()).unwrap_or_default()
}

/// Consume one scripted failure, returning whether the call should fail.
fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// =============================================================================
// Git
// =============================================================================

/// In-memory git repository.
///
/// Branches and the current branch are tracked so base resolution and
/// branch resumption behave like the real thing. Mutating calls are
/// recorded as short strings (`checkout main`, `checkout -b task/1-x`,
/// `commit ...`) and read back with [`MockVcs::calls`].
///
/// # Example
///
/// ```rust,ignore
/// let vcs = MockVcs::new()
///     .with_remote("origin")
///     .with_staged(&["src/lib.rs"]);
///
/// assert!(vcs.has_remote("origin"));
/// ```
#[derive(Debug)]
pub struct MockVcs {
    status: String,
    remote: Option<String>,
    default_branch: Option<String>,
    staged: Vec<String>,
    branches: Mutex<Vec<String>>,
    current: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
    commits: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    apply_check_failures: AtomicU32,
    apply_check_error: String,
    commit_failures: AtomicU32,
    commit_error: String,
}

impl Default for MockVcs {
    fn default() -> Self {
        Self {
            status: String::new(),
            remote: None,
            default_branch: None,
            staged: Vec::new(),
            branches: Mutex::new(vec!["main".to_string()]),
            current: Mutex::new(Some("main".to_string())),
            calls: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            apply_check_failures: AtomicU32::new(0),
            apply_check_error: String::new(),
            commit_failures: AtomicU32::new(0),
            commit_error: String::new(),
        }
    }
}

impl MockVcs {
    /// A clean repository with a single `main` branch and no remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a remote.
    #[must_use]
    pub fn with_remote(mut self, remote: &str) -> Self {
        self.remote = Some(remote.to_string());
        self
    }

    /// Set the branch the remote advertises as its default.
    #[must_use]
    pub fn with_default_branch(mut self, branch: &str) -> Self {
        self.default_branch = Some(branch.to_string());
        self
    }

    /// Paths reported as staged after `add_all`.
    #[must_use]
    pub fn with_staged(mut self, paths: &[&str]) -> Self {
        self.staged = paths.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Porcelain status output, making the tree dirty.
    #[must_use]
    pub fn with_dirty(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    /// Replace the set of local branches.
    #[must_use]
    pub fn with_branches(self, branches: &[&str]) -> Self {
        if let Ok(mut guard) = self.branches.lock() {
            *guard = branches.iter().map(|b| (*b).to_string()).collect();
        }
        self
    }

    #[must_use]
    pub fn with_current_branch(self, branch: &str) -> Self {
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(branch.to_string());
        }
        self
    }

    /// Simulate a detached or unborn HEAD.
    #[must_use]
    pub fn without_current_branch(self) -> Self {
        if let Ok(mut guard) = self.current.lock() {
            *guard = None;
        }
        self
    }

    /// Fail the next `count` calls to `apply_check` with `message`.
    #[must_use]
    pub fn with_apply_check_failures(mut self, count: u32, message: &str) -> Self {
        self.apply_check_failures = AtomicU32::new(count);
        self.apply_check_error = message.to_string();
        self
    }

    /// Fail the next `count` commits with `message`.
    #[must_use]
    pub fn with_commit_failures(mut self, count: u32, message: &str) -> Self {
        self.commit_failures = AtomicU32::new(count);
        self.commit_error = message.to_string();
        self
    }

    /// Mutating calls in order.
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls)
    }

    /// Messages of successful commits.
    pub fn commits(&self) -> Vec<String> {
        locked(&self.commits)
    }

    /// Successful pushes as `<remote> <branch>`.
    pub fn pushes(&self) -> Vec<String> {
        locked(&self.pushes)
    }

    /// Patches applied to the working tree.
    pub fn applied(&self) -> Vec<String> {
        locked(&self.applied)
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn set_current(&self, branch: &str) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(branch.to_string());
        }
    }
}

impl Vcs for MockVcs {
    fn status_porcelain(&self) -> Result<String> {
        Ok(self.status.clone())
    }

    fn current_branch(&self) -> Result<String> {
        match locked(&self.current) {
            Some(branch) => Ok(branch),
            None => bail!("HEAD is detached"),
        }
    }

    fn default_remote_branch(&self, _remote: &str) -> Option<String> {
        self.default_branch.clone()
    }

    fn has_remote(&self, remote: &str) -> bool {
        self.remote.as_deref() == Some(remote)
    }

    fn branch_exists(&self, branch: &str) -> bool {
        locked(&self.branches).iter().any(|b| b == branch)
    }

    fn fetch(&self, remote: &str) -> Result<()> {
        self.record(format!("fetch {remote}"));
        Ok(())
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        if !self.branch_exists(branch) {
            bail!("error: pathspec '{branch}' did not match any file(s) known to git");
        }
        self.record(format!("checkout {branch}"));
        self.set_current(branch);
        Ok(())
    }

    fn checkout_new(&self, branch: &str) -> Result<()> {
        if self.branch_exists(branch) {
            bail!("fatal: a branch named '{branch}' already exists");
        }
        self.record(format!("checkout -b {branch}"));
        if let Ok(mut branches) = self.branches.lock() {
            branches.push(branch.to_string());
        }
        self.set_current(branch);
        Ok(())
    }

    fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()> {
        self.record(format!("pull {remote} {branch}"));
        Ok(())
    }

    fn add_all(&self) -> Result<()> {
        self.record("add -A".to_string());
        Ok(())
    }

    fn staged_files(&self) -> Result<Vec<String>> {
        Ok(self.staged.clone())
    }

    fn commit(&self, message: &str) -> Result<()> {
        if take_failure(&self.commit_failures) {
            bail!("{}", self.commit_error);
        }
        self.record(format!("commit {message}"));
        if let Ok(mut commits) = self.commits.lock() {
            commits.push(message.to_string());
        }
        Ok(())
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let entry = format!("{remote} {branch}");
        self.record(format!("push {entry}"));
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.push(entry);
        }
        Ok(())
    }

    fn apply_check(&self, _patch: &str) -> Result<()> {
        if take_failure(&self.apply_check_failures) {
            bail!("{}", self.apply_check_error);
        }
        Ok(())
    }

    fn apply(&self, patch: &str) -> Result<()> {
        self.record("apply".to_string());
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(patch.to_string());
        }
        Ok(())
    }

    fn discard_changes(&self) -> Result<()> {
        self.record("discard".to_string());
        Ok(())
    }
}

// =============================================================================
// Pull requests
// =============================================================================

/// PR host that records requests and hands back numbered URLs.
#[derive(Debug)]
pub struct MockPrHost {
    available: bool,
    error: Option<String>,
    requests: Mutex<Vec<PullRequest>>,
    call_count: AtomicU32,
}

impl Default for MockPrHost {
    fn default() -> Self {
        Self {
            available: true,
            error: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockPrHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the provider tooling as missing.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Reject every request with `message`.
    #[must_use]
    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    pub fn requests(&self) -> Vec<PullRequest> {
        locked(&self.requests)
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl PrHost for MockPrHost {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        self.available
    }

    fn create(&self, request: &PullRequest) -> Result<String> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.error {
            bail!("{message}");
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(format!("https://example.test/pr/{n}"))
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Snapshot provider returning a fixed tree.
#[derive(Debug, Clone, Default)]
pub struct MockSnapshotProvider {
    tree: Vec<String>,
    files: BTreeMap<String, String>,
    error: Option<String>,
}

impl MockSnapshotProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tree(mut self, paths: &[&str]) -> Self {
        self.tree = paths.iter().map(|p| (*p).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    /// Fail every snapshot with `message`.
    #[must_use]
    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }
}

impl SnapshotProvider for MockSnapshotProvider {
    fn snapshot(&self, repo: &Path) -> Result<RepoSnapshot> {
        if let Some(message) = &self.error {
            bail!("{message}");
        }
        Ok(RepoSnapshot {
            repo_path: repo.to_path_buf(),
            tree: self.tree.clone(),
            important_files: self.files.clone(),
        })
    }
}
