//! Runner state machine.
//!
//! One task at a time moves `todo → doing → {review | done}`; any failure
//! after the `doing` checkpoint leaves it `blocked` with the error text as
//! its reason.
//!
//! ```text
//! select ─> doing (saved) ─> clean tree ─> base ─> task branch
//!                                                      │
//!        local action ─┬─ none matched ─> diff engine ─┤
//!                      └───────────────────────────────┤
//!                                                      ▼
//!                 checks ─> commit ─> push ─> PR ─> review/done
//! ```
//!
//! - [`actions`] - canned local actions keyed on the title
//! - [`unblock`] - auto-unblock classifier
//! - [`recovery`] - stale `doing` reset
//! - [`runlog`] - `runs/<ts>-<id>/run.md` records
//! - [`driver`] - the continuous loop

pub mod actions;
pub mod driver;
pub mod recovery;
pub mod runlog;
pub mod unblock;

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use actions::{LocalAction, LocalActions};
pub use driver::{BlockedSummary, LoopSummary, PassRecord, StopReason, BLOCKED_SUMMARY_LIMIT};
pub use recovery::reset_stale_doing;
pub use runlog::RunLog;
pub use unblock::{TransientCause, UnblockClassifier, Unblocked};

use crate::config::RunnerConfig;
use crate::diff::{AppliedPatch, ChangeContext, ChangeRequest, DiffEngine};
use crate::error::{IntoTanukiError, Result, TanukiError};
use crate::llm::LlmClient;
use crate::persist::read_optional;
use crate::process::run_shell;
use crate::snapshot::SnapshotProvider;
use crate::task::{Status, Task, TaskId};
use crate::text::{clip_chars, preview, slugify};
use crate::vcs::{PrHost, PullRequest, Vcs};
use crate::workspace::ProjectContext;

/// Characters of check output kept in a block reason.
const CHECK_OUTPUT_CHARS: usize = 4000;

/// Maximum slug length in branch names.
const BRANCH_SLUG_CHARS: usize = 50;

/// Default daemon poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Inputs
// ============================================================================

/// External collaborators the runner drives.
#[derive(Clone)]
pub struct RunnerDeps {
    pub vcs: Arc<dyn Vcs>,
    /// `None` disables pull requests regardless of [`RunOptions::create_pr`].
    pub pr: Option<Arc<dyn PrHost>>,
    pub llm: Arc<dyn LlmClient>,
    pub snapshot: Arc<dyn SnapshotProvider>,
}

/// Invocation parameters for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Task passes allowed before stopping; `None` means no ceiling.
    pub max_tasks: Option<usize>,
    pub create_pr: bool,
    /// Continue with the next task after a failure.
    pub keep_going: bool,
    /// Record what would happen without touching the task or repository.
    pub dry_run: bool,
    /// Treat "only blocked tasks left" as drained instead of halting.
    pub ignore_blocked: bool,
    /// Poll for new tasks instead of stopping when none are left.
    pub daemon: bool,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_tasks: None,
            create_pr: true,
            keep_going: true,
            dry_run: false,
            ignore_blocked: false,
            daemon: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn with_max_tasks(mut self, max: usize) -> Self {
        self.max_tasks = Some(max);
        self
    }

    #[must_use]
    pub fn with_create_pr(mut self, create_pr: bool) -> Self {
        self.create_pr = create_pr;
        self
    }

    #[must_use]
    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_ignore_blocked(mut self, ignore_blocked: bool) -> Self {
        self.ignore_blocked = ignore_blocked;
        self
    }

    #[must_use]
    pub fn with_daemon(mut self, poll_interval: Duration) -> Self {
        self.daemon = true;
        self.poll_interval = poll_interval;
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// How a task's change was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSource {
    LocalAction(&'static str),
    Patch { attempts: u32 },
}

/// A task that finished its pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub title: String,
    pub base: String,
    pub branch: String,
    /// `review` when the branch was published, `done` otherwise.
    pub status: Status,
    pub change: ChangeSource,
    pub committed: bool,
    pub pushed: bool,
    pub pr: Option<String>,
    pub run_dir: PathBuf,
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing to select.
    NoTodo,
    DryRun {
        task_id: TaskId,
        branch: String,
        run_dir: PathBuf,
    },
    Completed(TaskReport),
}

/// Deterministic branch name for a task.
#[must_use]
pub fn branch_name(task: &Task) -> String {
    format!(
        "task/{}-{}",
        task.id,
        slugify(&task.title, BRANCH_SLUG_CHARS, "task")
    )
}

/// Commit message and pull-request title.
#[must_use]
pub fn commit_title(task: &Task) -> String {
    format!("task {}: {}", task.id, task.title)
}

fn pr_body(task: &Task) -> String {
    format!("Automated change for task {}.\n\nStatus: review required.", task.id)
}

fn push_unique(candidates: &mut Vec<String>, name: Option<String>) {
    if let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        if !candidates.contains(&name) {
            candidates.push(name);
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Executes backlog tasks for one project.
pub struct Runner {
    ctx: ProjectContext,
    config: RunnerConfig,
    deps: RunnerDeps,
    actions: LocalActions,
    classifier: UnblockClassifier,
}

impl Runner {
    pub fn new(ctx: ProjectContext, config: RunnerConfig, deps: RunnerDeps) -> Self {
        Self {
            ctx,
            config,
            deps,
            actions: LocalActions::builtin(),
            classifier: UnblockClassifier::new(),
        }
    }

    #[must_use]
    pub fn with_actions(mut self, actions: LocalActions) -> Self {
        self.actions = actions;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: UnblockClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Load, mutate and save a single task.
    fn set_status(&self, id: TaskId, status: Status, reason: Option<&str>) -> Result<()> {
        self.ctx.store().set_status(id, status, reason).map(|_| ())
    }

    /// Stale `doing` recovery plus the auto-unblock classifier, saved
    /// together.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be loaded or saved.
    pub async fn prepare_pass(&self) -> Result<(Vec<TaskId>, Vec<Unblocked>)> {
        let capability = self.deps.llm.available().await;
        let grace = chrono::Duration::minutes(
            i64::try_from(self.config.stale_doing_minutes).unwrap_or(i64::MAX / 60_000),
        );
        self.ctx.store().update(|backlog| {
            let now = Utc::now();
            let recovered = reset_stale_doing(backlog, grace, now);
            let unblocked = self.classifier.unblock(backlog, capability, now);
            Ok((recovered, unblocked))
        })
    }

    /// Run the auto-unblock classifier alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be loaded or saved.
    pub async fn auto_unblock(&self) -> Result<Vec<Unblocked>> {
        let capability = self.deps.llm.available().await;
        self.ctx
            .store()
            .update(|backlog| Ok(self.classifier.unblock(backlog, capability, Utc::now())))
    }

    /// One pass: prepare, select the next task and run it.
    ///
    /// # Errors
    ///
    /// Returns the task's error after recording it as `blocked`, or a
    /// backlog error.
    pub async fn run_once(&self, options: &RunOptions) -> Result<PassOutcome> {
        self.prepare_pass().await?;
        let backlog = self.ctx.store().load()?;
        match backlog.select_next() {
            Some(task) => self.run_task(task.clone(), options).await,
            None => Ok(PassOutcome::NoTodo),
        }
    }

    /// Run the single-task protocol for `task`.
    ///
    /// # Errors
    ///
    /// Any failure after the `doing` checkpoint blocks the task with the
    /// error text and is then returned.
    pub async fn run_task(&self, task: Task, options: &RunOptions) -> Result<PassOutcome> {
        let branch = branch_name(&task);
        let mut log = RunLog::new(&self.ctx.runs_dir(), Utc::now());
        log.field("task_id", task.id);
        log.field("title", &task.title);
        log.field("repo", self.ctx.repo_path().display());
        log.field("base_branch", &self.config.base_branch);
        log.field("remote", &self.config.remote);
        log.field("checks", format!("{:?}", self.config.checks));
        log.field("create_pr", options.create_pr);
        log.field("dry_run", options.dry_run);

        if options.dry_run {
            log.field("branch", &branch);
            log.field("status", "dry-run");
            log.write()?;
            info!("Dry run: task {} would run on {}", task.id, branch);
            return Ok(PassOutcome::DryRun {
                task_id: task.id,
                branch,
                run_dir: log.dir().to_path_buf(),
            });
        }

        self.set_status(task.id, Status::Doing, None)?;
        info!("Task {} -> doing: {}", task.id, task.title);

        match self.execute(&task, &branch, options, &mut log).await {
            Ok(mut report) => {
                self.set_status(task.id, report.status, None)?;
                info!("Task {} -> {}", task.id, report.status);
                log.field("status", report.status);
                if let Err(e) = log.write() {
                    warn!("Could not write run record: {}", e);
                }
                report.run_dir = log.dir().to_path_buf();
                Ok(PassOutcome::Completed(report))
            }
            Err(err) => {
                let reason = err.reason();
                warn!("Task {} -> blocked: {}", task.id, preview(&reason, 200));
                if let Err(save_err) = self.set_status(task.id, Status::Blocked, Some(&reason)) {
                    warn!("Could not record blocked state for task {}: {}", task.id, save_err);
                }
                log.field("status", "blocked");
                log.line(reason);
                if let Err(e) = log.write() {
                    warn!("Could not write run record: {}", e);
                }
                Err(err)
            }
        }
    }

    /// Steps 2 to 9 of the protocol. The tree is only touched after the
    /// clean check passes, so cleanup on failure never drops user work.
    async fn execute(
        &self,
        task: &Task,
        branch: &str,
        options: &RunOptions,
        log: &mut RunLog,
    ) -> Result<TaskReport> {
        let vcs = self.deps.vcs.as_ref();

        if !vcs.is_clean().into_git_state("status")? {
            return Err(TanukiError::git_state(
                "status",
                "Working tree is not clean. Commit or stash your changes before running tanuki run.",
            ));
        }

        let base = self.checkout_base()?;
        log.field("base", &base);

        if vcs.branch_exists(branch) {
            info!("Resuming existing branch {}", branch);
            vcs.checkout(branch).into_git_state("checkout")?;
        } else {
            vcs.checkout_new(branch).into_git_state("checkout")?;
        }
        log.field("branch", branch);

        let result = self.produce(task, branch, &base, options, log).await;
        if result.is_err() {
            self.restore_base(&base, log);
        }
        result
    }

    /// Steps 5 to 9, run on the task branch.
    async fn produce(
        &self,
        task: &Task,
        branch: &str,
        base: &str,
        options: &RunOptions,
        log: &mut RunLog,
    ) -> Result<TaskReport> {
        let vcs = self.deps.vcs.as_ref();
        let repo = self.ctx.repo_path();

        let change = match self.actions.try_apply(task, repo)? {
            Some(name) => {
                log.field("action", name);
                ChangeSource::LocalAction(name)
            }
            None => {
                let applied = self.generate_change(task, log).await?;
                log.field("patch_attempts", applied.attempts);
                ChangeSource::Patch {
                    attempts: applied.attempts,
                }
            }
        };

        self.run_checks(log).await?;

        let title = commit_title(task);
        let mut report = TaskReport {
            task_id: task.id,
            title: task.title.clone(),
            base: base.to_string(),
            branch: branch.to_string(),
            status: Status::Done,
            change,
            committed: false,
            pushed: false,
            pr: None,
            run_dir: log.dir().to_path_buf(),
        };

        vcs.add_all().into_git_state("add")?;
        let staged = vcs.staged_files().into_git_state("diff")?;
        if staged.is_empty() {
            info!("Task {} produced no changes; nothing to commit", task.id);
            log.line("commit: nothing to commit");
            return Ok(report);
        }
        vcs.commit(&title).into_git_state("commit")?;
        report.committed = true;
        log.field("committed_files", staged.len());

        if !vcs.has_remote(&self.config.remote) {
            log.line("push: skipped (no remote)");
            return Ok(report);
        }
        vcs.push(&self.config.remote, branch).into_git_state("push")?;
        report.pushed = true;
        report.status = Status::Review;

        if options.create_pr {
            report.pr = self.open_pr(task, branch, &title)?;
        } else {
            log.line("pr: skipped");
        }
        if let Some(reference) = &report.pr {
            log.field("pr", reference);
        }
        Ok(report)
    }

    /// Drop what a failed pass left on its task branch and return to
    /// `base`. Commits already on the branch are kept for the next attempt.
    fn restore_base(&self, base: &str, log: &mut RunLog) {
        let vcs = self.deps.vcs.as_ref();
        match vcs.discard_changes().and_then(|()| vcs.checkout(base)) {
            Ok(()) => {
                debug!("Discarded uncommitted changes; back on {}", base);
                log.line(format!("cleanup: back on {base}"));
            }
            Err(e) => warn!("Could not restore {} after a failed pass: {:#}", base, e),
        }
    }

    /// Check out the first usable base: configured, remote default,
    /// `master`, current; otherwise create the configured one.
    fn checkout_base(&self) -> Result<String> {
        let vcs = self.deps.vcs.as_ref();
        let remote = &self.config.remote;
        let has_remote = vcs.has_remote(remote);

        if has_remote {
            if let Err(e) = vcs.fetch(remote) {
                warn!("Fetch from {} failed: {:#}", remote, e);
            }
        }

        let mut candidates = Vec::new();
        push_unique(&mut candidates, Some(self.config.base_branch.clone()));
        if has_remote {
            push_unique(&mut candidates, vcs.default_remote_branch(remote));
        }
        push_unique(&mut candidates, Some("master".to_string()));
        push_unique(&mut candidates, vcs.current_branch().ok());

        for candidate in candidates {
            match vcs.checkout(&candidate) {
                Ok(()) => {
                    if has_remote {
                        if let Err(e) = vcs.pull_ff_only(remote, &candidate) {
                            debug!("Pull of {} skipped: {:#}", candidate, e);
                        }
                    }
                    info!("Base branch: {}", candidate);
                    return Ok(candidate);
                }
                Err(e) => debug!("Base candidate {} unusable: {:#}", candidate, e),
            }
        }

        let base = if self.config.base_branch.trim().is_empty() {
            "main".to_string()
        } else {
            self.config.base_branch.clone()
        };
        warn!("No usable base branch found; creating {}", base);
        vcs.checkout_new(&base).into_git_state("checkout")?;
        Ok(base)
    }

    async fn generate_change(&self, task: &Task, log: &RunLog) -> Result<AppliedPatch> {
        let repo = self.ctx.repo_path();
        let architecture = read_optional(&self.ctx.architecture_path())?.unwrap_or_default();
        let snapshot = match self.deps.snapshot.snapshot(repo) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Repository snapshot failed: {:#}", e);
                None
            }
        };

        let request = ChangeRequest {
            title: &task.title,
            description: &task.description,
            context: ChangeContext::gather(repo, &architecture, snapshot.as_ref()),
        };
        DiffEngine::new(self.deps.llm.clone(), self.deps.vcs.clone())
            .with_artifacts_dir(log.dir())
            .apply_change(&request)
            .await
    }

    async fn run_checks(&self, log: &mut RunLog) -> Result<()> {
        let repo = self.ctx.repo_path();
        for command in &self.config.checks {
            log.field("check", command);
            info!("Running check: {}", command);
            let output = run_shell(command, repo).await.into_transient()?;
            if !output.success() {
                warn!("Check failed ({}): {}", output.code, command);
                return Err(TanukiError::check(
                    command,
                    clip_chars(&output.combined(), CHECK_OUTPUT_CHARS),
                ));
            }
        }
        Ok(())
    }

    fn open_pr(&self, task: &Task, branch: &str, title: &str) -> Result<Option<String>> {
        let Some(host) = &self.deps.pr else {
            debug!("No PR provider configured");
            return Ok(None);
        };
        if !host.available() {
            return Err(TanukiError::transient(format!(
                "PR provider {} is not installed or not on PATH",
                host.name()
            )));
        }
        let request = PullRequest {
            base: self.config.pr_base.clone(),
            head: branch.to_string(),
            title: title.to_string(),
            body: pr_body(task),
            draft: self.config.pr_draft,
        };
        let reference = host.create(&request).into_git_state("pr create")?;
        info!("Opened pull request {}", reference);
        Ok(Some(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockLlmClient, MockPrHost, MockSnapshotProvider, MockVcs, TestFixture};

    const DIFF: &str = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-a\n+b\n";

    struct Harness {
        ctx: ProjectContext,
        vcs: Arc<MockVcs>,
        pr: Arc<MockPrHost>,
        llm: Arc<MockLlmClient>,
        _fixture: TestFixture,
    }

    impl Harness {
        fn new(vcs: MockVcs, llm: MockLlmClient) -> Self {
            let fixture = TestFixture::minimal_project();
            Self {
                ctx: fixture.context().clone(),
                vcs: Arc::new(vcs),
                pr: Arc::new(MockPrHost::new()),
                llm: Arc::new(llm),
                _fixture: fixture,
            }
        }

        fn add_task(&self, title: &str, priority: crate::task::Priority) -> TaskId {
            self.ctx
                .store()
                .update(|b| {
                    let id = b.allocate_id();
                    b.tasks
                        .push(Task::new(id, title, Utc::now()).with_priority(priority));
                    Ok(id)
                })
                .unwrap()
        }

        fn config(&self, checks: Vec<String>) -> RunnerConfig {
            RunnerConfig {
                base_branch: "main".into(),
                remote: "origin".into(),
                pr_provider: "gh".into(),
                pr_base: "main".into(),
                pr_draft: true,
                checks,
                stale_doing_minutes: 60,
                detected: Vec::new(),
            }
        }

        fn runner(&self, checks: Vec<String>) -> Runner {
            let deps = RunnerDeps {
                vcs: self.vcs.clone(),
                pr: Some(self.pr.clone()),
                llm: self.llm.clone(),
                snapshot: Arc::new(MockSnapshotProvider::new()),
            };
            Runner::new(self.ctx.clone(), self.config(checks), deps).with_actions(LocalActions::none())
        }

        fn status(&self, id: TaskId) -> Status {
            self.ctx.store().load().unwrap().get(id).unwrap().status
        }
    }

    #[tokio::test]
    async fn test_published_task_goes_to_review() {
        let h = Harness::new(
            MockVcs::new().with_remote("origin").with_staged(&["a.txt"]),
            MockLlmClient::new().with_response(DIFF),
        );
        let id = h.add_task("Change a", crate::task::Priority::P2);

        let outcome = h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.status, Status::Review);
        assert_eq!(report.branch, "task/1-change-a");
        assert!(report.pushed);
        assert_eq!(report.pr.as_deref(), Some("https://example.test/pr/1"));
        assert_eq!(h.status(id), Status::Review);
        assert_eq!(h.vcs.commits(), vec!["task 1: Change a".to_string()]);
        assert_eq!(h.pr.requests()[0].head, "task/1-change-a");
        assert!(report.run_dir.join("run.md").is_file());
    }

    #[tokio::test]
    async fn test_zero_staged_finishes_without_publishing() {
        let h = Harness::new(
            MockVcs::new().with_remote("origin"),
            MockLlmClient::new().with_response(DIFF),
        );
        let id = h.add_task("Change a", crate::task::Priority::P2);

        let outcome = h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.status, Status::Done);
        assert!(!report.committed);
        assert_eq!(h.status(id), Status::Done);
        assert!(h.vcs.pushes().is_empty());
        assert_eq!(h.pr.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_remote_means_done() {
        let h = Harness::new(
            MockVcs::new().with_staged(&["a.txt"]),
            MockLlmClient::new().with_response(DIFF),
        );
        let id = h.add_task("Change a", crate::task::Priority::P2);
        h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap();
        assert_eq!(h.status(id), Status::Done);
        assert_eq!(h.vcs.commits().len(), 1);
        assert!(h.vcs.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_dirty_tree_blocks_task() {
        let h = Harness::new(
            MockVcs::new().with_dirty(" M src/lib.rs"),
            MockLlmClient::new().with_response(DIFF),
        );
        let id = h.add_task("Change a", crate::task::Priority::P2);

        let err = h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, TanukiError::GitState { .. }));
        let backlog = h.ctx.store().load().unwrap();
        let task = backlog.get(id).unwrap();
        assert_eq!(task.status, Status::Blocked);
        assert!(task.blocked_reason.as_deref().unwrap().contains("not clean"));
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_check_blocks_with_output() {
        let h = Harness::new(
            MockVcs::new().with_staged(&["a.txt"]),
            MockLlmClient::new().with_response(DIFF),
        );
        let id = h.add_task("Change a", crate::task::Priority::P2);

        let err = h
            .runner(vec!["echo checking; echo broken >&2; exit 1".into()])
            .run_once(&RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TanukiError::Check { .. }));
        let backlog = h.ctx.store().load().unwrap();
        let reason = backlog.get(id).unwrap().blocked_reason.clone().unwrap();
        assert!(reason.starts_with("Command failed: echo checking"));
        assert!(reason.contains("broken"));
        assert!(h.vcs.commits().is_empty());
    }

    #[tokio::test]
    async fn test_failed_pass_discards_changes_and_returns_to_base() {
        let h = Harness::new(
            MockVcs::new().with_staged(&["a.txt"]),
            MockLlmClient::new().with_response(DIFF),
        );
        h.add_task("Change a", crate::task::Priority::P2);

        h.runner(vec!["exit 1".into()])
            .run_once(&RunOptions::default())
            .await
            .unwrap_err();

        let calls = h.vcs.calls();
        let discard = calls.iter().position(|c| c == "discard").unwrap();
        assert_eq!(calls[discard + 1], "checkout main");
        assert_eq!(h.vcs.current_branch().unwrap(), "main");
    }

    #[tokio::test]
    async fn test_dirty_tree_is_never_discarded() {
        let h = Harness::new(
            MockVcs::new().with_dirty("?? notes.txt"),
            MockLlmClient::new().with_response(DIFF),
        );
        h.add_task("Change a", crate::task::Priority::P2);
        h.runner(vec![])
            .run_once(&RunOptions::default())
            .await
            .unwrap_err();
        assert!(!h.vcs.calls().contains(&"discard".to_string()));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let h = Harness::new(MockVcs::new(), MockLlmClient::new().with_response(DIFF));
        let id = h.add_task("Change a", crate::task::Priority::P2);

        let outcome = h
            .runner(vec![])
            .run_once(&RunOptions::default().with_dry_run(true))
            .await
            .unwrap();
        let PassOutcome::DryRun { run_dir, branch, .. } = outcome else {
            panic!("expected a dry run");
        };
        assert_eq!(branch, "task/1-change-a");
        assert_eq!(h.status(id), Status::Todo);
        assert!(h.vcs.calls().is_empty());
        let record = std::fs::read_to_string(run_dir.join("run.md")).unwrap();
        assert!(record.contains("dry_run: true"));
    }

    #[tokio::test]
    async fn test_base_resolution_falls_back_to_current_branch() {
        let h = Harness::new(
            MockVcs::new().with_branches(&["trunk"]).with_current_branch("trunk"),
            MockLlmClient::new().with_response(DIFF),
        );
        h.add_task("Change a", crate::task::Priority::P2);
        let outcome = h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.base, "trunk");
    }

    #[tokio::test]
    async fn test_base_created_when_nothing_usable() {
        let h = Harness::new(
            MockVcs::new().with_branches(&[]).without_current_branch(),
            MockLlmClient::new().with_response(DIFF),
        );
        h.add_task("Change a", crate::task::Priority::P2);
        let outcome = h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.base, "main");
    }

    #[tokio::test]
    async fn test_existing_branch_is_resumed() {
        let h = Harness::new(
            MockVcs::new().with_branches(&["main", "task/1-change-a"]),
            MockLlmClient::new().with_response(DIFF),
        );
        h.add_task("Change a", crate::task::Priority::P2);
        h.runner(vec![]).run_once(&RunOptions::default()).await.unwrap();
        assert!(h.vcs.calls().contains(&"checkout task/1-change-a".to_string()));
        assert!(!h.vcs.calls().iter().any(|c| c.starts_with("checkout -b task/")));
    }

    #[tokio::test]
    async fn test_selection_prefers_priority() {
        let h = Harness::new(MockVcs::new(), MockLlmClient::new().with_response(DIFF));
        h.add_task("Low", crate::task::Priority::P3);
        let high = h.add_task("High", crate::task::Priority::P1);
        let outcome = h
            .runner(vec![])
            .run_once(&RunOptions::default().with_dry_run(true))
            .await
            .unwrap();
        assert!(matches!(outcome, PassOutcome::DryRun { task_id, .. } if task_id == high));
    }

    #[tokio::test]
    async fn test_local_action_skips_provider() {
        let h = Harness::new(
            MockVcs::new().with_staged(&["index.html"]),
            MockLlmClient::new().with_response(DIFF),
        );
        h.add_task("Create a base page", crate::task::Priority::P2);
        let outcome = h
            .runner(vec![])
            .with_actions(LocalActions::builtin())
            .run_once(&RunOptions::default())
            .await
            .unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("expected a completed pass");
        };
        assert_eq!(report.change, ChangeSource::LocalAction("base-page"));
        assert_eq!(h.llm.call_count(), 0);
        assert!(h.ctx.repo_path().join("index.html").is_file());
    }

    #[tokio::test]
    async fn test_pr_skipped_when_disabled() {
        let h = Harness::new(
            MockVcs::new().with_remote("origin").with_staged(&["a.txt"]),
            MockLlmClient::new().with_response(DIFF),
        );
        let id = h.add_task("Change a", crate::task::Priority::P2);
        h.runner(vec![])
            .run_once(&RunOptions::default().with_create_pr(false))
            .await
            .unwrap();
        assert_eq!(h.status(id), Status::Review);
        assert_eq!(h.pr.call_count(), 0);
        assert_eq!(h.vcs.pushes(), vec!["origin task/1-change-a".to_string()]);
    }

    #[test]
    fn test_branch_name_is_deterministic() {
        let task = Task::new(12, "Add Login / OAuth (GitHub)!", Utc::now());
        assert_eq!(branch_name(&task), "task/12-add-login-oauth-github");
        let task = Task::new(3, "???", Utc::now());
        assert_eq!(branch_name(&task), "task/3-task");
    }
}
