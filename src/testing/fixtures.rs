//! Test fixtures for creating reproducible test environments.
//!
//! Provides a throwaway workspace home with one registered project, with or
//! without a real git repository behind it.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::task::Task;
use crate::workspace::{init_project, ProjectContext, Workspace};

/// A temporary workspace with a single project named `demo`.
///
/// Automatically cleans up when dropped.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = TestFixture::with_git_repo();
/// assert!(fixture.is_git_repo());
/// let ctx = fixture.context();
/// ```
pub struct TestFixture {
    temp_dir: TempDir,
    workspace: Workspace,
    context: ProjectContext,
}

impl TestFixture {
    /// Registered and initialised project over an empty repository directory.
    ///
    /// # Panics
    ///
    /// Panics if the workspace cannot be created.
    #[must_use]
    pub fn minimal_project() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let repo = temp_dir.path().join("repo");
        std::fs::create_dir_all(&repo).expect("Failed to create repo dir");

        let workspace = Workspace::new(temp_dir.path().join("home"));
        workspace.ensure().expect("Failed to create workspace");
        workspace
            .registry()
            .and_then(|mut r| r.add("demo", &repo))
            .expect("Failed to register project");
        let context = workspace.project("demo").expect("Failed to open project");
        init_project(&context).expect("Failed to initialise project");

        Self {
            temp_dir,
            workspace,
            context,
        }
    }

    /// Like [`TestFixture::minimal_project`] with a git repository on `main`
    /// holding one commit.
    ///
    /// # Panics
    ///
    /// Panics if git is unavailable or any git command fails.
    #[must_use]
    pub fn with_git_repo() -> Self {
        let fixture = Self::minimal_project();
        let repo = fixture.repo_path().to_path_buf();
        git(&repo, &["init", "-q", "-b", "main"]);
        git(&repo, &["config", "user.email", "test@example.com"]);
        git(&repo, &["config", "user.name", "Test User"]);
        std::fs::write(repo.join("a.txt"), "a\n").expect("Failed to write a.txt");
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "init"]);
        fixture
    }

    /// Replace the backlog with `tasks`.
    ///
    /// # Panics
    ///
    /// Panics if the backlog cannot be saved.
    pub fn with_tasks(self, tasks: Vec<Task>) -> Self {
        self.context
            .store()
            .update(|b| {
                b.tasks = tasks;
                b.recompute_next_id();
                Ok(())
            })
            .expect("Failed to save tasks");
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    #[must_use]
    pub fn context(&self) -> &ProjectContext {
        &self.context
    }

    #[must_use]
    pub fn repo_path(&self) -> &Path {
        self.context.repo_path()
    }

    #[must_use]
    pub fn is_git_repo(&self) -> bool {
        self.repo_path().join(".git").exists()
    }

    /// Path of a file inside the repository.
    #[must_use]
    pub fn repo_file(&self, relative: &str) -> PathBuf {
        self.repo_path().join(relative)
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(output.status.success(), "git {args:?} failed");
}
