//! Workspace handle and per-project paths.
//!
//! A [`Workspace`] is the root directory holding the registry, global
//! configuration and one directory per project. It is always passed
//! explicitly; nothing in the library consults the home directory on its own.
//!
//! ```text
//! <home>/
//!   config.toml
//!   registry.json
//!   current_project
//!   projects/<id>/
//!     project.json
//!     memory/ARCHITECTURE.md
//!     memory/CONTEXT.md
//!     tasks/tasks.json
//!     runs/<run-id>/run.md
//! ```

pub mod doctor;
pub mod init;
pub mod registry;

use std::path::{Path, PathBuf};

use crate::error::{Result, TanukiError};
use crate::task::TaskStore;

pub use doctor::{run_doctor, DoctorCheck};
pub use init::{init_project, ARCHITECTURE_TEMPLATE, CONTEXT_TEMPLATE};
pub use registry::{Project, Registry};

/// Environment variable overriding the workspace root.
pub const HOME_ENV: &str = "TANUKI_HOME";

/// Root of all Tanuki state.
#[derive(Debug, Clone)]
pub struct Workspace {
    home: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `home`.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolve the root: explicit path, then `TANUKI_HOME`, then `~/.tanuki`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no home directory can be found.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(home) = explicit {
            return Ok(Self::new(home));
        }
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }
        dirs::home_dir()
            .map(|h| Self::new(h.join(".tanuki")))
            .ok_or_else(|| {
                TanukiError::config(format!(
                    "Cannot determine home directory; set {HOME_ENV} or pass --home"
                ))
            })
    }

    /// Create the root and `projects/` directories.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directories cannot be created.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.projects_dir())?;
        Ok(())
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.home.join("registry.json")
    }

    #[must_use]
    pub fn current_project_path(&self) -> PathBuf {
        self.home.join("current_project")
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    #[must_use]
    pub fn projects_dir(&self) -> PathBuf {
        self.home.join("projects")
    }

    /// Load the project registry.
    ///
    /// # Errors
    ///
    /// See [`Registry::load`].
    pub fn registry(&self) -> Result<Registry> {
        Registry::load(self)
    }

    /// Context for a specific registered project.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is not registered.
    pub fn project(&self, id: &str) -> Result<ProjectContext> {
        let registry = self.registry()?;
        let project = registry
            .get(id)
            .cloned()
            .ok_or_else(|| TanukiError::validation(format!("unknown project '{id}'")))?;
        Ok(ProjectContext::new(self, project))
    }

    /// Context for the active project.
    ///
    /// # Errors
    ///
    /// Returns [`TanukiError::NoActiveProject`] when none is selected, or a
    /// validation error if the pointer names an unregistered project.
    pub fn active_project(&self) -> Result<ProjectContext> {
        let registry = self.registry()?;
        let id = registry.active_id()?.ok_or(TanukiError::NoActiveProject)?;
        let project = registry.get(&id).cloned().ok_or_else(|| {
            TanukiError::validation(format!(
                "active project '{id}' is not in the registry; run: tanuki project use <id>"
            ))
        })?;
        Ok(ProjectContext::new(self, project))
    }
}

/// One project's record plus the paths of its workspace files.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project: Project,
    base: PathBuf,
}

impl ProjectContext {
    #[must_use]
    pub fn new(workspace: &Workspace, project: Project) -> Self {
        let base = workspace.projects_dir().join(&project.id);
        Self { project, base }
    }

    /// Project workspace directory (not the repository).
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The repository the runner operates on.
    #[must_use]
    pub fn repo_path(&self) -> &Path {
        &self.project.repo_path
    }

    #[must_use]
    pub fn project_file(&self) -> PathBuf {
        self.base.join("project.json")
    }

    #[must_use]
    pub fn memory_dir(&self) -> PathBuf {
        self.base.join("memory")
    }

    #[must_use]
    pub fn architecture_path(&self) -> PathBuf {
        self.memory_dir().join("ARCHITECTURE.md")
    }

    #[must_use]
    pub fn context_path(&self) -> PathBuf {
        self.memory_dir().join("CONTEXT.md")
    }

    #[must_use]
    pub fn tasks_path(&self) -> PathBuf {
        self.base.join("tasks").join("tasks.json")
    }

    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.base.join("runs")
    }

    /// Backlog store for this project.
    #[must_use]
    pub fn store(&self) -> TaskStore {
        TaskStore::new(self.tasks_path())
    }

    /// Whether `init` has run for this project.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.project_file().exists() && self.memory_dir().is_dir()
    }
}
