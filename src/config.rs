//! Configuration management for Tanuki.
//!
//! Two layers exist:
//!
//! - [`TanukiConfig`] - global settings in `<home>/config.toml` (provider,
//!   model, credentials)
//! - [`ProjectFile`] - per-project `project.json`, whose optional `git`, `pr`
//!   and `checks` sections become a [`RunnerConfig`]
//!
//! Missing runner sections are auto-detected on every run and only written
//! back by [`materialize`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, TanukiError};
use crate::llm::LlmConfig;
use crate::persist;
use crate::vcs::Vcs;
use crate::workspace::{ProjectContext, Workspace};

/// Default grace period before an abandoned `doing` task is reset.
pub const DEFAULT_STALE_DOING_MINUTES: u64 = 60;

/// Directories never scanned or sent to a model.
pub fn default_ignore_dirs() -> HashSet<&'static str> {
    [
        ".git",
        "node_modules",
        ".venv",
        "venv",
        "__pycache__",
        "dist",
        "build",
        "target",
        ".next",
        ".idea",
        ".vscode",
        ".pytest_cache",
        ".mypy_cache",
    ]
    .into_iter()
    .collect()
}

// =============================================================================
// Global configuration
// =============================================================================

/// Contents of `<home>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TanukiConfig {
    #[serde(default)]
    pub llm: LlmConfig,
}

impl TanukiConfig {
    /// Load the global config; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the file if it is not valid TOML.
    pub fn load(workspace: &Workspace) -> Result<Self> {
        let path = workspace.config_path();
        match persist::read_optional(&path)? {
            Some(text) => toml::from_str(&text).map_err(|e| {
                TanukiError::config_with_path(format!("invalid {}: {e}", path.display()), path)
            }),
            None => Ok(Self::default()),
        }
    }

    /// Write the global config.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, workspace: &Workspace) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| TanukiError::config(format!("cannot serialize config: {e}")))?;
        persist::write_atomic(&workspace.config_path(), &text)
    }
}

// =============================================================================
// Project file
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_remote")]
    pub remote: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrSection {
    #[serde(default = "default_pr_provider")]
    pub provider: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default = "default_true")]
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChecksSection {
    #[serde(default)]
    pub commands: Vec<String>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_pr_provider() -> String {
    "gh".to_string()
}

fn default_true() -> bool {
    true
}

/// `project.json` for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: String,
    pub name: String,
    pub repo_path: std::path::PathBuf,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<ChecksSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_doing_minutes: Option<u64>,
}

impl ProjectFile {
    /// Bare project file for a registered project.
    #[must_use]
    pub fn for_project(ctx: &ProjectContext) -> Self {
        Self {
            id: ctx.project.id.clone(),
            name: ctx.project.name.clone(),
            repo_path: ctx.project.repo_path.clone(),
            created_at: ctx.project.created_at,
            git: None,
            pr: None,
            checks: None,
            stale_doing_minutes: None,
        }
    }

    /// Load `project.json`, or a bare file if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the file if it is malformed.
    pub fn load(ctx: &ProjectContext) -> Result<Self> {
        let path = ctx.project_file();
        match persist::read_optional(&path)? {
            Some(text) => serde_json::from_str(&text).map_err(|e| {
                TanukiError::config_with_path(format!("invalid {}: {e}", path.display()), path)
            }),
            None => Ok(Self::for_project(ctx)),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, ctx: &ProjectContext) -> Result<()> {
        persist::write_json_atomic(&ctx.project_file(), self)
    }
}

// =============================================================================
// Runner configuration
// =============================================================================

/// Effective runner settings for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerConfig {
    pub base_branch: String,
    pub remote: String,
    pub pr_provider: String,
    pub pr_base: String,
    pub pr_draft: bool,
    pub checks: Vec<String>,
    pub stale_doing_minutes: u64,
    /// Sections that were auto-detected rather than read from `project.json`.
    pub detected: Vec<String>,
}

impl RunnerConfig {
    /// Build the effective config from `project.json`, auto-detecting any
    /// missing section.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `project.json` is malformed.
    pub fn resolve(ctx: &ProjectContext, vcs: &dyn Vcs) -> Result<Self> {
        let file = ProjectFile::load(ctx)?;
        Ok(Self::from_file(&file, ctx.repo_path(), vcs))
    }

    /// Merge configured sections with detected defaults.
    #[must_use]
    pub fn from_file(file: &ProjectFile, repo: &Path, vcs: &dyn Vcs) -> Self {
        let mut detected = Vec::new();

        let (remote, base_branch) = match &file.git {
            Some(git) => (git.remote.clone(), git.base_branch.clone()),
            None => {
                detected.push("git".to_string());
                let remote = default_remote();
                let base = vcs
                    .default_remote_branch(&remote)
                    .unwrap_or_else(|| "main".to_string());
                (remote, base)
            }
        };

        let (pr_provider, pr_base, pr_draft) = match &file.pr {
            Some(pr) => (
                pr.provider.clone(),
                pr.base.clone().unwrap_or_else(|| base_branch.clone()),
                pr.draft,
            ),
            None => {
                detected.push("pr".to_string());
                (default_pr_provider(), base_branch.clone(), true)
            }
        };

        let checks = match &file.checks {
            Some(checks) => checks.commands.clone(),
            None => {
                detected.push("checks".to_string());
                autodetect_checks(repo)
            }
        };

        let config = Self {
            base_branch,
            remote,
            pr_provider,
            pr_base,
            pr_draft,
            checks,
            stale_doing_minutes: file
                .stale_doing_minutes
                .unwrap_or(DEFAULT_STALE_DOING_MINUTES),
            detected,
        };
        debug!(
            "Runner config: base={} remote={} checks={:?} detected={:?}",
            config.base_branch, config.remote, config.checks, config.detected
        );
        config
    }

    /// Whether every section came from `project.json`.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.detected.is_empty()
    }
}

/// Verification commands implied by files in `repo`.
#[must_use]
pub fn autodetect_checks(repo: &Path) -> Vec<String> {
    let mut checks = Vec::new();

    let package_json = repo.join("package.json");
    if let Ok(text) = std::fs::read_to_string(&package_json) {
        let has_test = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("scripts")?.get("test").cloned())
            .and_then(|t| t.as_str().map(|s| !s.trim().is_empty()))
            .unwrap_or(false);
        if has_test {
            checks.push("npm test".to_string());
        }
    }

    if repo.join("pyproject.toml").exists() || repo.join("pytest.ini").exists() {
        checks.push("python -m pytest".to_string());
    }

    checks
}

/// Write the effective runner config into `project.json`.
///
/// # Errors
///
/// Returns an error if `project.json` cannot be read or written.
pub fn materialize(ctx: &ProjectContext, config: &RunnerConfig) -> Result<ProjectFile> {
    let mut file = ProjectFile::load(ctx)?;
    file.git = Some(GitSection {
        remote: config.remote.clone(),
        base_branch: config.base_branch.clone(),
    });
    file.pr = Some(PrSection {
        provider: config.pr_provider.clone(),
        base: Some(config.pr_base.clone()),
        draft: config.pr_draft,
    });
    file.checks = Some(ChecksSection {
        commands: config.checks.clone(),
    });
    file.stale_doing_minutes = Some(config.stale_doing_minutes);
    file.save(ctx)?;
    Ok(file)
}
