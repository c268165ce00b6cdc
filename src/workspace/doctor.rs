//! Environment health checks.

use std::path::Path;
use std::process::Command;

use super::Workspace;
use crate::config::ProjectFile;
use crate::error::TanukiError;
use crate::llm::LlmClient;

/// One line of the doctor report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorCheck {
    pub ok: bool,
    pub message: String,
}

impl DoctorCheck {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

fn home_writable(ws: &Workspace) -> DoctorCheck {
    let probe = ws.home().join(".doctor_probe");
    let result = ws
        .ensure()
        .and_then(|()| std::fs::write(&probe, b"ok").map_err(TanukiError::from))
        .and_then(|()| std::fs::remove_file(&probe).map_err(TanukiError::from));
    match result {
        Ok(()) => DoctorCheck::pass(format!("Home writable: {}", ws.home().display())),
        Err(e) => DoctorCheck::fail(format!("Home not writable: {} ({e})", ws.home().display())),
    }
}

fn is_git_work_tree(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
        .unwrap_or(false)
}

/// Run every check in order. Checks that depend on an active project are
/// skipped (and reported as failed) when there is none.
pub async fn run_doctor(ws: &Workspace, llm: &dyn LlmClient) -> Vec<DoctorCheck> {
    let mut checks = vec![home_writable(ws)];

    let mut pr_provider = "gh".to_string();
    match ws.active_project() {
        Ok(ctx) => {
            checks.push(DoctorCheck::pass(format!(
                "Active project: {} ({})",
                ctx.project.id, ctx.project.name
            )));

            if ctx.is_initialized() {
                checks.push(DoctorCheck::pass("Project initialized"));
            } else {
                checks.push(DoctorCheck::fail("Project not initialized. Run: tanuki init"));
            }

            let repo = ctx.repo_path();
            if !repo.is_dir() {
                checks.push(DoctorCheck::fail(format!(
                    "Repository path missing: {}",
                    repo.display()
                )));
            } else if !is_git_work_tree(repo) {
                checks.push(DoctorCheck::fail(format!(
                    "Not a git work tree: {}",
                    repo.display()
                )));
            } else {
                checks.push(DoctorCheck::pass(format!("Repository: {}", repo.display())));
            }

            if let Ok(file) = ProjectFile::load(&ctx) {
                if let Some(pr) = file.pr {
                    pr_provider = pr.provider;
                }
            }
        }
        Err(e) => checks.push(DoctorCheck::fail(e.to_string())),
    }

    match which::which("git") {
        Ok(path) => checks.push(DoctorCheck::pass(format!("git: {}", path.display()))),
        Err(_) => checks.push(DoctorCheck::fail("git not found on PATH")),
    }

    if pr_provider == "gh" {
        match which::which("gh") {
            Ok(path) => checks.push(DoctorCheck::pass(format!("gh: {}", path.display()))),
            Err(_) => checks.push(DoctorCheck::fail(
                "gh not found on PATH (needed for pull requests)",
            )),
        }
    }

    if llm.available().await {
        checks.push(DoctorCheck::pass(format!(
            "LLM provider available (model {})",
            llm.model_name()
        )));
    } else {
        checks.push(DoctorCheck::fail(format!(
            "LLM provider unavailable (model {}). Run: tanuki setup",
            llm.model_name()
        )));
    }

    checks
}
