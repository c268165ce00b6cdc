//! Idempotent creation of a project's workspace files.

use std::path::PathBuf;
use tracing::info;

use super::ProjectContext;
use crate::config::ProjectFile;
use crate::error::Result;
use crate::persist;
use crate::task::Backlog;

pub const ARCHITECTURE_TEMPLATE: &str = "# Architecture\n\nInitial architecture not defined yet.\n";

pub const CONTEXT_TEMPLATE: &str = "# Project Context\n\nDescribe goals, constraints and scope here.\n";

/// Create the workspace layout for `ctx`. Existing files are left alone.
///
/// Returns the files that were created.
///
/// # Errors
///
/// Returns an IO error if a directory or file cannot be created.
pub fn init_project(ctx: &ProjectContext) -> Result<Vec<PathBuf>> {
    for dir in [ctx.memory_dir(), ctx.base().join("tasks"), ctx.runs_dir()] {
        std::fs::create_dir_all(dir)?;
    }

    let mut created = Vec::new();

    if !ctx.project_file().exists() {
        ProjectFile::for_project(ctx).save(ctx)?;
        created.push(ctx.project_file());
    }

    for (path, template) in [
        (ctx.architecture_path(), ARCHITECTURE_TEMPLATE),
        (ctx.context_path(), CONTEXT_TEMPLATE),
    ] {
        if !path.exists() {
            persist::write_atomic(&path, template)?;
            created.push(path);
        }
    }

    let store = ctx.store();
    if !store.path().exists() {
        store.save(&Backlog::new())?;
        created.push(store.path().to_path_buf());
    }

    info!(
        "Initialized project {} ({} files created)",
        ctx.project.id,
        created.len()
    );
    Ok(created)
}
