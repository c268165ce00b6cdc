//! Durable storage for the backlog document.
//!
//! The store holds no state besides its path: every operation loads the
//! document fresh, and every save replaces it whole.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use super::model::{Backlog, Task, TaskId};
use super::state::Status;
use crate::error::{Result, TanukiError};
use crate::persist;

/// Backlog persistence for one project.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    /// Create a store backed by `path` (usually `<project>/tasks/tasks.json`).
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backlog document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the backlog. A missing document is an empty backlog.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed JSON or document structure,
    /// naming the file. IO errors are propagated.
    pub fn load(&self) -> Result<Backlog> {
        let Some(text) = persist::read_optional(&self.path)? else {
            debug!("No backlog at {}, starting empty", self.path.display());
            return Ok(Backlog::new());
        };

        Backlog::from_json(&text).map_err(|e| match e {
            TanukiError::Validation { message } => TanukiError::validation(format!(
                "{} ({})",
                message,
                self.path.display()
            )),
            other => other,
        })
    }

    /// Replace the stored document with `backlog`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self, backlog: &Backlog) -> Result<()> {
        let mut backlog = backlog.clone();
        backlog.recompute_next_id();
        persist::write_atomic(&self.path, &(backlog.to_json()? + "\n"))?;
        debug!(
            "Saved backlog ({} tasks, next_id {}) to {}",
            backlog.tasks.len(),
            backlog.next_id,
            self.path.display()
        );
        Ok(())
    }

    /// Load, apply `mutate`, save. Returns whatever `mutate` returned.
    ///
    /// # Errors
    ///
    /// Propagates load, mutation and save errors. Nothing is written when
    /// `mutate` fails.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut Backlog) -> Result<T>) -> Result<T> {
        let mut backlog = self.load()?;
        let out = mutate(&mut backlog)?;
        self.save(&backlog)?;
        Ok(out)
    }

    /// Manually move task `id` to `status`, returning the updated task.
    ///
    /// Goes through [`crate::task::Task::transition`], so the reason and
    /// timestamp rules are the same as for automatic transitions.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the task does not exist.
    pub fn set_status(&self, id: TaskId, status: Status, reason: Option<&str>) -> Result<Task> {
        self.update(|backlog| {
            let task = backlog
                .get_mut(id)
                .ok_or_else(|| TanukiError::validation(format!("Task {id} not found")))?;
            if task.transition(status, reason, Utc::now()) {
                info!("Task {} -> {}", id, status);
            }
            Ok(task.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, Status, Task};
    use chrono::Utc;
    use tempfile::TempDir;

    fn store() -> (TaskStore, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = TaskStore::new(temp.path().join("tasks/tasks.json"));
        (store, temp)
    }

    fn sample_backlog() -> Backlog {
        let now = Utc::now();
        let mut backlog = Backlog::new();
        let id = backlog.allocate_id();
        backlog.tasks.push(
            Task::new(id, "Write README", now)
                .with_description("Explain setup")
                .with_priority(Priority::P1)
                .with_tags(vec!["docs".into()]),
        );
        let id = backlog.allocate_id();
        let mut blocked = Task::new(id, "Wire CI", now);
        blocked.transition(Status::Blocked, Some("quota exceeded"), now);
        backlog.tasks.push(blocked);
        let id = backlog.allocate_id();
        let mut done = Task::new(id, "Init repo", now);
        done.transition(Status::Done, None, now);
        backlog.tasks.push(done);
        backlog
    }

    #[test]
    fn test_load_missing_is_empty() {
        let (store, _temp) = store();
        let backlog = store.load().unwrap();
        assert!(backlog.tasks.is_empty());
        assert_eq!(backlog.next_id, 1);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let (store, _temp) = store();
        let backlog = sample_backlog();
        store.save(&backlog).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, backlog);
    }

    #[test]
    fn test_next_id_exceeds_max_after_load() {
        let (store, _temp) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"version": 1, "next_id": 1, "tasks": [{"id": 9, "title": "x"}]}"#,
        )
        .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.next_id, 10);
    }

    #[test]
    fn test_malformed_document_names_file() {
        let (store, _temp) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ nope").unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, TanukiError::Validation { .. }));
        assert!(err.to_string().contains("tasks.json"));
    }

    #[test]
    fn test_update_persists_mutation() {
        let (store, _temp) = store();
        store.save(&sample_backlog()).unwrap();
        let id = store
            .update(|b| {
                let id = b.allocate_id();
                b.tasks.push(Task::new(id, "New", Utc::now()));
                Ok(id)
            })
            .unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.get(id).is_some());
        assert_eq!(loaded.next_id, id + 1);
    }

    #[test]
    fn test_update_failure_writes_nothing() {
        let (store, _temp) = store();
        store.save(&sample_backlog()).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();
        let result: Result<()> = store.update(|b| {
            b.tasks.clear();
            Err(TanukiError::validation("abort"))
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_set_status_applies_transition_rules() {
        let (store, _temp) = store();
        store.save(&sample_backlog()).unwrap();

        let task = store.set_status(2, Status::Todo, None).unwrap();
        assert_eq!(task.status, Status::Todo);
        assert!(task.blocked_reason.is_none());

        let task = store.set_status(1, Status::Blocked, Some("needs design")).unwrap();
        assert_eq!(task.blocked_reason.as_deref(), Some("needs design"));
        assert_eq!(store.load().unwrap().get(1).unwrap().status, Status::Blocked);

        assert!(store.set_status(99, Status::Done, None).is_err());
    }
}
