//! Registry of known projects and the active-project pointer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Workspace;
use crate::error::{Result, TanukiError};
use crate::persist;
use crate::text::slugify;

/// A registered project: a name bound to a repository on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    projects: BTreeMap<String, Project>,
}

/// Loaded registry. Mutations are written through immediately.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    current_path: PathBuf,
    doc: RegistryDocument,
}

impl Registry {
    /// Load the registry of `workspace` (empty if it does not exist yet).
    ///
    /// # Errors
    ///
    /// Returns a validation error if the registry file is malformed.
    pub fn load(workspace: &Workspace) -> Result<Self> {
        let path = workspace.registry_path();
        let doc = match persist::read_optional(&path)? {
            Some(text) => serde_json::from_str(&text).map_err(|e| {
                TanukiError::validation(format!("registry {} is malformed: {e}", path.display()))
            })?,
            None => RegistryDocument::default(),
        };
        Ok(Self {
            path,
            current_path: workspace.current_project_path(),
            doc,
        })
    }

    fn save(&self) -> Result<()> {
        persist::write_json_atomic(&self.path, &self.doc)
    }

    /// Projects, most recently used first.
    #[must_use]
    pub fn list(&self) -> Vec<&Project> {
        let mut projects: Vec<&Project> = self.doc.projects.values().collect();
        projects.sort_by(|a, b| {
            (b.last_used_at, b.created_at).cmp(&(a.last_used_at, a.created_at))
        });
        projects
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Project> {
        self.doc.projects.get(id)
    }

    /// Project registered for `repo_path`, compared after canonicalization.
    #[must_use]
    pub fn find_by_repo(&self, repo_path: &Path) -> Option<&Project> {
        let wanted = canonical(repo_path);
        self.doc
            .projects
            .values()
            .find(|p| canonical(&p.repo_path) == wanted)
    }

    /// Register a new project. The id is a slug of `name`, suffixed `-2`,
    /// `-3`, ... until unique.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the name is blank or the repository is
    /// already registered under another project.
    pub fn add(&mut self, name: &str, repo_path: &Path) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TanukiError::validation("project name must not be empty"));
        }
        let repo_path = canonical(repo_path);
        if let Some(existing) = self.find_by_repo(&repo_path) {
            return Err(TanukiError::validation(format!(
                "{} is already registered as project '{}'",
                repo_path.display(),
                existing.id
            )));
        }

        let base_id = slugify(name, usize::MAX, "project");
        let mut id = base_id.clone();
        let mut suffix = 2;
        while self.doc.projects.contains_key(&id) {
            id = format!("{base_id}-{suffix}");
            suffix += 1;
        }

        let project = Project {
            id: id.clone(),
            name: name.to_string(),
            repo_path,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.doc.projects.insert(id, project.clone());
        self.save()?;
        info!("Registered project {} at {}", project.id, project.repo_path.display());
        Ok(project)
    }

    /// Point the workspace at `id`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is not registered.
    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.doc.projects.contains_key(id) {
            return Err(unknown(id));
        }
        persist::write_atomic(&self.current_path, id)?;
        self.touch_last_used(id)?;
        debug!("Active project set to {id}");
        Ok(())
    }

    /// Forget the active project.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the pointer file exists but cannot be removed.
    pub fn clear_active(&self) -> Result<()> {
        match std::fs::remove_file(&self.current_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Id of the active project, if any.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the pointer file cannot be read.
    pub fn active_id(&self) -> Result<Option<String>> {
        Ok(persist::read_optional(&self.current_path)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// Record that `id` was just used.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be written.
    pub fn touch_last_used(&mut self, id: &str) -> Result<()> {
        if let Some(project) = self.doc.projects.get_mut(id) {
            project.last_used_at = Some(Utc::now());
            self.save()?;
        }
        Ok(())
    }

    /// Rename a project. The id is stable.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is unknown or the name is blank.
    pub fn rename(&mut self, id: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(TanukiError::validation("project name must not be empty"));
        }
        let project = self.doc.projects.get_mut(id).ok_or_else(|| unknown(id))?;
        project.name = name.trim().to_string();
        self.save()
    }

    /// Point a project at a different repository.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is unknown.
    pub fn update_path(&mut self, id: &str, repo_path: &Path) -> Result<()> {
        let project = self.doc.projects.get_mut(id).ok_or_else(|| unknown(id))?;
        project.repo_path = canonical(repo_path);
        self.save()
    }

    /// Unregister a project, clearing the active pointer if it pointed here.
    /// The project's workspace directory is left on disk.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is unknown.
    pub fn remove(&mut self, id: &str) -> Result<Project> {
        let project = self.doc.projects.remove(id).ok_or_else(|| unknown(id))?;
        if self.active_id()?.as_deref() == Some(id) {
            self.clear_active()?;
        }
        self.save()?;
        Ok(project)
    }
}

fn unknown(id: &str) -> TanukiError {
    TanukiError::validation(format!("unknown project '{id}'"))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (Workspace, TempDir) {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ws = Workspace::new(temp.path().join("home"));
        ws.ensure().unwrap();
        (ws, temp)
    }

    #[test]
    fn test_add_uniquifies_ids() {
        let (ws, temp) = workspace();
        let repo_a = temp.path().join("a");
        let repo_b = temp.path().join("b");
        std::fs::create_dir_all(&repo_a).unwrap();
        std::fs::create_dir_all(&repo_b).unwrap();

        let mut registry = Registry::load(&ws).unwrap();
        let first = registry.add("My App", &repo_a).unwrap();
        let second = registry.add("My App", &repo_b).unwrap();
        assert_eq!(first.id, "my-app");
        assert_eq!(second.id, "my-app-2");
    }

    #[test]
    fn test_add_rejects_duplicate_repo() {
        let (ws, temp) = workspace();
        let mut registry = Registry::load(&ws).unwrap();
        registry.add("one", temp.path()).unwrap();
        let err = registry.add("two", temp.path()).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_active_pointer_roundtrip() {
        let (ws, temp) = workspace();
        let mut registry = Registry::load(&ws).unwrap();
        let project = registry.add("demo", temp.path()).unwrap();
        assert!(registry.active_id().unwrap().is_none());

        registry.set_active(&project.id).unwrap();
        let reloaded = Registry::load(&ws).unwrap();
        assert_eq!(reloaded.active_id().unwrap().as_deref(), Some("demo"));
        assert!(reloaded.get("demo").unwrap().last_used_at.is_some());
    }

    #[test]
    fn test_set_active_unknown_fails() {
        let (ws, _temp) = workspace();
        let mut registry = Registry::load(&ws).unwrap();
        assert!(registry.set_active("ghost").is_err());
    }

    #[test]
    fn test_remove_clears_active() {
        let (ws, temp) = workspace();
        let mut registry = Registry::load(&ws).unwrap();
        registry.add("demo", temp.path()).unwrap();
        registry.set_active("demo").unwrap();
        registry.remove("demo").unwrap();
        assert!(registry.active_id().unwrap().is_none());
        assert!(registry.get("demo").is_none());
    }

    #[test]
    fn test_rename_and_update_path() {
        let (ws, temp) = workspace();
        let other = temp.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        let mut registry = Registry::load(&ws).unwrap();
        registry.add("demo", temp.path()).unwrap();
        registry.rename("demo", "Demo Two").unwrap();
        registry.update_path("demo", &other).unwrap();

        let reloaded = Registry::load(&ws).unwrap();
        let project = reloaded.get("demo").unwrap();
        assert_eq!(project.name, "Demo Two");
        assert_eq!(project.repo_path, other.canonicalize().unwrap());
    }

    #[test]
    fn test_list_most_recent_first() {
        let (ws, temp) = workspace();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let mut registry = Registry::load(&ws).unwrap();
        registry.add("alpha", &a).unwrap();
        registry.add("beta", &b).unwrap();
        registry.touch_last_used("alpha").unwrap();
        let ids: Vec<_> = registry.list().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
