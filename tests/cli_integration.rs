//! Integration tests for the tanuki CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temp workspace home plus a repository directory.
struct Env {
    temp: TempDir,
}

impl Env {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("repo")).unwrap();
        Self { temp }
    }

    fn home(&self) -> PathBuf {
        self.temp.path().join("home")
    }

    fn repo(&self) -> PathBuf {
        self.temp.path().join("repo")
    }

    /// Get a Command for the tanuki binary bound to this workspace
    fn tanuki(&self) -> Command {
        let mut cmd = Command::new(cargo::cargo_bin!("tanuki"));
        cmd.env_remove("TANUKI_HOME")
            .env("NO_COLOR", "1")
            .arg("--home")
            .arg(self.home());
        cmd
    }

    fn add_project(&self) {
        self.tanuki()
            .args(["project", "add", "Demo App", "--path"])
            .arg(self.repo())
            .assert()
            .success();
        self.tanuki().arg("init").assert().success();
    }

    fn tasks_path(&self) -> PathBuf {
        self.home().join("projects/demo-app/tasks/tasks.json")
    }

    fn write_tasks(&self, json: &str) {
        std::fs::write(self.tasks_path(), json).unwrap();
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

const BACKLOG: &str = r#"{
  "version": 1,
  "next_id": 4,
  "tasks": [
    {"id": 1, "title": "Write README", "status": "done", "priority": "P2", "tags": ["docs"]},
    {"id": 2, "title": "Add login", "status": "todo", "priority": "P1", "tags": ["auth", "ui"]},
    {"id": 3, "title": "Wire CI", "status": "blocked", "priority": "P3", "blocked_reason": "Command failed: make"}
  ]
}"#;

#[test]
fn test_help() {
    Env::new()
        .tanuki()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Autonomous task backlog runner"));
}

#[test]
fn test_version() {
    Env::new()
        .tanuki()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_active_project_is_validation_failure() {
    Env::new()
        .tanuki()
        .args(["task", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No active project"));
}

#[test]
fn test_project_add_list_show() {
    let env = Env::new();
    env.tanuki()
        .args(["project", "add", "Demo App", "--path"])
        .arg(env.repo())
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-app"));

    env.tanuki()
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-app"))
        .stdout(predicate::str::contains("Demo App"));

    env.tanuki()
        .args(["project", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized: no"));
}

#[test]
fn test_duplicate_repo_rejected() {
    let env = Env::new();
    env.add_project();
    env.tanuki()
        .args(["project", "add", "Other", "--path"])
        .arg(env.repo())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already registered"));
}

#[test]
fn test_project_rename_and_remove() {
    let env = Env::new();
    env.add_project();
    env.tanuki()
        .args(["project", "rename", "demo-app", "Renamed"])
        .assert()
        .success();
    env.tanuki()
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Renamed"));

    env.tanuki()
        .args(["project", "remove", "demo-app"])
        .assert()
        .success()
        .stdout(predicate::str::contains("untouched"));
    assert!(env.repo().is_dir());
    env.tanuki().args(["task", "list"]).assert().code(2);
}

#[test]
fn test_init_creates_layout() {
    let env = Env::new();
    env.add_project();
    let base = env.home().join("projects/demo-app");
    assert!(base.join("project.json").is_file());
    assert!(read(&base.join("memory/ARCHITECTURE.md")).starts_with("# Architecture"));
    assert!(read(&base.join("memory/CONTEXT.md")).starts_with("# Project Context"));
    assert!(base.join("runs").is_dir());
    let backlog: serde_json::Value = serde_json::from_str(&read(&env.tasks_path())).unwrap();
    assert_eq!(backlog["next_id"], 1);
}

#[test]
fn test_task_list_filters_and_json() {
    let env = Env::new();
    env.add_project();
    env.write_tasks(BACKLOG);

    env.tanuki()
        .args(["task", "list", "--status", "todo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Add login"))
        .stdout(predicate::str::contains("Write README").not());

    let output = env
        .tanuki()
        .args(["task", "list", "--tag", "UI", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let tasks: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(tasks.as_array().unwrap().len(), 1);
    assert_eq!(tasks[0]["id"], 2);
}

#[test]
fn test_task_list_rejects_unknown_status() {
    let env = Env::new();
    env.add_project();
    env.tanuki()
        .args(["task", "list", "--status", "in_progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status"));
}

#[test]
fn test_task_show_and_manual_status() {
    let env = Env::new();
    env.add_project();
    env.write_tasks(BACKLOG);

    env.tanuki()
        .args(["task", "show", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Command failed: make"));

    env.tanuki()
        .args(["task", "status", "3", "todo"])
        .assert()
        .success();
    let backlog: serde_json::Value = serde_json::from_str(&read(&env.tasks_path())).unwrap();
    assert_eq!(backlog["tasks"][2]["status"], "todo");
    assert!(backlog["tasks"][2]["blocked_reason"].is_null());

    env.tanuki()
        .args(["task", "show", "42"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Task 42 not found"));
}

#[test]
fn test_legacy_backlog_is_normalized_on_write() {
    let env = Env::new();
    env.add_project();
    env.write_tasks(
        r#"[{"id": "t5", "title": "Legacy", "status": "BLOCKED", "priority": "high"}]"#,
    );

    env.tanuki()
        .args(["task", "status", "5", "skipped"])
        .assert()
        .success();
    let backlog: serde_json::Value = serde_json::from_str(&read(&env.tasks_path())).unwrap();
    assert_eq!(backlog["next_id"], 6);
    assert_eq!(backlog["tasks"][0]["id"], 5);
    assert_eq!(backlog["tasks"][0]["status"], "skipped");
}

#[test]
fn test_config_show_and_materialize() {
    let env = Env::new();
    env.add_project();
    std::fs::write(
        env.repo().join("package.json"),
        r#"{"scripts": {"test": "vitest"}}"#,
    )
    .unwrap();

    env.tanuki()
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"base_branch\": \"main\""))
        .stdout(predicate::str::contains("npm test"));

    env.tanuki()
        .args(["config", "materialize"])
        .assert()
        .success();
    let file: serde_json::Value = serde_json::from_str(&read(
        &env.home().join("projects/demo-app/project.json"),
    ))
    .unwrap();
    assert_eq!(file["git"]["remote"], "origin");
    assert_eq!(file["checks"]["commands"][0], "npm test");
}

#[test]
fn test_model_show_and_set() {
    let env = Env::new();
    env.tanuki()
        .arg("model")
        .assert()
        .success()
        .stdout(predicate::str::contains("gpt-5-mini"));
    env.tanuki().args(["model", "gpt-test"]).assert().success();
    assert!(read(&env.home().join("config.toml")).contains("gpt-test"));
}

#[test]
fn test_setup_rejects_unknown_provider() {
    Env::new()
        .tanuki()
        .args(["setup", "--provider", "carrier-pigeon"])
        .assert()
        .code(2);
}

#[test]
fn test_run_dry_run_writes_record_only() {
    let env = Env::new();
    env.add_project();
    env.write_tasks(BACKLOG);

    env.tanuki()
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("task/2-add-login"));

    let runs = env.home().join("projects/demo-app/runs");
    let entries: Vec<_> = std::fs::read_dir(&runs).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let backlog: serde_json::Value = serde_json::from_str(&read(&env.tasks_path())).unwrap();
    assert_eq!(backlog["tasks"][1]["status"], "todo");
}

#[test]
fn test_run_only_blocked_halts() {
    let env = Env::new();
    env.add_project();
    env.write_tasks(
        r#"{"tasks": [{"id": 1, "title": "Wire CI", "status": "blocked", "blocked_reason": "Command failed: make"}]}"#,
    );

    env.tanuki()
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Only blocked tasks remain"))
        .stdout(predicate::str::contains("#1"));

    env.tanuki()
        .args(["run", "--ignore-blocked"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runnable tasks left"));
}
