//! Non-destructive reconciliation of task proposals with a backlog.
//!
//! A proposal is a loose JSON object as returned by the model. Matching is
//! by id, then by normalized title; anything unmatched is new. Existing
//! tasks are never removed and their status only moves when a proposal
//! explicitly asks for a different valid status.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::{Result, TanukiError};
use crate::task::{
    coerce_id, coerce_tags, normalize_title, Backlog, Priority, Status, Task, TaskId, UNTITLED,
};

/// Title of the synthetic task recorded when a plan cannot be parsed.
pub const PLAN_FAILURE_TITLE: &str = "Fix plan output";

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: Vec<TaskId>,
    pub updated: Vec<TaskId>,
    pub unchanged: Vec<TaskId>,
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn reason_field(obj: &Map<String, Value>) -> Option<&str> {
    str_field(obj, "blocked_reason").or_else(|| str_field(obj, "reason"))
}

fn find_match(backlog: &Backlog, obj: &Map<String, Value>) -> Option<usize> {
    if let Some(id) = obj.get("id").filter(|v| !v.is_null()).map(coerce_id) {
        if id > 0 {
            if let Some(idx) = backlog.tasks.iter().position(|t| t.id == id) {
                return Some(idx);
            }
        }
    }

    let title = normalize_title(str_field(obj, "title")?);
    if title.is_empty() {
        return None;
    }
    backlog
        .tasks
        .iter()
        .position(|t| normalize_title(&t.title) == title)
}

/// Overwrite present fields of `task` from `obj`. Returns whether anything
/// changed.
fn apply_proposal(task: &mut Task, obj: &Map<String, Value>, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if let Some(title) = str_field(obj, "title").map(str::trim).filter(|t| !t.is_empty()) {
        if task.title != title {
            task.title = title.to_string();
            changed = true;
        }
    }

    if let Some(description) = str_field(obj, "description").map(str::trim) {
        if task.description != description {
            task.description = description.to_string();
            changed = true;
        }
    }

    if let Some(priority) = str_field(obj, "priority").and_then(Priority::parse) {
        if task.priority != priority {
            task.priority = priority;
            changed = true;
        }
    }

    if let Some(tags) = obj.get("tags").filter(|v| !v.is_null()) {
        let before = task.tags.clone();
        task.set_tags(coerce_tags(tags));
        changed |= task.tags != before;
    }

    if changed {
        task.touch(now);
    }

    if let Some(status) = str_field(obj, "status").and_then(Status::parse) {
        if status != task.status {
            debug!("Task {} status {} -> {} by proposal", task.id, task.status, status);
            changed |= task.transition(status, reason_field(obj), now);
        }
    }

    changed
}

/// Fresh task from a proposal, with a newly allocated id.
fn new_task(backlog: &mut Backlog, obj: &Map<String, Value>, now: DateTime<Utc>) -> Task {
    let id = backlog.allocate_id();
    let title = str_field(obj, "title").unwrap_or(UNTITLED);
    let mut task = Task::new(id, title, now)
        .with_description(str_field(obj, "description").unwrap_or_default())
        .with_priority(str_field(obj, "priority").map_or(Priority::P2, Priority::coerce))
        .with_tags(obj.get("tags").map(coerce_tags).unwrap_or_default());
    if let Some(status) = str_field(obj, "status").and_then(Status::parse) {
        task.transition(status, reason_field(obj), now);
    }
    task
}

/// Merge `proposals` into `backlog`.
///
/// Non-object proposals are ignored. `next_id` stays above every id.
pub fn merge_proposals(backlog: &mut Backlog, proposals: &[Value], now: DateTime<Utc>) -> MergeReport {
    let mut report = MergeReport::default();

    for obj in proposals.iter().filter_map(Value::as_object) {
        match find_match(backlog, obj) {
            Some(idx) => {
                let task = &mut backlog.tasks[idx];
                if apply_proposal(task, obj, now) {
                    report.updated.push(task.id);
                } else {
                    report.unchanged.push(task.id);
                }
            }
            None => {
                let task = new_task(backlog, obj, now);
                report.added.push(task.id);
                backlog.tasks.push(task);
            }
        }
    }

    backlog.recompute_next_id();
    info!(
        "Merged proposals: {} added, {} updated, {} unchanged",
        report.added.len(),
        report.updated.len(),
        report.unchanged.len()
    );
    report
}

/// Record that a plan's task list could not be read, without touching the
/// rest of the backlog. Repeated failures refresh one task instead of
/// adding more.
pub fn record_plan_failure(backlog: &mut Backlog, error: &str, now: DateTime<Utc>) -> TaskId {
    let reason = format!("Planner output had no usable task list: {error}. Re-run: tanuki plan");
    let wanted = normalize_title(PLAN_FAILURE_TITLE);

    if let Some(task) = backlog
        .tasks
        .iter_mut()
        .find(|t| normalize_title(&t.title) == wanted)
    {
        if task.status == Status::Blocked {
            task.transition(Status::Blocked, Some(&reason), now);
        }
        return task.id;
    }

    let id = backlog.allocate_id();
    let mut task = Task::new(id, PLAN_FAILURE_TITLE, now)
        .with_description("The model did not return a valid tasks block. Re-run the planner.")
        .with_priority(Priority::P1)
        .with_tags(vec!["planning".to_string()]);
    task.transition(Status::Blocked, Some(&reason), now);
    backlog.tasks.push(task);
    id
}

/// Append-only variant: add proposals whose titles are new, as `todo`.
///
/// # Errors
///
/// Returns a validation error when there are no usable proposals or every
/// proposed title already exists.
pub fn append_new_tasks(
    backlog: &mut Backlog,
    proposals: &[Value],
    now: DateTime<Utc>,
) -> Result<Vec<TaskId>> {
    let candidates: Vec<&Map<String, Value>> =
        proposals.iter().filter_map(Value::as_object).collect();
    if candidates.is_empty() {
        return Err(TanukiError::validation(
            "Model did not return valid tasks JSON.",
        ));
    }

    let mut titles: HashSet<String> = backlog
        .tasks
        .iter()
        .map(|t| normalize_title(&t.title))
        .collect();
    let mut added = Vec::new();

    for obj in candidates {
        let title = str_field(obj, "title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED);
        if !titles.insert(normalize_title(title)) {
            continue;
        }
        let id = backlog.allocate_id();
        let task = Task::new(id, title, now)
            .with_description(str_field(obj, "description").unwrap_or_default())
            .with_priority(str_field(obj, "priority").map_or(Priority::P2, Priority::coerce))
            .with_tags(obj.get("tags").map(coerce_tags).unwrap_or_default());
        backlog.tasks.push(task);
        added.push(id);
    }

    if added.is_empty() {
        return Err(TanukiError::validation(
            "no new tasks: every proposed title already exists",
        ));
    }
    backlog.recompute_next_id();
    Ok(added)
}
