//! Task and backlog model, and the boundary that normalizes stored documents.
//!
//! Backlog documents written by older versions encode ids as strings
//! (`"t12"`), carry free-form status and priority strings, and may lack the
//! `version`/`next_id` header. [`Backlog::from_json`] is the only place that
//! tolerates any of that; everything past it works with typed values.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

use super::state::{Priority, Status};
use crate::error::{Result, TanukiError, MAX_REASON_CHARS};
use crate::text::clip_chars;

/// Current backlog document version.
pub const BACKLOG_VERSION: u32 = 1;

/// Reason recorded when a task enters `blocked` without one.
pub const DEFAULT_BLOCK_REASON: &str = "Blocked without a recorded reason";

/// Title used when a document or proposal has none.
pub const UNTITLED: &str = "Untitled task";

/// Task identifier. Positive, unique within a backlog, never reused.
pub type TaskId = u64;

// ============================================================================
// Task
// ============================================================================

/// A single backlog entry.
///
/// Status changes must go through [`Task::transition`], which keeps
/// `blocked_reason`, `started_at` and `done_at` consistent with `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub priority: Priority,
    /// Insertion order is kept for display; duplicates are dropped.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub done_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
}

impl Task {
    /// Create a fresh `todo` task.
    #[must_use]
    pub fn new(id: TaskId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        let title = title.into();
        let title = if title.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            title.trim().to_string()
        };
        Self {
            id,
            title,
            description: String::new(),
            status: Status::Todo,
            priority: Priority::default(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            done_at: None,
            blocked_reason: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into().trim().to_string();
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the tags (deduplicated, order kept).
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.set_tags(tags);
        self
    }

    /// Replace the tags, dropping blanks and duplicates.
    pub fn set_tags(&mut self, tags: Vec<String>) {
        let mut seen = HashSet::new();
        self.tags = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
    }

    /// Advance `updated_at`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Move the task to `to`, maintaining the timestamp and reason fields.
    ///
    /// - entering `doing` sets `started_at` if unset
    /// - entering `done` sets `done_at`, backfills `started_at`, clears the reason
    /// - entering `blocked` stores `reason` (or [`DEFAULT_BLOCK_REASON`])
    /// - every other status clears the reason
    ///
    /// Re-entering `blocked` with a different reason updates the reason.
    /// Returns whether anything changed.
    pub fn transition(&mut self, to: Status, reason: Option<&str>, now: DateTime<Utc>) -> bool {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| clip_chars(r, MAX_REASON_CHARS));

        if self.status == to {
            if to == Status::Blocked {
                if let Some(reason) = reason {
                    if self.blocked_reason.as_deref() != Some(reason.as_str()) {
                        self.blocked_reason = Some(reason);
                        self.touch(now);
                        return true;
                    }
                }
            }
            return false;
        }

        match to {
            Status::Doing => {
                self.started_at.get_or_insert(now);
                self.done_at = None;
                self.blocked_reason = None;
            }
            Status::Done => {
                self.started_at.get_or_insert(now);
                self.done_at = Some(now);
                self.blocked_reason = None;
            }
            Status::Blocked => {
                self.blocked_reason =
                    Some(reason.unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string()));
                self.done_at = None;
            }
            Status::Todo | Status::Review | Status::Skipped => {
                self.blocked_reason = None;
                self.done_at = None;
            }
        }
        self.status = to;
        self.touch(now);
        true
    }

    /// Build a task from one stored JSON object, coercing legacy encodings.
    ///
    /// The id may come back as 0 when it could not be recovered; the caller
    /// assigns a fresh one.
    fn from_object(obj: &Map<String, Value>, now: DateTime<Utc>) -> Self {
        let id = obj.get("id").map_or(0, coerce_id);
        let title = obj.get("title").and_then(Value::as_str).unwrap_or_default();
        let mut task = Task::new(id, title, now);

        task.description = obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        task.status = obj
            .get("status")
            .and_then(Value::as_str)
            .map_or(Status::Todo, Status::coerce);
        task.priority = obj
            .get("priority")
            .and_then(Value::as_str)
            .map_or(Priority::P2, Priority::coerce);
        task.set_tags(obj.get("tags").map(coerce_tags).unwrap_or_default());

        task.created_at = obj.get("created_at").and_then(coerce_timestamp).unwrap_or(now);
        task.updated_at = obj
            .get("updated_at")
            .and_then(coerce_timestamp)
            .unwrap_or(task.created_at)
            .max(task.created_at);
        task.started_at = obj.get("started_at").and_then(coerce_timestamp);
        task.done_at = obj.get("done_at").and_then(coerce_timestamp);
        task.blocked_reason = obj
            .get("blocked_reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| clip_chars(r, MAX_REASON_CHARS));

        task.enforce_invariants();
        task
    }

    /// Repair field combinations that contradict `status`.
    fn enforce_invariants(&mut self) {
        if self.status == Status::Blocked {
            if self.blocked_reason.is_none() {
                self.blocked_reason = Some(DEFAULT_BLOCK_REASON.to_string());
            }
        } else {
            self.blocked_reason = None;
        }

        if self.status == Status::Done {
            if self.done_at.is_none() {
                self.done_at = Some(self.updated_at);
            }
        } else {
            self.done_at = None;
        }
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Criteria for listing tasks. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    /// Compared case-insensitively.
    pub tag: Option<String>,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
            && self.tag.as_deref().map_or(true, |wanted| {
                let wanted = wanted.trim().to_lowercase();
                task.tags.iter().any(|t| t.to_lowercase() == wanted)
            })
    }
}

// ============================================================================
// Backlog
// ============================================================================

/// The complete task list for one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backlog {
    pub version: u32,
    /// Always greater than every id in `tasks`.
    pub next_id: TaskId,
    pub tasks: Vec<Task>,
}

impl Default for Backlog {
    fn default() -> Self {
        Self {
            version: BACKLOG_VERSION,
            next_id: 1,
            tasks: Vec::new(),
        }
    }
}

impl Backlog {
    /// Create an empty backlog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stored backlog document.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the text is not JSON or the document
    /// structure is wrong (tasks not a list, a task not an object). Field
    /// values are never a reason to fail: they are clamped instead.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TanukiError::validation(format!("backlog is not valid JSON: {e}")))?;
        Self::from_value(&value, Utc::now())
    }

    /// Normalize an already-parsed backlog document.
    ///
    /// # Errors
    ///
    /// Same structural errors as [`Backlog::from_json`].
    pub fn from_value(value: &Value, now: DateTime<Utc>) -> Result<Self> {
        let (version, stored_next_id, items) = match value {
            Value::Object(map) => {
                let version = map
                    .get("version")
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(BACKLOG_VERSION);
                let next_id = map.get("next_id").and_then(Value::as_u64).unwrap_or(0);
                let items = match map.get("tasks") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.clone(),
                    Some(_) => {
                        return Err(TanukiError::validation("backlog 'tasks' must be a list"))
                    }
                };
                (version, next_id, items)
            }
            // Oldest documents were a bare list of tasks.
            Value::Array(items) => (BACKLOG_VERSION, 0, items.clone()),
            _ => {
                return Err(TanukiError::validation(
                    "backlog document must be an object with a 'tasks' list",
                ))
            }
        };

        let mut tasks = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let obj = item.as_object().ok_or_else(|| {
                TanukiError::validation(format!("backlog task #{} is not an object", index + 1))
            })?;
            tasks.push(Task::from_object(obj, now));
        }

        let mut backlog = Self {
            version,
            next_id: stored_next_id,
            tasks,
        };
        backlog.assign_missing_ids();
        backlog.recompute_next_id();
        Ok(backlog)
    }

    /// Serialize as the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization itself fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Give every task with id 0 or an id already taken earlier a fresh id.
    fn assign_missing_ids(&mut self) {
        let max_id = self.tasks.iter().map(|t| t.id).max().unwrap_or(0);
        let mut next = self.next_id.max(max_id + 1).max(1);
        let mut seen = HashSet::new();
        for task in &mut self.tasks {
            if task.id == 0 || !seen.insert(task.id) {
                task.id = next;
                seen.insert(next);
                next += 1;
            }
        }
        self.next_id = next;
    }

    /// Restore `next_id > max(id)`.
    pub fn recompute_next_id(&mut self) {
        let max_id = self.tasks.iter().map(|t| t.id).max().unwrap_or(0);
        self.next_id = self.next_id.max(max_id + 1).max(1);
    }

    /// Reserve the next id.
    pub fn allocate_id(&mut self) -> TaskId {
        self.recompute_next_id();
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Highest-priority, then oldest, `todo` task.
    #[must_use]
    pub fn select_next(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == Status::Todo)
            .min_by_key(|t| (t.priority.rank(), t.id))
    }

    /// Number of tasks in `status`.
    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Tasks matching `filter`, sorted by priority then id.
    #[must_use]
    pub fn filter(&self, filter: &TaskFilter) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().filter(|t| filter.matches(t)).collect();
        tasks.sort_by_key(|t| (t.priority.rank(), t.id));
        tasks
    }

    /// Up to `limit` blocked tasks, sorted by priority then id.
    #[must_use]
    pub fn blocked_summary(&self, limit: usize) -> Vec<&Task> {
        let mut blocked: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == Status::Blocked)
            .collect();
        blocked.sort_by_key(|t| (t.priority.rank(), t.id));
        blocked.truncate(limit);
        blocked
    }
}

// ============================================================================
// Field coercion
// ============================================================================

fn id_suffix_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+)\s*$").ok())
        .as_ref()
}

/// Recover a numeric id from an integer or a string with a numeric suffix.
///
/// Returns 0 when nothing usable is found.
#[must_use]
pub fn coerce_id(value: &Value) -> TaskId {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 1.0 && f.fract() == 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => id_suffix_pattern()
            .and_then(|re| re.captures(s.trim()))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

/// Accept either a list of strings or a comma separated string.
#[must_use]
pub fn coerce_tags(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Parse RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS` treated as UTC.
#[must_use]
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Matching key for titles: trimmed, lower-cased, whitespace runs collapsed.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_coerce_id_variants() {
        assert_eq!(coerce_id(&json!(7)), 7);
        assert_eq!(coerce_id(&json!("12")), 12);
        assert_eq!(coerce_id(&json!("t12")), 12);
        assert_eq!(coerce_id(&json!("task-3 ")), 3);
        assert_eq!(coerce_id(&json!("abc")), 0);
        assert_eq!(coerce_id(&json!(null)), 0);
        assert_eq!(coerce_id(&json!(-4)), 0);
    }

    #[test]
    fn test_coerce_timestamp_accepts_naive() {
        let parsed = coerce_timestamp(&json!("2024-03-01T10:00:00")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(coerce_timestamp(&json!("2024-03-01T10:00:00Z")).is_some());
        assert!(coerce_timestamp(&json!("yesterday")).is_none());
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Add   Login\tPage "), "add login page");
    }

    #[test]
    fn test_transition_to_done_sets_timestamps() {
        let mut task = Task::new(1, "x", ts(0));
        assert!(task.transition(Status::Done, None, ts(10)));
        assert_eq!(task.done_at, Some(ts(10)));
        assert_eq!(task.started_at, Some(ts(10)));
        assert_eq!(task.updated_at, ts(10));
    }

    #[test]
    fn test_transition_to_blocked_requires_reason() {
        let mut task = Task::new(1, "x", ts(0));
        task.transition(Status::Blocked, Some("  "), ts(1));
        assert_eq!(task.blocked_reason.as_deref(), Some(DEFAULT_BLOCK_REASON));

        task.transition(Status::Blocked, Some("quota exceeded"), ts(2));
        assert_eq!(task.blocked_reason.as_deref(), Some("quota exceeded"));

        task.transition(Status::Todo, None, ts(3));
        assert!(task.blocked_reason.is_none());
    }

    #[test]
    fn test_transition_keeps_started_at() {
        let mut task = Task::new(1, "x", ts(0));
        task.transition(Status::Doing, None, ts(5));
        task.transition(Status::Blocked, Some("boom"), ts(6));
        task.transition(Status::Todo, None, ts(7));
        task.transition(Status::Doing, None, ts(8));
        assert_eq!(task.started_at, Some(ts(5)));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut task = Task::new(1, "x", ts(100));
        task.touch(ts(50));
        assert_eq!(task.updated_at, ts(100));
        task.touch(ts(100) + Duration::seconds(1));
        assert_eq!(task.updated_at, ts(101));
    }

    #[test]
    fn test_same_status_transition_is_noop() {
        let mut task = Task::new(1, "x", ts(0));
        assert!(!task.transition(Status::Todo, None, ts(9)));
        assert_eq!(task.updated_at, ts(0));
    }

    #[test]
    fn test_from_value_legacy_document() {
        let doc = json!({
            "tasks": [
                {"id": "t1", "title": "First", "status": "weird", "priority": "high"},
                {"id": 4, "title": "Second", "status": "blocked"},
                {"title": "No id", "status": "done", "updated_at": "2024-01-01T00:00:00Z"}
            ]
        });
        let backlog = Backlog::from_value(&doc, ts(0)).unwrap();
        assert_eq!(backlog.version, BACKLOG_VERSION);
        assert_eq!(backlog.tasks[0].id, 1);
        assert_eq!(backlog.tasks[0].status, Status::Todo);
        assert_eq!(backlog.tasks[0].priority, Priority::P2);
        assert_eq!(
            backlog.tasks[1].blocked_reason.as_deref(),
            Some(DEFAULT_BLOCK_REASON)
        );
        // id-less task gets a fresh id above the max
        assert_eq!(backlog.tasks[2].id, 5);
        assert!(backlog.tasks[2].done_at.is_some());
        assert_eq!(backlog.next_id, 6);
    }

    #[test]
    fn test_from_value_duplicate_ids_reassigned() {
        let doc = json!({"version": 1, "next_id": 2, "tasks": [
            {"id": 3, "title": "a"}, {"id": 3, "title": "b"}
        ]});
        let backlog = Backlog::from_value(&doc, ts(0)).unwrap();
        assert_eq!(backlog.tasks[0].id, 3);
        assert_eq!(backlog.tasks[1].id, 4);
        assert!(backlog.next_id > 4);
    }

    #[test]
    fn test_from_value_clears_reason_on_non_blocked() {
        let doc = json!({"tasks": [
            {"id": 1, "title": "a", "status": "todo", "blocked_reason": "old"}
        ]});
        let backlog = Backlog::from_value(&doc, ts(0)).unwrap();
        assert!(backlog.tasks[0].blocked_reason.is_none());
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            Backlog::from_json("{not json"),
            Err(TanukiError::Validation { .. })
        ));
        assert!(matches!(
            Backlog::from_json(r#"{"tasks": {"id": 1}}"#),
            Err(TanukiError::Validation { .. })
        ));
        assert!(matches!(
            Backlog::from_json(r#"{"tasks": [1, 2]}"#),
            Err(TanukiError::Validation { .. })
        ));
        assert!(matches!(
            Backlog::from_json("42"),
            Err(TanukiError::Validation { .. })
        ));
    }

    #[test]
    fn test_next_id_respects_stored_counter() {
        let doc = json!({"version": 1, "next_id": 40, "tasks": [{"id": 2, "title": "a"}]});
        let backlog = Backlog::from_value(&doc, ts(0)).unwrap();
        assert_eq!(backlog.next_id, 40);
    }

    #[test]
    fn test_select_next_priority_then_id() {
        let now = ts(0);
        let mut done = Task::new(1, "done", now);
        done.transition(Status::Done, None, now);
        let backlog = Backlog {
            version: 1,
            next_id: 4,
            tasks: vec![
                done,
                Task::new(2, "p1", now).with_priority(Priority::P1),
                Task::new(3, "p2", now).with_priority(Priority::P2),
            ],
        };
        assert_eq!(backlog.select_next().map(|t| t.id), Some(2));
    }

    #[test]
    fn test_select_next_tie_breaks_on_id() {
        let now = ts(0);
        let backlog = Backlog {
            version: 1,
            next_id: 10,
            tasks: vec![
                Task::new(9, "later", now).with_priority(Priority::P1),
                Task::new(4, "earlier", now).with_priority(Priority::P1),
            ],
        };
        assert_eq!(backlog.select_next().map(|t| t.id), Some(4));
    }

    #[test]
    fn test_blocked_summary_sorted_and_bounded() {
        let now = ts(0);
        let mut tasks = Vec::new();
        for (id, prio) in [(5, Priority::P3), (2, Priority::P1), (3, Priority::P1)] {
            let mut t = Task::new(id, "b", now).with_priority(prio);
            t.transition(Status::Blocked, Some("x"), now);
            tasks.push(t);
        }
        let backlog = Backlog {
            version: 1,
            next_id: 6,
            tasks,
        };
        let ids: Vec<_> = backlog.blocked_summary(2).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_tags_deduplicated_in_order() {
        let task = Task::new(1, "x", ts(0)).with_tags(vec![
            "ui".into(),
            "api".into(),
            "ui".into(),
            " ".into(),
        ]);
        assert_eq!(task.tags, vec!["ui".to_string(), "api".to_string()]);
    }

    #[test]
    fn test_filter_by_status_priority_and_tag() {
        let mut blocked = Task::new(1, "a", ts(0)).with_tags(vec!["UI".into()]);
        blocked.transition(Status::Blocked, Some("x"), ts(1));
        let backlog = Backlog {
            version: 1,
            next_id: 4,
            tasks: vec![
                blocked,
                Task::new(2, "b", ts(0)).with_priority(Priority::P3),
                Task::new(3, "c", ts(0))
                    .with_priority(Priority::P1)
                    .with_tags(vec!["ui".into()]),
            ],
        };
        let ids = |f: TaskFilter| -> Vec<TaskId> { backlog.filter(&f).iter().map(|t| t.id).collect() };

        assert_eq!(ids(TaskFilter::default()), vec![3, 1, 2]);
        assert_eq!(
            ids(TaskFilter {
                status: Some(Status::Todo),
                ..TaskFilter::default()
            }),
            vec![3, 2]
        );
        assert_eq!(
            ids(TaskFilter {
                tag: Some("Ui".into()),
                ..TaskFilter::default()
            }),
            vec![3, 1]
        );
        assert_eq!(
            ids(TaskFilter {
                priority: Some(Priority::P3),
                ..TaskFilter::default()
            }),
            vec![2]
        );
    }
}
