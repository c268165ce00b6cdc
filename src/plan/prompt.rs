//! Planner prompts and tolerant parsing of sentinel-delimited responses.

use serde_json::{json, Value};

use crate::snapshot::RepoSnapshot;
use crate::task::Backlog;

pub const CONTEXT_SENTINEL: &str = "===CONTEXT_MD===";
pub const ARCHITECTURE_SENTINEL: &str = "===ARCHITECTURE_MD===";
pub const TASKS_SENTINEL: &str = "===TASKS_JSON===";

const SENTINELS: [&str; 3] = [CONTEXT_SENTINEL, ARCHITECTURE_SENTINEL, TASKS_SENTINEL];

/// Tree entries included in planner prompts.
const PROMPT_TREE_ENTRIES: usize = 400;

pub const ARCHITECT_SYSTEM: &str = "You are Tanuki, an expert staff-level software engineer and architect. \
Your job is to maintain a project's context, its architecture and a backlog of small, \
independently shippable tasks. Return clear, actionable output in exactly the requested format.";

pub const INCREMENTAL_SYSTEM: &str = "You are Tanuki, an expert staff-level engineer. \
You propose incremental tasks for an existing backlog. Be concise and actionable.";

/// Existing tasks in the compact form shown to the model.
fn compact_backlog(backlog: &Backlog) -> String {
    let tasks: Vec<Value> = backlog
        .tasks
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "title": t.title,
                "status": t.status,
                "priority": t.priority,
                "tags": t.tags,
            })
        })
        .collect();
    serde_json::to_string_pretty(&json!({ "tasks": tasks })).unwrap_or_else(|_| "{}".to_string())
}

/// Inputs shared by both planner prompts.
pub struct PromptInputs<'a> {
    pub project_name: &'a str,
    pub brief: &'a str,
    pub context: &'a str,
    pub architecture: &'a str,
    pub backlog: &'a Backlog,
    pub snapshot: &'a RepoSnapshot,
}

/// Prompt for a full replan.
#[must_use]
pub fn build_plan_prompt(inputs: &PromptInputs<'_>) -> String {
    format!(
        "Project name: {name}\n\n\
         User brief:\n{brief}\n\n\
         Current CONTEXT.md:\n{context}\n\n\
         Current ARCHITECTURE.md:\n{architecture}\n\n\
         Current backlog (keep ids when you refer to an existing task):\n{backlog}\n\n\
         Repo tree (truncated):\n{tree}\n\n\
         Important files (truncated):\n{important}\n\n\
         Return EXACTLY three blocks, in this order:\n\n\
         {ctx_s}\n<updated CONTEXT.md: goals, constraints, scope>\n\n\
         {arch_s}\n<updated ARCHITECTURE.md: Overview, Tech stack, Modules, Data model, Quality gates>\n\n\
         {tasks_s}\n{{ \"tasks\": [ ... ] }}\n\n\
         Rules for tasks:\n\
         - Include existing tasks you want to change, with their id.\n\
         - Only set \"status\" to change it deliberately; omit it otherwise.\n\
         - Each new task needs: title, description, priority (\"P1\"/\"P2\"/\"P3\"), tags (list).\n\
         - Do NOT write code.\n",
        name = inputs.project_name,
        brief = inputs.brief,
        context = inputs.context,
        architecture = inputs.architecture,
        backlog = compact_backlog(inputs.backlog),
        tree = inputs.snapshot.tree_text(PROMPT_TREE_ENTRIES),
        important = inputs.snapshot.important_text(),
        ctx_s = CONTEXT_SENTINEL,
        arch_s = ARCHITECTURE_SENTINEL,
        tasks_s = TASKS_SENTINEL,
    )
}

/// Prompt for append-only task addition.
#[must_use]
pub fn build_add_prompt(inputs: &PromptInputs<'_>) -> String {
    format!(
        "Project name: {name}\n\n\
         Incremental request from the user:\n{brief}\n\n\
         Existing CONTEXT.md (for goals):\n{context}\n\n\
         Existing ARCHITECTURE.md (for structure):\n{architecture}\n\n\
         Existing tasks (avoid duplicates):\n{backlog}\n\n\
         Repo tree (truncated):\n{tree}\n\n\
         Important files (truncated):\n{important}\n\n\
         Return EXACTLY one block:\n\n\
         {tasks_s}\n{{ \"tasks\": [ ... ] }}\n\n\
         Rules:\n\
         - Generate ONLY new tasks needed for the request above.\n\
         - Do NOT repeat any existing task titles.\n\
         - Do NOT include ids.\n\
         - Each task must include: title, description, priority (\"P1\"/\"P2\"/\"P3\"), tags (list).\n\
         - 1 to 8 tasks.\n\
         - Do NOT write code.\n",
        name = inputs.project_name,
        brief = inputs.brief,
        context = inputs.context,
        architecture = inputs.architecture,
        backlog = compact_backlog(inputs.backlog),
        tree = inputs.snapshot.tree_text(PROMPT_TREE_ENTRIES),
        important = inputs.snapshot.important_text(),
        tasks_s = TASKS_SENTINEL,
    )
}

// ============================================================================
// Response parsing
// ============================================================================

/// Text following `sentinel` up to the next known sentinel, trimmed.
/// `None` when the sentinel is absent or the block is empty.
#[must_use]
pub fn extract_block(response: &str, sentinel: &str) -> Option<String> {
    let start = response.find(sentinel)? + sentinel.len();
    let rest = &response[start..];
    let end = SENTINELS
        .iter()
        .filter_map(|s| rest.find(s))
        .min()
        .unwrap_or(rest.len());
    let block = rest[..end].trim();
    (!block.is_empty()).then(|| block.to_string())
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence if present.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.split_once('\n').map_or("", |(_, body)| body);
    inner.trim_end().strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse a tasks block into task objects.
///
/// Accepts `{"tasks": [...]}` or a bare array, optionally fenced and
/// surrounded by stray prose. Non-object entries are dropped.
///
/// # Errors
///
/// Returns a description of why the block is unusable.
pub fn parse_tasks_block(block: &str) -> std::result::Result<Vec<Value>, String> {
    let body = strip_fence(block);
    let value = serde_json::from_str::<Value>(body).or_else(|first_err| {
        let start = body.find(['{', '[']);
        let end = body.rfind(['}', ']']);
        match (start, end) {
            (Some(s), Some(e)) if e > s => serde_json::from_str::<Value>(&body[s..=e])
                .map_err(|e| format!("tasks block is not valid JSON: {e}")),
            _ => Err(format!("tasks block is not valid JSON: {first_err}")),
        }
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("tasks") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("\"tasks\" is not a list".to_string()),
            None => return Err("tasks block has no \"tasks\" key".to_string()),
        },
        _ => return Err("tasks block is neither an object nor a list".to_string()),
    };

    Ok(items.into_iter().filter(Value::is_object).collect())
}

/// A parsed full-replan response.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResponse {
    pub context: Option<String>,
    pub architecture: Option<String>,
    /// Task proposals, or why they could not be read.
    pub tasks: std::result::Result<Vec<Value>, String>,
}

/// Split a replan response into its three blocks.
#[must_use]
pub fn parse_plan_response(response: &str) -> PlanResponse {
    let tasks = match extract_block(response, TASKS_SENTINEL) {
        Some(block) => parse_tasks_block(&block),
        None => Err(format!("response has no {TASKS_SENTINEL} block")),
    };
    PlanResponse {
        context: extract_block(response, CONTEXT_SENTINEL),
        architecture: extract_block(response, ARCHITECTURE_SENTINEL),
        tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "===CONTEXT_MD===\n# Context\nGoals\n===ARCHITECTURE_MD===\n# Arch\n===TASKS_JSON===\n{\"tasks\": [{\"title\": \"A\"}]}\n";

    #[test]
    fn test_parse_full_response() {
        let parsed = parse_plan_response(FULL);
        assert_eq!(parsed.context.as_deref(), Some("# Context\nGoals"));
        assert_eq!(parsed.architecture.as_deref(), Some("# Arch"));
        assert_eq!(parsed.tasks.unwrap().len(), 1);
    }

    #[test]
    fn test_missing_blocks_are_none() {
        let parsed = parse_plan_response("===TASKS_JSON===\n[]");
        assert!(parsed.context.is_none());
        assert!(parsed.architecture.is_none());
        assert_eq!(parsed.tasks.unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn test_missing_tasks_block_is_error() {
        let parsed = parse_plan_response("===CONTEXT_MD===\nctx\n");
        assert!(parsed.tasks.unwrap_err().contains("===TASKS_JSON==="));
    }

    #[test]
    fn test_tasks_block_tolerates_fence_and_prose() {
        let block = "```json\n{\"tasks\": [{\"title\": \"A\"}, 3]}\n```";
        assert_eq!(parse_tasks_block(block).unwrap().len(), 1);

        let block = "Here you go:\n{\"tasks\": [{\"title\": \"B\"}]}\nThanks!";
        assert_eq!(parse_tasks_block(block).unwrap().len(), 1);
    }

    #[test]
    fn test_tasks_block_rejects_garbage() {
        assert!(parse_tasks_block("not json at all").is_err());
        assert!(parse_tasks_block("{\"tasks\": \"nope\"}").is_err());
        assert!(parse_tasks_block("{\"items\": []}").is_err());
    }

    #[test]
    fn test_blocks_out_of_order_still_bounded() {
        let text = "===TASKS_JSON===\n[]\n===CONTEXT_MD===\nctx";
        assert_eq!(extract_block(text, TASKS_SENTINEL).as_deref(), Some("[]"));
        assert_eq!(extract_block(text, CONTEXT_SENTINEL).as_deref(), Some("ctx"));
    }
}
