//! Planner: one provider call per replan, merged into the stored backlog.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::merge::{append_new_tasks, merge_proposals, record_plan_failure, MergeReport};
use super::prompt::{
    build_add_prompt, build_plan_prompt, extract_block, parse_plan_response, parse_tasks_block,
    PromptInputs, ARCHITECT_SYSTEM, INCREMENTAL_SYSTEM, TASKS_SENTINEL,
};
use crate::error::{IntoTanukiError, Result, TanukiError};
use crate::llm::{provider_error, LlmClient};
use crate::persist::{read_optional, write_atomic};
use crate::progress::with_spinner;
use crate::snapshot::{RepoSnapshot, SnapshotProvider};
use crate::task::TaskId;
use crate::workspace::{init_project, ProjectContext, ARCHITECTURE_TEMPLATE, CONTEXT_TEMPLATE};

/// Result of a full replan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub report: MergeReport,
    /// Why the tasks block was unusable, when it was.
    pub tasks_error: Option<String>,
    /// Id of the synthetic failure task, when one was recorded.
    pub failure_task: Option<TaskId>,
    pub context_updated: bool,
    pub architecture_updated: bool,
}

/// Drives the plan and add-task flows for one project.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    snapshot: Arc<dyn SnapshotProvider>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, snapshot: Arc<dyn SnapshotProvider>) -> Self {
        Self { llm, snapshot }
    }

    fn read_doc(path: &Path, template: &str) -> Result<String> {
        Ok(read_optional(path)?
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| template.to_string()))
    }

    fn take_snapshot(&self, repo: &Path) -> Result<RepoSnapshot> {
        self.snapshot.snapshot(repo).into_validation()
    }

    async fn ask(&self, system: &str, prompt: &str, label: &str) -> Result<String> {
        info!("Requesting {} from {}", label, self.llm.model_name());
        with_spinner(
            &format!("Waiting for {} ({})", label, self.llm.model_name()),
            self.llm.complete(Some(system), prompt),
        )
        .await
        .map_err(provider_error)
    }

    /// Regenerate context, architecture and tasks from `brief`.
    ///
    /// A response without a usable tasks block leaves the backlog as it was
    /// apart from one blocked "Fix plan output" task.
    ///
    /// # Errors
    ///
    /// Fails on a blank brief, an unreadable repository, a provider error
    /// or a backlog that cannot be loaded or saved.
    pub async fn plan(&self, ctx: &ProjectContext, brief: &str) -> Result<PlanOutcome> {
        let brief = brief.trim();
        if brief.is_empty() {
            return Err(TanukiError::validation("plan brief is empty"));
        }
        init_project(ctx)?;

        let context = Self::read_doc(&ctx.context_path(), CONTEXT_TEMPLATE)?;
        let architecture = Self::read_doc(&ctx.architecture_path(), ARCHITECTURE_TEMPLATE)?;
        let store = ctx.store();
        let backlog = store.load()?;
        let snapshot = self.take_snapshot(ctx.repo_path())?;

        let prompt = build_plan_prompt(&PromptInputs {
            project_name: &ctx.project.name,
            brief,
            context: &context,
            architecture: &architecture,
            backlog: &backlog,
            snapshot: &snapshot,
        });
        let response = self.ask(ARCHITECT_SYSTEM, &prompt, "plan").await?;
        let parsed = parse_plan_response(&response);

        let context_updated = match &parsed.context {
            Some(text) => {
                write_atomic(&ctx.context_path(), &format!("{}\n", text.trim_end()))?;
                true
            }
            None => {
                warn!("Plan response had no context block; keeping the current one");
                false
            }
        };
        let architecture_updated = match &parsed.architecture {
            Some(text) => {
                write_atomic(&ctx.architecture_path(), &format!("{}\n", text.trim_end()))?;
                true
            }
            None => {
                warn!("Plan response had no architecture block; keeping the current one");
                false
            }
        };

        let now = Utc::now();
        let (report, tasks_error, failure_task) = store.update(|backlog| match &parsed.tasks {
            Ok(proposals) => Ok((merge_proposals(backlog, proposals, now), None, None)),
            Err(reason) => {
                warn!("Plan tasks block unusable: {}", reason);
                let id = record_plan_failure(backlog, reason, now);
                Ok((MergeReport::default(), Some(reason.clone()), Some(id)))
            }
        })?;

        Ok(PlanOutcome {
            report,
            tasks_error,
            failure_task,
            context_updated,
            architecture_updated,
        })
    }

    /// Ask for new tasks only and append the ones with unseen titles.
    ///
    /// # Errors
    ///
    /// Fails with a validation error when the response holds no usable
    /// tasks or only titles that already exist.
    pub async fn add_tasks(&self, ctx: &ProjectContext, brief: &str) -> Result<Vec<TaskId>> {
        let brief = brief.trim();
        if brief.is_empty() {
            return Err(TanukiError::validation("task brief is empty"));
        }
        init_project(ctx)?;

        let context = Self::read_doc(&ctx.context_path(), CONTEXT_TEMPLATE)?;
        let architecture = Self::read_doc(&ctx.architecture_path(), ARCHITECTURE_TEMPLATE)?;
        let store = ctx.store();
        let backlog = store.load()?;
        let snapshot = self.take_snapshot(ctx.repo_path())?;

        let prompt = build_add_prompt(&PromptInputs {
            project_name: &ctx.project.name,
            brief,
            context: &context,
            architecture: &architecture,
            backlog: &backlog,
            snapshot: &snapshot,
        });
        let response = self.ask(INCREMENTAL_SYSTEM, &prompt, "new tasks").await?;

        // Models sometimes drop the sentinel on a single-block answer.
        let block = extract_block(&response, TASKS_SENTINEL).unwrap_or_else(|| response.clone());
        let proposals = parse_tasks_block(&block).map_err(|reason| {
            TanukiError::validation(format!("Model did not return valid tasks JSON: {reason}"))
        })?;

        let now = Utc::now();
        let added = store.update(|backlog| append_new_tasks(backlog, &proposals, now))?;
        info!("Added {} task(s)", added.len());
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Status, Task};
    use crate::testing::{MockLlmClient, MockSnapshotProvider};
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    fn context() -> (ProjectContext, TempDir) {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let ws = Workspace::new(temp.path().join("home"));
        ws.ensure().unwrap();
        ws.registry().unwrap().add("demo", &repo).unwrap();
        (ws.project("demo").unwrap(), temp)
    }

    fn planner(llm: MockLlmClient) -> (Planner, Arc<MockLlmClient>) {
        let llm = Arc::new(llm);
        let planner = Planner::new(llm.clone(), Arc::new(MockSnapshotProvider::new()));
        (planner, llm)
    }

    const RESPONSE: &str = "===CONTEXT_MD===\n# Context\nShip it\n===ARCHITECTURE_MD===\n# Architecture\nMonolith\n===TASKS_JSON===\n{\"tasks\": [{\"title\": \"Add login\", \"priority\": \"P1\", \"tags\": [\"auth\"]}]}";

    #[tokio::test]
    async fn test_plan_writes_docs_and_tasks() {
        let (ctx, _temp) = context();
        let (planner, llm) = planner(MockLlmClient::new().with_response(RESPONSE));

        let outcome = planner.plan(&ctx, "Build a login page").await.unwrap();
        assert_eq!(outcome.report.added, vec![1]);
        assert!(outcome.context_updated && outcome.architecture_updated);
        assert_eq!(llm.call_count(), 1);

        let (system, prompt) = llm.requests().remove(0);
        assert_eq!(system.as_deref(), Some(ARCHITECT_SYSTEM));
        assert!(prompt.contains("Build a login page"));

        let context = std::fs::read_to_string(ctx.context_path()).unwrap();
        assert_eq!(context, "# Context\nShip it\n");
        let backlog = ctx.store().load().unwrap();
        assert_eq!(backlog.get(1).unwrap().title, "Add login");
    }

    #[tokio::test]
    async fn test_replan_preserves_progress() {
        let (ctx, _temp) = context();
        init_project(&ctx).unwrap();
        ctx.store()
            .update(|b| {
                let mut task = Task::new(7, "Add login", Utc::now());
                task.transition(Status::Doing, None, Utc::now());
                b.tasks.push(task);
                b.recompute_next_id();
                Ok(())
            })
            .unwrap();

        let (planner, _llm) = planner(MockLlmClient::new().with_response(RESPONSE));
        let outcome = planner.plan(&ctx, "again").await.unwrap();
        assert!(outcome.report.added.is_empty());

        let backlog = ctx.store().load().unwrap();
        assert_eq!(backlog.tasks.len(), 1);
        assert_eq!(backlog.get(7).unwrap().status, Status::Doing);
        assert!(backlog.next_id > 7);
    }

    #[tokio::test]
    async fn test_missing_blocks_keep_existing_docs() {
        let (ctx, _temp) = context();
        init_project(&ctx).unwrap();
        std::fs::write(ctx.context_path(), "# Mine\n").unwrap();

        let (planner, _llm) =
            planner(MockLlmClient::new().with_response("===TASKS_JSON===\n[]"));
        let outcome = planner.plan(&ctx, "brief").await.unwrap();
        assert!(!outcome.context_updated);
        assert_eq!(std::fs::read_to_string(ctx.context_path()).unwrap(), "# Mine\n");
        assert_eq!(
            std::fs::read_to_string(ctx.architecture_path()).unwrap(),
            ARCHITECTURE_TEMPLATE
        );
    }

    #[tokio::test]
    async fn test_unparsable_tasks_records_single_failure_task() {
        let (ctx, _temp) = context();
        let (planner, _llm) = planner(
            MockLlmClient::new().with_response("===TASKS_JSON===\nsorry, no json today"),
        );

        let first = planner.plan(&ctx, "brief").await.unwrap();
        let second = planner.plan(&ctx, "brief").await.unwrap();
        assert!(first.tasks_error.is_some());
        assert_eq!(first.failure_task, second.failure_task);

        let backlog = ctx.store().load().unwrap();
        assert_eq!(backlog.tasks.len(), 1);
        assert_eq!(backlog.tasks[0].status, Status::Blocked);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_backlog_untouched() {
        let (ctx, _temp) = context();
        let (planner, _llm) = planner(MockLlmClient::new().with_error("quota exceeded"));
        let err = planner.plan(&ctx, "brief").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(ctx.store().load().unwrap().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_blank_brief_is_rejected() {
        let (ctx, _temp) = context();
        let (planner, llm) = planner(MockLlmClient::new());
        let err = planner.plan(&ctx, "   ").await.unwrap_err();
        assert!(matches!(err, TanukiError::Validation { .. }));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_add_tasks_appends_new_titles() {
        let (ctx, _temp) = context();
        let (planner, llm) = planner(MockLlmClient::new().with_response(
            "```json\n{\"tasks\": [{\"title\": \"Add logout\"}, {\"title\": \"Add rate limit\"}]}\n```",
        ));
        let added = planner.add_tasks(&ctx, "session handling").await.unwrap();
        assert_eq!(added, vec![1, 2]);
        assert_eq!(
            llm.requests()[0].0.as_deref(),
            Some(INCREMENTAL_SYSTEM)
        );

        let err = planner.add_tasks(&ctx, "session handling").await.unwrap_err();
        assert!(err.to_string().contains("no new tasks"));
    }
}
