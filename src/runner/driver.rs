//! Continuous loop over the single-task protocol.

use tracing::{info, warn};

use super::{PassOutcome, RunOptions, Runner, Unblocked};
use crate::error::Result;
use crate::task::{Priority, Status, TaskId};

/// Blocked tasks listed when the loop halts on them.
pub const BLOCKED_SUMMARY_LIMIT: usize = 10;

/// One line of the blocked-task report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedSummary {
    pub id: TaskId,
    pub priority: Priority,
    pub title: String,
    pub reason: String,
}

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No `todo` tasks remain.
    NoTodo,
    /// No `todo` tasks remain and some are blocked.
    OnlyBlocked { blocked: Vec<BlockedSummary> },
    /// The task-count ceiling was reached.
    Ceiling,
    /// A task failed and `keep_going` is off.
    Failure { task_id: TaskId, reason: String },
    /// A dry run previews one task and stops.
    DryRun,
}

impl StopReason {
    /// Whether the run ended in a state the operator must look at.
    #[must_use]
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::OnlyBlocked { .. } | Self::Failure { .. })
    }
}

/// Result of one pass inside the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub task_id: TaskId,
    /// The outcome, or the block reason on failure.
    pub result: std::result::Result<PassOutcome, String>,
}

/// Everything a loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub passes: Vec<PassRecord>,
    pub recovered: Vec<TaskId>,
    pub unblocked: Vec<Unblocked>,
    pub stop: StopReason,
}

impl LoopSummary {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.passes.iter().filter(|p| p.result.is_err()).count()
    }
}

impl Runner {
    /// Repeat passes until a stop condition holds.
    ///
    /// A task failure is already recorded as `blocked` when it reaches the
    /// loop, so it only ends the loop when `keep_going` is off.
    ///
    /// Stale `doing` recovery and auto-unblock run once when the loop starts
    /// and, in daemon mode, again after each poll sleep. A task that fails
    /// inside this loop therefore stays blocked until the next invocation.
    ///
    /// # Errors
    ///
    /// Returns backlog load/save errors. Task failures are reported in the
    /// summary instead.
    pub async fn run_loop(&self, options: &RunOptions) -> Result<LoopSummary> {
        let mut passes = Vec::new();
        let mut recovered = Vec::new();
        let mut unblocked = Vec::new();
        let mut prepare = true;

        let stop = loop {
            if options.max_tasks.is_some_and(|max| passes.len() >= max) {
                break StopReason::Ceiling;
            }

            if prepare {
                let (reset, cleared) = self.prepare_pass().await?;
                recovered.extend(reset);
                unblocked.extend(cleared);
                prepare = false;
            }

            let backlog = self.ctx.store().load()?;
            let Some(task) = backlog.select_next().cloned() else {
                let blocked = backlog.count(Status::Blocked);
                if blocked > 0 && !options.ignore_blocked {
                    warn!("No todo tasks; {} blocked task(s) need attention", blocked);
                    break StopReason::OnlyBlocked {
                        blocked: backlog
                            .blocked_summary(BLOCKED_SUMMARY_LIMIT)
                            .into_iter()
                            .map(|t| BlockedSummary {
                                id: t.id,
                                priority: t.priority,
                                title: t.title.clone(),
                                reason: t.blocked_reason.clone().unwrap_or_default(),
                            })
                            .collect(),
                    };
                }
                if options.daemon {
                    info!(
                        "No todo tasks; polling again in {}s",
                        options.poll_interval.as_secs()
                    );
                    tokio::time::sleep(options.poll_interval).await;
                    prepare = true;
                    continue;
                }
                break StopReason::NoTodo;
            };

            let task_id = task.id;
            match self.run_task(task, options).await {
                Ok(outcome) => {
                    let dry_run = matches!(outcome, PassOutcome::DryRun { .. });
                    passes.push(PassRecord {
                        task_id,
                        result: Ok(outcome),
                    });
                    if dry_run {
                        break StopReason::DryRun;
                    }
                }
                Err(err) => {
                    let reason = err.reason();
                    passes.push(PassRecord {
                        task_id,
                        result: Err(reason.clone()),
                    });
                    if !options.keep_going {
                        break StopReason::Failure { task_id, reason };
                    }
                }
            }
        };

        info!(
            "Runner stopped after {} pass(es), {} failed",
            passes.len(),
            passes.iter().filter(|p| p.result.is_err()).count()
        );
        Ok(LoopSummary {
            passes,
            recovered,
            unblocked,
            stop,
        })
    }
}
