//! Recovery of tasks left in `doing` by an interrupted pass.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::task::{Backlog, Status, TaskId};

/// Reset `doing` tasks untouched for longer than `grace` back to `todo`.
///
/// With a single worker, a `doing` task that old cannot belong to a live
/// pass. Fresher ones are left alone.
pub fn reset_stale_doing(backlog: &mut Backlog, grace: Duration, now: DateTime<Utc>) -> Vec<TaskId> {
    let mut reset = Vec::new();
    for task in backlog
        .tasks
        .iter_mut()
        .filter(|t| t.status == Status::Doing && now - t.updated_at > grace)
    {
        warn!(
            "Task {} has been in doing since {}; resetting to todo",
            task.id,
            task.updated_at.to_rfc3339()
        );
        task.transition(Status::Todo, None, now);
        reset.push(task.id);
    }
    reset
}
