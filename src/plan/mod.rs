//! Plan reconciler.
//!
//! - [`prompt`] - planner prompts and sentinel-block parsing
//! - [`merge`] - non-destructive merge of proposals into a backlog
//! - [`planner`] - the provider round trip for `plan` and `task add`

pub mod merge;
pub mod planner;
pub mod prompt;

pub use merge::{append_new_tasks, merge_proposals, record_plan_failure, MergeReport};
pub use planner::{PlanOutcome, Planner};
pub use prompt::{parse_plan_response, parse_tasks_block, PlanResponse};
