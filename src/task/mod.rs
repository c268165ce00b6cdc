//! Backlog data model and storage.
//!
//! - [`state`] - task status and priority
//! - [`model`] - tasks, the backlog document and its load-time normalization
//! - [`store`] - whole-document atomic persistence

pub mod model;
pub mod state;
pub mod store;

pub use model::{
    coerce_id, coerce_tags, normalize_title, Backlog, Task, TaskFilter, TaskId, BACKLOG_VERSION,
    DEFAULT_BLOCK_REASON, UNTITLED,
};
pub use state::{Priority, Status};
pub use store::TaskStore;
