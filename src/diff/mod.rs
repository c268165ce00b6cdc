//! Diff apply engine.
//!
//! ```text
//! model output ──extract──> unified diff ──apply --check──> apply
//!                                              │ corrupt/failed
//!                                              ▼
//!                                 one repair prompt, same pipeline
//! ```

pub mod engine;
pub mod extract;
pub mod prompt;

pub use engine::{AppliedPatch, ChangeRequest, DiffEngine, MAX_ATTEMPTS};
pub use extract::{extract_unified_diff, is_repairable};
pub use prompt::{build_change_prompt, build_repair_prompt, ChangeContext, DIFF_ONLY_SYSTEM};
