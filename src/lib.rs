//! Tanuki - autonomous task backlog runner
//!
//! Tanuki keeps a prioritized backlog per project, asks a model to plan it
//! from a brief, and works through it one task at a time: branch, generate
//! and apply a diff, run checks, commit, push and open a pull request.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`task`] - backlog model, status rules and atomic storage
//! - [`plan`] - plan reconciler (provider round trip and non-destructive merge)
//! - [`runner`] - single-task state machine, continuous loop, auto-unblock
//! - [`diff`] - diff extraction, application and one-shot repair
//! - [`workspace`] - home directory, project registry, init and doctor
//! - [`config`] - global and per-project configuration
//! - [`llm`] - model providers
//! - [`vcs`] - git and pull-request hosting surfaces
//! - [`snapshot`] - repository tree and key-file snapshot
//! - [`error`] - failure taxonomy
//! - [`testing`] - mocks and fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use tanuki::runner::{RunOptions, Runner};
//! use tanuki::workspace::Workspace;
//!
//! let ws = Workspace::resolve(None)?;
//! let ctx = ws.active_project()?;
//! let summary = runner.run_loop(&RunOptions::default().with_max_tasks(3)).await?;
//! println!("{:?}", summary.stop);
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod llm;
pub mod persist;
pub mod plan;
pub mod process;
pub mod progress;
pub mod runner;
pub mod snapshot;
pub mod task;
pub mod testing;
pub mod text;
pub mod vcs;
pub mod workspace;

// Re-export commonly used types
pub use error::{FailureCategory, IntoTanukiError, Result, TanukiError};

pub use config::{RunnerConfig, TanukiConfig};
pub use runner::{LoopSummary, PassOutcome, RunOptions, Runner, RunnerDeps, StopReason};
pub use task::{Backlog, Priority, Status, Task, TaskId, TaskStore};
pub use workspace::{ProjectContext, Workspace};
