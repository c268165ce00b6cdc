//! Testing infrastructure for tanuki.
//!
//! This module provides mocks and fixtures for testing the runner and its
//! components without real repositories, hosting CLIs or model providers.
//!
//! # Architecture
//!
//! - **Mocks**: test doubles for [`crate::vcs::Vcs`], [`crate::vcs::PrHost`],
//!   [`crate::snapshot::SnapshotProvider`] and [`crate::llm::LlmClient`]
//! - **Fixtures**: a temporary workspace with a registered project (test-only)
//!
//! # Example
//!
//! ```rust,ignore
//! use tanuki::testing::{MockLlmClient, MockVcs};
//!
//! let vcs = MockVcs::new().with_remote("origin").with_staged(&["a.txt"]);
//! let llm = MockLlmClient::new().with_response("diff --git ...");
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

pub use crate::llm::MockLlmClient;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
