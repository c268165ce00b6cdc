//! Auto-unblock classifier.
//!
//! A blocked task's reason is matched, case-insensitively, against a fixed
//! table of transient causes. A match sends the task back to `todo`. There
//! is no retry ceiling: a task can cycle as long as the cause recurs.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::task::{Backlog, Status, TaskId};

/// Why a blocked task is considered recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientCause {
    /// The code-generation provider is not usable. Only cleared when it is.
    MissingCapability,
    /// Credentials missing or rejected
    Credentials,
    /// Authentication with a remote service failed
    Authentication,
    /// Quota or rate limit
    Quota,
    /// Network trouble or a timeout
    Connectivity,
    /// A stubbed step that had no implementation at the time
    Unimplemented,
    /// The model answered with nothing
    EmptyOutput,
    /// The model answered with something unusable
    UnparsableOutput,
    /// A generated patch was corrupt or did not apply
    InvalidPatch,
    /// The pass produced no changes to commit
    NoOpCommit,
}

impl TransientCause {
    /// Whether clearing this cause requires the capability to be present now.
    #[must_use]
    pub fn needs_capability(&self) -> bool {
        matches!(self, Self::MissingCapability)
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingCapability => "code generation unavailable",
            Self::Credentials => "credentials",
            Self::Authentication => "authentication",
            Self::Quota => "quota or rate limit",
            Self::Connectivity => "connectivity",
            Self::Unimplemented => "unimplemented step",
            Self::EmptyOutput => "empty model output",
            Self::UnparsableOutput => "unparsable model output",
            Self::InvalidPatch => "invalid patch",
            Self::NoOpCommit => "nothing to commit",
        }
    }
}

impl std::fmt::Display for TransientCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// One reset performed by [`UnblockClassifier::unblock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unblocked {
    pub id: TaskId,
    pub cause: TransientCause,
}

/// Substring table mapping block reasons to transient causes.
#[derive(Debug, Clone)]
pub struct UnblockClassifier {
    /// Lower-case needles, checked in order.
    rules: Vec<(String, TransientCause)>,
}

impl Default for UnblockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl UnblockClassifier {
    /// Classifier with the built-in catalogue.
    #[must_use]
    pub fn new() -> Self {
        // Capability rules first: a missing key must not be read as a
        // generic credentials problem.
        let rules = [
            ("provider unavailable", TransientCause::MissingCapability),
            ("missing openai api key", TransientCause::MissingCapability),
            ("invalid api key", TransientCause::Credentials),
            ("incorrect api key", TransientCause::Credentials),
            ("invalid_api_key", TransientCause::Credentials),
            ("credentials", TransientCause::Credentials),
            ("authentication", TransientCause::Authentication),
            ("unauthorized", TransientCause::Authentication),
            ("permission denied (publickey)", TransientCause::Authentication),
            ("quota", TransientCause::Quota),
            ("rate limit", TransientCause::Quota),
            ("too many requests", TransientCause::Quota),
            ("connection", TransientCause::Connectivity),
            ("timed out", TransientCause::Connectivity),
            ("could not resolve host", TransientCause::Connectivity),
            ("network is unreachable", TransientCause::Connectivity),
            ("temporarily unavailable", TransientCause::Connectivity),
            ("not implemented", TransientCause::Unimplemented),
            ("empty response", TransientCause::EmptyOutput),
            ("recognizable unified diff", TransientCause::UnparsableOutput),
            ("invalid api response", TransientCause::UnparsableOutput),
            ("corrupt patch", TransientCause::InvalidPatch),
            ("patch failed", TransientCause::InvalidPatch),
            ("git apply --check failed", TransientCause::InvalidPatch),
            ("git apply failed", TransientCause::InvalidPatch),
            ("no changes to commit", TransientCause::NoOpCommit),
            ("nothing to commit", TransientCause::NoOpCommit),
        ];
        Self {
            rules: rules
                .into_iter()
                .map(|(needle, cause)| (needle.to_string(), cause))
                .collect(),
        }
    }

    /// Add a rule after the built-in ones.
    #[must_use]
    pub fn with_rule(mut self, needle: &str, cause: TransientCause) -> Self {
        self.rules.push((needle.to_lowercase(), cause));
        self
    }

    /// First matching cause for `reason`.
    #[must_use]
    pub fn classify(&self, reason: &str) -> Option<TransientCause> {
        let lower = reason.to_lowercase();
        self.rules
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
            .map(|(_, cause)| *cause)
    }

    /// Reset every blocked task with a transient reason to `todo`.
    ///
    /// `capability_present` gates [`TransientCause::MissingCapability`].
    pub fn unblock(
        &self,
        backlog: &mut Backlog,
        capability_present: bool,
        now: DateTime<Utc>,
    ) -> Vec<Unblocked> {
        let mut reset = Vec::new();
        for task in backlog
            .tasks
            .iter_mut()
            .filter(|t| t.status == Status::Blocked)
        {
            let reason = task.blocked_reason.as_deref().unwrap_or_default();
            let Some(cause) = self.classify(reason) else {
                continue;
            };
            if cause.needs_capability() && !capability_present {
                debug!("Task {} stays blocked: code generation still unavailable", task.id);
                continue;
            }
            task.transition(Status::Todo, None, now);
            info!("Auto-unblocked task {} ({})", task.id, cause);
            reset.push(Unblocked { id: task.id, cause });
        }
        reset
    }
}
