//! Task status and priority types.
//!
//! Both enums have a strict parser (`parse`, returning `None` for anything
//! unrecognized) and a lenient one (`coerce`, clamping to a fallback). The
//! lenient form is only used at the document boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a task.
///
/// # Transitions driven by the runner
///
/// - `Todo` -> `Doing`: task selected
/// - `Doing` -> `Review`: change published for review
/// - `Doing` -> `Done`: change finished without publication
/// - `Doing` -> `Blocked`: any failure during the pass
/// - `Blocked` -> `Todo`: auto-unblock matched a transient cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Todo,
    Doing,
    Review,
    Blocked,
    Done,
    Skipped,
}

impl Status {
    /// All statuses, in display order.
    pub const ALL: [Status; 6] = [
        Status::Todo,
        Status::Doing,
        Status::Review,
        Status::Blocked,
        Status::Done,
        Status::Skipped,
    ];

    /// Strictly parse a status name (case-insensitive, surrounding whitespace ignored).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "todo" => Some(Self::Todo),
            "doing" => Some(Self::Doing),
            "review" => Some(Self::Review),
            "blocked" => Some(Self::Blocked),
            "done" => Some(Self::Done),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Parse a status, clamping anything unrecognized to `Todo`.
    #[must_use]
    pub fn coerce(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::Todo)
    }

    /// Name as stored in the backlog document.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Review => "review",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Skipped => "skipped",
        }
    }

    /// Statuses the runner never moves a task out of.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Review | Self::Done | Self::Skipped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!("unknown status '{s}' (expected todo, doing, review, blocked, done or skipped)")
        })
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Task priority. `P1` is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    /// Strictly parse a priority (`P1`/`P2`/`P3`, case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "P1" => Some(Self::P1),
            "P2" => Some(Self::P2),
            "P3" => Some(Self::P3),
            _ => None,
        }
    }

    /// Parse a priority, clamping anything unrecognized to `P2`.
    #[must_use]
    pub fn coerce(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::P2)
    }

    /// Sort rank used by task selection. Lower runs first.
    ///
    /// Values outside P1..P3 are clamped to P2 when the document is loaded,
    /// so every stored task has one of these three ranks.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P3 => 3,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown priority '{s}' (expected P1, P2 or P3)"))
    }
}
