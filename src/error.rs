//! Custom error types for Tanuki.
//!
//! Every failure that can stop a task is funnelled into one of five
//! categories. The category decides whether the task is blocked, whether a
//! repair is attempted and whether the auto-unblock pass may pick it up again.

use std::path::PathBuf;
use thiserror::Error;

use crate::text::clip_chars;

/// Upper bound on the length of any reason string stored on a task.
pub const MAX_REASON_CHARS: usize = 5000;

/// Coarse failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Malformed input or document, or no active project. Never retried.
    Validation,
    /// Credentials, connectivity, quota or a missing capability.
    TransientEnvironment,
    /// Generated diff was unparsable or did not apply.
    Patch,
    /// A verification command exited non-zero.
    Check,
    /// Dirty tree, rejected push and other repository state problems.
    GitState,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::TransientEnvironment => "transient-environment",
            Self::Patch => "patch",
            Self::Check => "check",
            Self::GitState => "git-state",
        };
        write!(f, "{name}")
    }
}

/// Main error type for Tanuki operations
#[derive(Error, Debug)]
pub enum TanukiError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Malformed input, document or request
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// No project selected in the workspace
    #[error("No active project. Run: tanuki project add <name> --path <repo>")]
    NoActiveProject,

    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    // =========================================================================
    // Environment Errors
    // =========================================================================
    /// Credentials, connectivity, quota or an unavailable provider
    #[error("{message}")]
    TransientEnvironment { message: String },

    // =========================================================================
    // Task Execution Errors
    // =========================================================================
    /// Diff could not be extracted, validated or applied
    #[error("{message}")]
    Patch { message: String },

    /// Verification command failed
    #[error("Command failed: {command}\n\n{output}")]
    Check { command: String, output: String },

    /// Repository is not in a usable state
    #[error("Git {operation} failed: {message}")]
    GitState { operation: String, message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML parse error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TanukiError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a transient environment error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientEnvironment {
            message: message.into(),
        }
    }

    /// Create a patch error
    pub fn patch(message: impl Into<String>) -> Self {
        Self::Patch {
            message: message.into(),
        }
    }

    /// Create a check error
    pub fn check(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Check {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Create a git state error
    pub fn git_state(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GitState {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Category this error belongs to.
    ///
    /// Wrapped errors are treated as environment problems: an IO failure or
    /// an opaque collaborator error is not evidence that the task is wrong.
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Validation { .. }
            | Self::NoActiveProject
            | Self::Config { .. }
            | Self::Json(_)
            | Self::Toml(_) => FailureCategory::Validation,
            Self::TransientEnvironment { .. } | Self::Io(_) | Self::Other(_) => {
                FailureCategory::TransientEnvironment
            }
            Self::Patch { .. } => FailureCategory::Patch,
            Self::Check { .. } => FailureCategory::Check,
            Self::GitState { .. } => FailureCategory::GitState,
        }
    }

    /// Check if this error may clear without a code change
    pub fn is_retryable(&self) -> bool {
        self.category() == FailureCategory::TransientEnvironment
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            FailureCategory::Validation => 2,
            FailureCategory::TransientEnvironment => 3,
            FailureCategory::Patch => 4,
            FailureCategory::Check => 5,
            FailureCategory::GitState => 6,
        }
    }

    /// Error text clipped to [`MAX_REASON_CHARS`], suitable for a block reason.
    pub fn reason(&self) -> String {
        clip_chars(&self.to_string(), MAX_REASON_CHARS)
    }
}

/// Type alias for Tanuki results
pub type Result<T> = std::result::Result<T, TanukiError>;

/// Extension trait for converting collaborator errors into the taxonomy
pub trait IntoTanukiError<T> {
    fn into_transient(self) -> Result<T>;
    fn into_git_state(self, operation: &str) -> Result<T>;
    fn into_validation(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoTanukiError<T> for std::result::Result<T, E> {
    fn into_transient(self) -> Result<T> {
        self.map_err(|e| TanukiError::transient(format!("{:#}", e.into())))
    }

    fn into_git_state(self, operation: &str) -> Result<T> {
        self.map_err(|e| TanukiError::git_state(operation, format!("{:#}", e.into())))
    }

    fn into_validation(self) -> Result<T> {
        self.map_err(|e| TanukiError::validation(format!("{:#}", e.into())))
    }
}
