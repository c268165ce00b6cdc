//! Per-pass run records under `runs/`.

use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;
use crate::persist::write_atomic;

/// File name of the record inside each run directory.
pub const RUN_FILE: &str = "run.md";

/// Accumulates `key: value` lines for one pass and writes them as `run.md`.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
    lines: Vec<String>,
}

impl RunLog {
    /// Allocate `runs_dir/<UTC timestamp>-<8 hex>` without creating it.
    #[must_use]
    pub fn new(runs_dir: &Path, now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8]);
        Self {
            dir: runs_dir.join(name),
            lines: Vec::new(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn field(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("{key}: {value}"));
    }

    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Write `run.md`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self) -> Result<PathBuf> {
        let path = self.dir.join(RUN_FILE);
        let body = self.lines.join("\n");
        write_atomic(&path, &format!("{}\n", body.trim_end()))?;
        Ok(path)
    }
}
