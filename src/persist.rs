//! Atomic whole-file persistence.
//!
//! Every document Tanuki owns (backlog, registry, configuration) is rewritten
//! completely on save: write a sibling temp file, flush it, then rename it over
//! the target while holding an exclusive lock on a sibling lock file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, TanukiError};

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = "tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = "lock";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{suffix}"));
    path.with_file_name(name)
}

/// Replace `path` with `contents` atomically, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory, temp file or lock cannot be created,
/// or if the rename fails.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let lock_file = File::create(sibling(path, LOCK_SUFFIX))?;
    FileExt::lock_exclusive(&lock_file).map_err(|e| {
        TanukiError::config_with_path(format!("Failed to acquire lock: {e}"), path.to_path_buf())
    })?;

    let tmp_path = sibling(path, TMP_SUFFIX);
    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(contents.as_bytes())?;
    tmp_file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    // The lock is released when `lock_file` is dropped.
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// # Errors
///
/// Propagates serialization and [`write_atomic`] errors.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, &(json + "\n"))
}

/// Read a file, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns any IO error other than "not found".
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
