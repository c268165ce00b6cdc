//! Shell command execution with live line streaming.
//!
//! stdout and stderr are drained concurrently and each line is emitted as a
//! `debug!` event while it arrives. The caller still waits for exit and gets
//! the complete captured text, exactly as with a buffered `output()` call.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit status and captured streams of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Both streams in the layout used for block reasons.
    #[must_use]
    pub fn combined(&self) -> String {
        format!(
            "STDOUT:\n{}\n\nSTDERR:\n{}",
            self.stdout.trim_end(),
            self.stderr.trim_end()
        )
    }
}

/// Read `stream` to EOF line by line. Bytes that are not UTF-8 are
/// replaced rather than ending the read, so the child never sees a closed
/// pipe.
async fn drain<R: AsyncRead + Unpin>(stream: Option<R>, label: &'static str) -> String {
    let Some(stream) = stream else {
        return String::new();
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches('\n').trim_end_matches('\r');
                debug!("[{label}] {line}");
                captured.push_str(line);
                captured.push('\n');
            }
            Err(e) => {
                warn!("Reading {label} failed: {e}");
                break;
            }
        }
    }
    captured
}

/// Run `command` through `/bin/sh -lc` in `cwd`.
///
/// # Errors
///
/// Returns an error only if the shell cannot be spawned or waited on. A
/// non-zero exit is reported through [`CommandOutput::code`].
pub async fn run_shell(command: &str, cwd: &Path) -> Result<CommandOutput> {
    debug!("$ {command}");
    let mut child = Command::new("/bin/sh")
        .args(["-lc", command])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn: {command}"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::join!(
        drain(stdout, "stdout"),
        drain(stderr, "stderr"),
        child.wait()
    );
    let status = status.with_context(|| format!("Failed to wait for: {command}"))?;

    Ok(CommandOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}
