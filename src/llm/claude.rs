//! Provider backed by the `claude` CLI in print mode.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::LlmClient;

/// Runs `claude -p`, piping the prompt on stdin.
#[derive(Debug, Clone)]
pub struct ClaudeCliClient {
    work_dir: PathBuf,
    model: String,
    timeout_secs: u64,
}

impl ClaudeCliClient {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    #[must_use]
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            model: "sonnet".to_string(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Prompt text with the system preamble folded in.
fn compose(system: Option<&str>, prompt: &str) -> String {
    match system {
        Some(system) => format!("{system}\n\n{prompt}"),
        None => prompt.to_string(),
    }
}

#[async_trait]
impl LlmClient for ClaudeCliClient {
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let input = compose(system, prompt);
        debug!(
            "Running claude CLI with model {} ({} chars prompt)",
            self.model,
            input.len()
        );

        let mut child = match AsyncCommand::new("claude")
            .args(["-p", "--model", &self.model, "--output-format", "text"])
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("Code generation provider unavailable: the 'claude' CLI is not installed or not in PATH")
            }
            Err(e) => bail!("Connection error: failed to spawn claude: {e}"),
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Connection error: failed to write prompt to claude")?;
            drop(stdin);
        }

        let output = match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result.context("Connection error: failed to read claude output")?,
            Err(_) => bail!("Request timed out after {}s", self.timeout_secs),
        };

        if !output.status.success() {
            bail!(
                "claude exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        if text.trim().is_empty() {
            bail!("Empty response from claude");
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn available(&self) -> bool {
        which::which("claude").is_ok()
    }
}
