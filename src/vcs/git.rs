//! [`Vcs`] implementation backed by the `git` command line.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

use super::Vcs;

/// Real git operations for one repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    /// Create a git surface rooted at `repo`.
    #[must_use]
    pub fn new(repo: impl AsRef<Path>) -> Self {
        Self {
            repo: repo.as_ref().to_path_buf(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo)
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        debug!("git {}", args.join(" "));
        self.command(args)
            .output()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))
    }

    /// Run git and fail with the full captured output on non-zero exit.
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            bail!("{}", describe_failure(&format!("git {}", args.join(" ")), &output))
        }
    }

    /// Run git with `input` on stdin.
    fn run_with_stdin(&self, args: &[&str], input: &str) -> Result<String> {
        debug!("git {} (stdin {} bytes)", args.join(" "), input.len());
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .context("Failed to write patch to git stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to wait for git")?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            bail!("{}", describe_failure(&format!("git {}", args.join(" ")), &output))
        }
    }

    fn succeeds(&self, args: &[&str]) -> bool {
        self.output(args).map(|o| o.status.success()).unwrap_or(false)
    }
}

/// Standard failure text: command, then both captured streams.
pub(crate) fn describe_failure(command: &str, output: &Output) -> String {
    format!(
        "Command failed: {}\n\nSTDOUT:\n{}\n\nSTDERR:\n{}",
        command,
        String::from_utf8_lossy(&output.stdout).trim_end(),
        String::from_utf8_lossy(&output.stderr).trim_end()
    )
}

impl Vcs for GitCli {
    fn status_porcelain(&self) -> Result<String> {
        self.run(&["status", "--porcelain"])
    }

    fn current_branch(&self) -> Result<String> {
        let branch = self
            .run(&["rev-parse", "--abbrev-ref", "HEAD"])
            .unwrap_or_default();
        let branch = branch.trim();
        if branch.is_empty() || branch == "HEAD" {
            // Unborn branch: rev-parse fails, symbolic-ref still knows the name.
            let symbolic = self.run(&["symbolic-ref", "--short", "HEAD"])?;
            let symbolic = symbolic.trim();
            if symbolic.is_empty() {
                bail!("HEAD is detached");
            }
            return Ok(symbolic.to_string());
        }
        Ok(branch.to_string())
    }

    fn default_remote_branch(&self, remote: &str) -> Option<String> {
        let reference = format!("refs/remotes/{remote}/HEAD");
        self.run(&["symbolic-ref", &reference])
            .ok()
            .and_then(|out| out.trim().rsplit('/').next().map(str::to_string))
            .filter(|b| !b.is_empty())
    }

    fn has_remote(&self, remote: &str) -> bool {
        self.succeeds(&["remote", "get-url", remote])
    }

    fn branch_exists(&self, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        self.succeeds(&["show-ref", "--verify", "--quiet", &reference])
    }

    fn fetch(&self, _remote: &str) -> Result<()> {
        self.run(&["fetch", "--all", "--prune"]).map(|_| ())
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", branch]).map(|_| ())
    }

    fn checkout_new(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "-b", branch]).map(|_| ())
    }

    fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["pull", "--ff-only", remote, branch]).map(|_| ())
    }

    fn add_all(&self) -> Result<()> {
        self.run(&["add", "-A"]).map(|_| ())
    }

    fn staged_files(&self) -> Result<Vec<String>> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.run(&["commit", "-m", message]).map(|_| ())
    }

    fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let output = self
            .command(&["push", "-u", remote, branch])
            .env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes -o ConnectTimeout=10")
            .output()
            .context("Failed to push to remote")?;

        if output.status.success() {
            Ok(())
        } else {
            bail!(
                "{}",
                describe_failure(&format!("git push -u {remote} {branch}"), &output)
            )
        }
    }

    fn apply_check(&self, patch: &str) -> Result<()> {
        self.run_with_stdin(&["apply", "--check", "--whitespace=nowarn", "-"], patch)
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("git apply --check failed:\n{e}"))
    }

    fn apply(&self, patch: &str) -> Result<()> {
        self.run_with_stdin(&["apply", "--whitespace=nowarn", "-"], patch)
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("git apply failed:\n{e}"))
    }

    fn discard_changes(&self) -> Result<()> {
        self.run(&["reset", "--hard", "-q", "HEAD"])?;
        self.run(&["clean", "-fdq"]).map(|_| ())
    }
}
