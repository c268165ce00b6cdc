//! Generate, validate and apply a patch, with one bounded repair.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::extract::{extract_unified_diff, is_repairable};
use super::prompt::{build_change_prompt, build_repair_prompt, ChangeContext, DIFF_ONLY_SYSTEM};
use crate::error::{Result, TanukiError};
use crate::llm::{provider_error, LlmClient};
use crate::progress::with_spinner;
use crate::vcs::Vcs;

/// Attempts allowed in total: the first diff plus one repair.
pub const MAX_ATTEMPTS: u32 = 2;

/// A patch that is now applied to the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub diff: String,
    /// 1 when the first diff applied, 2 after a repair.
    pub attempts: u32,
}

/// What the engine is asked to change.
#[derive(Debug, Clone)]
pub struct ChangeRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub context: ChangeContext,
}

/// Turns model output into an applied patch.
pub struct DiffEngine {
    llm: Arc<dyn LlmClient>,
    vcs: Arc<dyn Vcs>,
    artifacts_dir: Option<PathBuf>,
}

impl DiffEngine {
    pub fn new(llm: Arc<dyn LlmClient>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            llm,
            vcs,
            artifacts_dir: None,
        }
    }

    /// Write raw responses and extracted diffs into `dir`.
    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.artifacts_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Debug artifacts are best effort; a failed write is only logged.
    fn write_artifact(&self, name: &str, content: &str) {
        let Some(dir) = &self.artifacts_dir else {
            return;
        };
        let path = dir.join(name);
        let result = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, content));
        if let Err(e) = result {
            warn!("Could not write {}: {}", path.display(), e);
        }
    }

    async fn generate(&self, prompt: &str, attempt: u32) -> Result<String> {
        debug!("Requesting diff attempt {} from {}", attempt, self.llm.model_name());
        let raw = with_spinner(
            &format!("Generating change ({})", self.llm.model_name()),
            self.llm.complete(Some(DIFF_ONLY_SYSTEM), prompt),
        )
        .await
        .map_err(provider_error)?;

        if raw.trim().is_empty() {
            return Err(TanukiError::transient("LLM returned empty response"));
        }
        self.write_artifact(&format!("llm_raw_{attempt}.txt"), &raw);

        let diff = extract_unified_diff(&raw)?;
        self.write_artifact(&format!("diff_{attempt}.patch"), &diff);
        Ok(diff)
    }

    /// Dry-run first; the tree is only touched once the check passes.
    fn apply(&self, diff: &str) -> Result<()> {
        self.vcs
            .apply_check(diff)
            .map_err(|e| TanukiError::patch(format!("{e:#}")))?;
        self.vcs
            .apply(diff)
            .map_err(|e| TanukiError::patch(format!("{e:#}")))
    }

    /// Produce a change for `request` and apply it.
    ///
    /// # Errors
    ///
    /// - transient error when the provider is unavailable or answers empty
    /// - patch error when no diff can be extracted, or when the diff and its
    ///   single repair both fail to apply
    pub async fn apply_change(&self, request: &ChangeRequest<'_>) -> Result<AppliedPatch> {
        if !self.llm.available().await {
            return Err(TanukiError::transient(format!(
                "Code generation provider unavailable: {} has no credentials or CLI",
                self.llm.model_name()
            )));
        }

        let prompt = build_change_prompt(request.title, request.description, &request.context);
        let first = self.generate(&prompt, 1).await?;

        let err = match self.apply(&first) {
            Ok(()) => {
                info!("Patch applied on first attempt");
                return Ok(AppliedPatch {
                    diff: first,
                    attempts: 1,
                });
            }
            Err(e) => e,
        };

        let message = err.to_string();
        self.write_artifact("apply_error_1.txt", &message);
        if !is_repairable(&message) {
            return Err(err);
        }

        info!("Patch did not apply; requesting one repair");
        let repair_prompt = build_repair_prompt(&first, &message);
        let second = self.generate(&repair_prompt, MAX_ATTEMPTS).await?;
        match self.apply(&second) {
            Ok(()) => {
                info!("Repaired patch applied");
                Ok(AppliedPatch {
                    diff: second,
                    attempts: MAX_ATTEMPTS,
                })
            }
            Err(e) => {
                self.write_artifact("apply_error_2.txt", &e.to_string());
                Err(e)
            }
        }
    }
}
