//! OpenAI chat-completions provider.
//!
//! Requests go through `curl` as a subprocess; the request body is piped on
//! stdin so large prompts never hit argument-length limits.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::LlmClient;
use crate::error::TanukiError;

// =============================================================================
// Errors
// =============================================================================

/// Structured OpenAI failures.
#[derive(Error, Debug)]
pub enum OpenAiError {
    /// No key in config and none in the environment.
    #[error("Missing OpenAI API key. Set {env_var} or run: tanuki setup")]
    ApiKeyNotFound { env_var: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("Quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Anything the API returned that we could not use.
    #[error("Invalid API response: {message}")]
    InvalidResponse { message: String },
}

impl OpenAiError {
    /// Whether the failure should clear without a code change.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. })
    }

    /// Classify an `{"error": {...}}` body.
    pub fn from_error_body(error: &serde_json::Value) -> Self {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        let kind = format!(
            "{} {}",
            error.get("type").and_then(|t| t.as_str()).unwrap_or(""),
            error.get("code").and_then(|c| c.as_str()).unwrap_or("")
        )
        .to_lowercase();
        let lower = message.to_lowercase();

        if kind.contains("insufficient_quota") || lower.contains("quota") {
            Self::QuotaExceeded { message }
        } else if kind.contains("rate_limit") || lower.contains("rate limit") {
            Self::RateLimited { message }
        } else if kind.contains("invalid_api_key")
            || kind.contains("authentication")
            || lower.contains("api key")
        {
            Self::AuthenticationFailed { message }
        } else {
            Self::InvalidResponse { message }
        }
    }
}

/// An unusable response is reported like unusable diff output: a patch
/// failure the runner may retry on a later loop.
impl From<OpenAiError> for TanukiError {
    fn from(err: OpenAiError) -> Self {
        if err.is_transient() {
            TanukiError::transient(err.to_string())
        } else {
            TanukiError::patch(err.to_string())
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

// =============================================================================
// Client
// =============================================================================

/// OpenAI provider.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    timeout_secs: u64,
    api_base: String,
}

impl OpenAiClient {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_API_BASE: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_API_KEY_ENV: &'static str = "OPENAI_API_KEY";

    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            api_key_env: Self::DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            api_base: Self::DEFAULT_API_BASE.to_string(),
        }
    }

    #[must_use]
    pub fn with_api_key_env(mut self, env_var: &str) -> Self {
        self.api_key_env = env_var.to_string();
        self
    }

    /// Use a stored key instead of the environment.
    #[must_use]
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> Result<String, OpenAiError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| OpenAiError::ApiKeyNotFound {
                env_var: self.api_key_env.clone(),
            })
    }

    fn build_request(&self, system: Option<&str>, prompt: &str) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
        }
    }

    async fn execute_request(&self, system: Option<&str>, prompt: &str) -> Result<String, OpenAiError> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.api_base);
        let body = serde_json::to_string(&self.build_request(system, prompt)).map_err(|e| {
            OpenAiError::InvalidResponse {
                message: format!("Failed to serialize request: {e}"),
            }
        })?;

        debug!(
            "Sending request to OpenAI {} ({} chars prompt)",
            self.model,
            prompt.len()
        );

        let mut child = AsyncCommand::new("curl")
            .args([
                "-sS",
                "-X",
                "POST",
                &url,
                "-H",
                &format!("Authorization: Bearer {api_key}"),
                "-H",
                "Content-Type: application/json",
                "--data-binary",
                "@-",
                "--max-time",
                &self.timeout_secs.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OpenAiError::ConnectionError {
                message: format!("Failed to execute curl: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .await
                .map_err(|e| OpenAiError::ConnectionError {
                    message: format!("Failed to send request body: {e}"),
                })?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OpenAiError::ConnectionError {
                message: format!("Failed to read curl output: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // curl exit 28 is operation timeout
            if output.status.code() == Some(28) || stderr.contains("timed out") {
                return Err(OpenAiError::Timeout {
                    timeout_secs: self.timeout_secs,
                });
            }
            return Err(OpenAiError::ConnectionError {
                message: format!("curl failed: {}", stderr.trim()),
            });
        }

        parse_response(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the first choice's content from a response body.
fn parse_response(body: &str) -> Result<String, OpenAiError> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(error) = value.get("error") {
            return Err(OpenAiError::from_error_body(error));
        }
    }

    let response: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| OpenAiError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })?;

    let content = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(OpenAiError::InvalidResponse {
            message: "empty completion".to_string(),
        });
    }
    Ok(content)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        Ok(self.execute_request(system, prompt).await?)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn available(&self) -> bool {
        self.api_key().is_ok()
    }
}
