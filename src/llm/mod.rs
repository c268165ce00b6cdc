//! Text-completion provider abstraction.
//!
//! The planner and the diff engine talk to a model only through the
//! [`LlmClient`] trait. Two real providers exist:
//!
//! - [`OpenAiClient`] - chat completions over HTTPS (via `curl`)
//! - [`ClaudeCliClient`] - the `claude` CLI in print mode
//!
//! [`MockLlmClient`] scripts responses for tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use tanuki::llm::{create_llm_client, LlmConfig};
//!
//! let client = create_llm_client(&LlmConfig::default(), repo)?;
//! let text = client.complete(Some("You are terse."), "Say hi").await?;
//! ```

pub mod claude;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TanukiError;

pub use claude::ClaudeCliClient;
pub use openai::{OpenAiClient, OpenAiError};

/// Abstraction for text-completion providers.
///
/// Object-safe and `Send + Sync`, so callers hold an `Arc<dyn LlmClient>`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one request with an optional system preamble.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable, rejects the
    /// credentials, is rate limited or returns an unusable response.
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String>;

    /// Send a prompt without a system preamble.
    ///
    /// # Errors
    ///
    /// See [`LlmClient::complete`].
    async fn run_prompt(&self, prompt: &str) -> Result<String> {
        self.complete(None, prompt).await
    }

    /// Model identifier used for requests.
    fn model_name(&self) -> &str;

    /// Whether the provider can be used right now (key present, CLI found).
    async fn available(&self) -> bool;
}

// =============================================================================
// Configuration
// =============================================================================

/// Supported provider names.
pub const PROVIDERS: [&str; 2] = ["openai", "claude-cli"];

/// `[llm]` section of `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `openai` or `claude-cli`.
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable consulted for the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Stored key. Takes precedence over the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-5-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            api_base: None,
        }
    }
}

impl LlmConfig {
    /// Validate provider and model.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown provider, an empty model
    /// name or a zero timeout.
    pub fn validate(&self) -> crate::Result<()> {
        if !PROVIDERS.contains(&self.provider.as_str()) {
            return Err(TanukiError::validation(format!(
                "Invalid LLM provider '{}'. Valid options: {}",
                self.provider,
                PROVIDERS.join(", ")
            )));
        }
        if self.model.trim().is_empty() {
            return Err(TanukiError::validation("LLM model must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(TanukiError::validation("LLM timeout must be positive"));
        }
        Ok(())
    }
}

/// Build the client selected by `config`.
///
/// `work_dir` is where CLI-based providers run.
///
/// # Errors
///
/// Returns a validation error if the configuration is invalid.
pub fn create_llm_client(config: &LlmConfig, work_dir: &Path) -> crate::Result<Arc<dyn LlmClient>> {
    config.validate()?;

    match config.provider.as_str() {
        "claude-cli" => Ok(Arc::new(
            ClaudeCliClient::new(work_dir)
                .with_model(&config.model)
                .with_timeout(config.timeout_secs),
        )),
        _ => {
            let mut client = OpenAiClient::new(&config.model)
                .with_api_key_env(&config.api_key_env)
                .with_timeout(config.timeout_secs);
            if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
                client = client.with_api_key(key);
            }
            if let Some(base) = config.api_base.as_deref() {
                client = client.with_api_base(base);
            }
            Ok(Arc::new(client))
        }
    }
}

/// Map a provider failure into the taxonomy.
///
/// Typed OpenAI errors keep their own classification; anything else from a
/// provider is an environment problem.
pub fn provider_error(err: anyhow::Error) -> TanukiError {
    match err.downcast::<OpenAiError>() {
        Ok(typed) => typed.into(),
        Err(other) => TanukiError::transient(format!("{other:#}")),
    }
}

// =============================================================================
// Mock client
// =============================================================================

/// Scriptable client for tests.
///
/// Responses queued with [`MockLlmClient::with_response`] are returned in
/// order; once the queue is empty the last one repeats. Every request is
/// recorded.
///
/// ```rust,ignore
/// let client = MockLlmClient::new()
///     .with_response("first")
///     .with_response("second");
/// ```
#[derive(Debug)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    last_response: Mutex<String>,
    error: Option<String>,
    model: String,
    available: bool,
    call_count: AtomicU32,
    fail_count: AtomicU32,
    fail_error: Option<String>,
    requests: Mutex<Vec<(Option<String>, String)>>,
}

impl Clone for MockLlmClient {
    fn clone(&self) -> Self {
        Self {
            responses: Mutex::new(lock_clone(&self.responses)),
            last_response: Mutex::new(lock_clone(&self.last_response)),
            error: self.error.clone(),
            model: self.model.clone(),
            available: self.available,
            call_count: AtomicU32::new(self.call_count.load(Ordering::SeqCst)),
            fail_count: AtomicU32::new(self.fail_count.load(Ordering::SeqCst)),
            fail_error: self.fail_error.clone(),
            requests: Mutex::new(lock_clone(&self.requests)),
        }
    }
}

fn lock_clone<T: Clone + Default>(mutex: &Mutex<T>) -> T {
    mutex.lock().map(|g| g.clone()).unwrap_or_default()
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last_response: Mutex::new(String::new()),
            error: None,
            model: "mock-llm".to_string(),
            available: true,
            call_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(0),
            fail_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    #[must_use]
    pub fn with_response(self, response: &str) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response.to_string());
        }
        self
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    /// Set what [`LlmClient::available`] reports.
    #[must_use]
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Fail the first `count` calls with `error`, then succeed.
    #[must_use]
    pub fn with_fail_count(mut self, count: u32, error: &str) -> Self {
        self.fail_count = AtomicU32::new(count);
        self.fail_error = Some(error.to_string());
        self
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Recorded `(system, prompt)` pairs, oldest first.
    pub fn requests(&self) -> Vec<(Option<String>, String)> {
        lock_clone(&self.requests)
    }

    /// Prompts only, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|(_, p)| p).collect()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((system.map(str::to_string), prompt.to_string()));
        }

        let current_fail_count = self.fail_count.load(Ordering::SeqCst);
        if current_fail_count > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            match &self.fail_error {
                Some(fail_error) => anyhow::bail!("{}", fail_error),
                None => anyhow::bail!("Mock failure"),
            }
        }

        if let Some(ref error) = self.error {
            anyhow::bail!("{}", error)
        }

        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(response) => {
                if let Ok(mut last) = self.last_response.lock() {
                    last.clone_from(&response);
                }
                Ok(response)
            }
            None => Ok(lock_clone(&self.last_response)),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn available(&self) -> bool {
        self.available
    }
}
