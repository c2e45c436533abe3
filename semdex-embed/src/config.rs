//! Configuration for the embedding client

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Default model requested from the embedding service.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Connection and batching settings for an OpenAI-compatible embedding service.
///
/// Every field has a default so a partially filled TOML table deserializes.
/// A missing `api_url` or `api_key` is not an error here: it surfaces as
/// [`crate::EmbedError::Configuration`] when a job actually needs to embed.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Base URL; requests go to `{api_url}/v1/embeddings`
    pub api_url: Option<String>,
    /// Bearer token
    pub api_key: Option<String>,
    /// Model name sent with every request
    pub model: String,
    /// Maximum number of texts per HTTP request
    pub batch_size: usize,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Backoff settings for failed requests
    pub retry: RetryPolicy,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            batch_size: 5,
            timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

// Keeps the API key out of logs.
impl std::fmt::Debug for EmbedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry", &self.retry)
            .finish()
    }
}

impl EmbedConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: Some(api_url.into()),
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Set the model name (builder style)
    pub fn with_model(self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    /// Set the batch size for embedding requests (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set the per-request timeout (builder style)
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            ..self
        }
    }

    /// Set the retry policy (builder style)
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Overlays `SEMDEX_EMBED_*` and `SEMDEX_RETRY_*` values from `lookup`.
    ///
    /// Values that fail to parse are ignored with a warning so a typo in one
    /// variable does not take the whole service down.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("SEMDEX_EMBED_API_URL") {
            self.api_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(key) = lookup("SEMDEX_EMBED_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("SEMDEX_EMBED_MODEL") {
            self.model = model;
        }
        parse_into(&lookup, "SEMDEX_EMBED_BATCH_SIZE", &mut self.batch_size);
        parse_into(&lookup, "SEMDEX_EMBED_TIMEOUT_MS", &mut self.timeout_ms);
        parse_into(&lookup, "SEMDEX_RETRY_ATTEMPTS", &mut self.retry.max_attempts);
        parse_into(&lookup, "SEMDEX_RETRY_BASE_MS", &mut self.retry.base_delay_ms);
        parse_into(&lookup, "SEMDEX_RETRY_MAX_MS", &mut self.retry.max_delay_ms);
        self
    }

    /// [`Self::apply_overrides`] against the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring unparsable {}={:?}", name, raw),
        }
    }
}
