//! OpenAI-compatible `/v1/embeddings` client

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding provider that posts `{model, input}` to `{api_url}/v1/embeddings`.
///
/// Every request carries the configured timeout so a stalled service turns
/// into an error the retry loop can act on.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<Secret<String>>,
    model: String,
}

impl std::fmt::Debug for HttpEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingProvider")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            api_url: config
                .api_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone().map(Secret::new),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> Result<(String, &Secret<String>)> {
        let url = self
            .api_url
            .as_deref()
            .ok_or_else(|| EmbedError::configuration("embedding API URL is not set"))?;
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::configuration("embedding API key is not set"))?;
        Ok((format!("{url}/v1/embeddings"), key))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let (url, key) = self.endpoint()?;
        if texts.is_empty() {
            return Ok(EmbeddingResult::default());
        }

        let response = self
            .client
            .post(url)
            .bearer_auth(key.expose_secret())
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::malformed(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(EmbedError::malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let result = EmbeddingResult::new(parsed.data.into_iter().map(|d| d.embedding).collect());
        if !result.is_uniform() {
            return Err(EmbedError::malformed("embeddings have mixed dimensions"));
        }
        Ok(result)
    }

    fn provider_name(&self) -> &str {
        &self.model
    }
}
