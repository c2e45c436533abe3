//! # semdex-embed
//!
//! Async client for OpenAI-compatible embedding services.
//!
//! ## Features
//!
//! - **Provider trait**: [`EmbeddingProvider`] abstracts the service so indexing
//!   code can run against an in-process embedder in tests
//! - **HTTP provider**: [`HttpEmbeddingProvider`] posts `{model, input}` to
//!   `{api_url}/v1/embeddings` with bearer auth and a request timeout
//! - **Batching and retry**: [`embed_with_retry`] splits inputs into batches and
//!   retries failed batches with capped exponential backoff
//!
//! ## Quick Start
//!
//! ```no_run
//! use semdex_embed::{EmbedConfig, HttpEmbeddingProvider, embed_with_retry};
//!
//! # async fn example() -> semdex_embed::Result<()> {
//! let config = EmbedConfig::new("https://api.example.com", "sk-...").with_batch_size(8);
//! let provider = HttpEmbeddingProvider::new(&config)?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let vectors = embed_with_retry(&provider, &texts, config.batch_size, &config.retry, "example").await?;
//! assert_eq!(vectors.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.
//! Configuration errors fail immediately; everything else is retried until the
//! policy's attempt budget is spent.

pub mod config;
pub mod error;
pub mod hashing;
pub mod http;
pub mod provider;
pub mod retry;

// Re-export main types for easy access
pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use hashing::HashEmbeddingProvider;
pub use http::HttpEmbeddingProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult};
pub use retry::{RetryPolicy, embed_with_retry};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EmbedConfig::default();
        assert_eq!(config.model, config::DEFAULT_MODEL);
        assert!(config.api_url.is_none());
        assert!(config.api_key.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_embedding_result_dimension() {
        let result = EmbeddingResult::new(vec![vec![0.0; 4], vec![1.0; 4]]);
        assert_eq!(result.dimension, 4);
        assert!(result.is_uniform());
        assert!(EmbeddingResult::new(Vec::new()).is_empty());
    }
}
