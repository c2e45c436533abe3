//! Embedding provider abstraction

use crate::error::Result;
use async_trait::async_trait;

/// Result of embedding generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result, inferring the dimension from the first vector.
    ///
    /// An empty result has dimension 0.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Whether every vector has the same dimension.
    pub fn is_uniform(&self) -> bool {
        self.embeddings.iter().all(|e| e.len() == self.dimension)
    }
}

/// Trait for services that turn text into vectors.
///
/// One call corresponds to one request to the backing service; batching
/// across calls and retries are layered on top by [`crate::retry`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per text, preserving order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Generate the embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .pop()
            .ok_or_else(|| crate::EmbedError::malformed("empty embedding response"))
    }

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}
