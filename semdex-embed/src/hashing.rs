//! Deterministic offline embedder.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

/// Feature-hashing bag-of-words embedder.
///
/// Each lowercase alphanumeric word increments one bucket chosen by its FNV
/// hash, and the result is L2-normalized. Texts sharing words land close
/// together, which is enough for tests and for running without a service.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(EmbedError::configuration("hash embedder needs at least one dimension"));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(word.to_lowercase().as_bytes());
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(texts.iter().map(|t| self.embed(t)).collect()))
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn test_shared_words_are_closer() {
        let embedder = HashEmbeddingProvider::new(64).unwrap();
        let query = embedder.embed("rust borrow checker");
        let near = embedder.embed("The borrow checker in Rust");
        let far = embedder.embed("pancakes with maple syrup");
        assert!(distance(&query, &near) < distance(&query, &far));
    }

    #[tokio::test]
    async fn test_is_deterministic_and_normalized() {
        let embedder = HashEmbeddingProvider::new(16).unwrap();
        let texts = vec!["alpha beta".to_string(), "alpha beta".to_string()];
        let result = embedder.embed_texts(&texts).await.unwrap();
        assert_eq!(result.embeddings[0], result.embeddings[1]);
        let norm: f32 = result.embeddings[0].iter().map(|x| x * x).sum();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(HashEmbeddingProvider::new(0).is_err());
    }
}
