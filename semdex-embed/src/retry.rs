//! Batching and bounded exponential backoff around an [`EmbeddingProvider`].

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff settings: attempt `n` (1-based) that fails waits
/// `min(base_delay * 2^(n-1), max_delay)` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let scaled = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        Duration::from_millis(scaled.min(self.max_delay_ms))
    }
}

/// Embeds `texts` in batches of `batch_size`, retrying each failed batch
/// according to `policy`.
///
/// Returns one vector per text in input order, or an error. Vectors from
/// batches that succeeded before a terminal failure are discarded, so callers
/// never see a partial result. `job` names the work in the terminal error.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    policy: &RetryPolicy,
    job: &str,
) -> Result<Vec<Vec<f32>>> {
    if batch_size == 0 {
        return Err(EmbedError::configuration("embedding batch size must be at least 1"));
    }

    let mut vectors = Vec::with_capacity(texts.len());
    for (index, batch) in texts.chunks(batch_size).enumerate() {
        let embedded = embed_batch_with_retry(provider, batch, policy, job).await?;
        tracing::debug!(
            "{}: embedded batch {} ({} texts, dim {})",
            job,
            index,
            embedded.len(),
            embedded.first().map_or(0, Vec::len)
        );
        vectors.extend(embedded);
    }
    Ok(vectors)
}

async fn embed_batch_with_retry(
    provider: &dyn EmbeddingProvider,
    batch: &[String],
    policy: &RetryPolicy,
    job: &str,
) -> Result<Vec<Vec<f32>>> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match provider.embed_texts(batch).await {
            Ok(result) if result.len() == batch.len() => return Ok(result.embeddings),
            Ok(result) => EmbedError::malformed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                result.len()
            )),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::error!("{}: giving up after {} attempts: {}", job, attempt, err);
            return Err(EmbedError::RetriesExhausted {
                job: job.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            "{}: attempt {}/{} failed ({}), retrying in {:?}",
            job,
            attempt,
            max_attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
