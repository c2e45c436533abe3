//! Error types for the embedding client

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Everything that can go wrong while turning text into vectors.
///
/// Configuration problems are never retried; every other variant is treated as
/// transient by [`crate::retry::embed_with_retry`] until the attempt budget
/// runs out, at which point it is wrapped in [`EmbedError::RetriesExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Missing API URL or key, or an unusable setting such as a zero batch size
    #[error("Embedding configuration error: {message}")]
    Configuration { message: String },

    /// Transport failure, including timeouts
    #[error("Embedding request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status
    #[error("Embedding API returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// The service answered 2xx but the payload is unusable
    #[error("Malformed embedding response: {message}")]
    MalformedResponse { message: String },

    /// Bounded retries ran out for a job
    #[error("Embedding for {job} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        job: String,
        attempts: u32,
        #[source]
        last: Box<EmbedError>,
    },
}

impl EmbedError {
    /// Create a configuration error with a custom message.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a malformed-response error with a custom message.
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration { .. } | Self::RetriesExhausted { .. }
        )
    }
}
