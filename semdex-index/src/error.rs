//! Error taxonomy for index maintenance and search.

use semdex_embed::EmbedError;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Missing embedding URL/key or another unusable setting. Fatal only to
    /// the job that needed it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding service failed, after retries where applicable.
    #[error("embedding API error: {source}")]
    EmbeddingApi {
        #[source]
        source: EmbedError,
    },

    /// Graph or chunk map absent or unreadable. Searches treat this as a miss.
    #[error("index for '{collection}' is missing or corrupt: {reason}")]
    IndexMissingOrCorrupt { collection: String, reason: String },

    /// A job panicked or ended without replying.
    #[error("worker failed during {job}: {reason}")]
    WorkerFailure { job: String, reason: String },

    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Error reported by the ANN backend.
    #[error("ANN backend error: {0}")]
    Ann(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<EmbedError> for IndexError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Configuration { message } => Self::Configuration(message),
            source => Self::EmbeddingApi { source },
        }
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        let reason = if err.is_panic() {
            "blocking task panicked".to_string()
        } else {
            err.to_string()
        };
        Self::WorkerFailure {
            job: "blocking task".to_string(),
            reason,
        }
    }
}

impl IndexError {
    pub fn missing(collection: &str, reason: impl Into<String>) -> Self {
        Self::IndexMissingOrCorrupt {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    pub fn ann(err: impl std::fmt::Display) -> Self {
        Self::Ann(err.to_string())
    }

    pub fn worker(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WorkerFailure {
            job: job.into(),
            reason: reason.into(),
        }
    }
}
