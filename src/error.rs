//! Error taxonomy for the memory fabric.
//!
//! [`FabricError`] is what callers of the orchestrator see. Backend failures
//! arrive wrapped as [`StorageError`], collaborator failures as
//! [`EmbeddingError`]. [`GenerationError`] never leaves the optimization
//! pipeline: every generation failure is recovered by falling back to the
//! unoptimized text.

use crate::store::RecordId;

/// Result alias for orchestrator operations.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors surfaced by [`MemoryFabric`](crate::fabric::MemoryFabric).
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Invalid setup, detected once at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("memory fabric is not initialized; call init() first")]
    NotInitialized,

    #[error("memory fabric is closed")]
    Closed,
}

impl FabricError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Failures of a [`VectorStore`](crate::store::VectorStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to prepare database at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("vector dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("memory not found: {0}")]
    NotFound(RecordId),

    #[error("store is not initialized")]
    NotInitialized,

    #[error("store is closed")]
    Closed,

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: RecordId, reason: String },
}

/// Failures of an [`Embedder`](crate::embedding::Embedder).
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("embedder produced {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding task failed: {0}")]
    Task(String),
}

/// Failures of a [`TextGenerator`](crate::generation::TextGenerator).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("generation returned no text")]
    Empty,

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_is_transparent_in_fabric_error() {
        let err: FabricError = StorageError::DimensionMismatch {
            expected: 384,
            actual: 3,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains("3"));
        assert!(matches!(err, FabricError::Storage(_)));
    }

    #[test]
    fn not_found_names_the_id() {
        let err = StorageError::NotFound(42);
        assert_eq!(err.to_string(), "memory not found: 42");
    }

    #[test]
    fn config_helper_builds_configuration_variant() {
        let err = FabricError::config("dimensions must be positive");
        assert!(matches!(err, FabricError::Configuration(_)));
        assert!(err.to_string().starts_with("configuration error"));
    }
}
