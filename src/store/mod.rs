//! Vector record store contract and backends.
//!
//! [`VectorStore`] is implemented by [`sqlite::SqliteStore`] (embedded,
//! single file, sqlite-vec) and [`postgres::PgStore`] (networked, pgvector).
//! Both rank by L2 distance and break ties by ascending id.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{FabricError, StorageError};

pub use crate::types::{MemoryMetadata, MemoryRecord, MemoryResult, RecordId, Role};

pub type StorageResult<T> = Result<T, StorageError>;

/// Exact-match constraints applied before ranking. `None` fields impose nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub entity_id: Option<String>,
    pub process_id: Option<String>,
    pub session_id: Option<String>,
    pub role: Option<Role>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_none()
            && self.process_id.is_none()
            && self.session_id.is_none()
            && self.role.is_none()
    }

    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    /// In-process evaluation of the filter.
    #[cfg(test)]
    pub fn matches(&self, metadata: &MemoryMetadata) -> bool {
        fn field_ok(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        }
        field_ok(&self.entity_id, &metadata.entity_id)
            && field_ok(&self.process_id, &metadata.process_id)
            && field_ok(&self.session_id, &metadata.session_id)
            && self.role.is_none_or(|r| metadata.role == Some(r))
    }
}

/// Durable id → (content, vector, metadata) mapping with similarity search.
///
/// `init` must complete before any other call. After `close` every call
/// fails with [`StorageError::Closed`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Vector length every record in this store has.
    fn dimension(&self) -> usize;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create schema and index structures if absent. Idempotent.
    async fn init(&self) -> StorageResult<()>;

    /// Atomically store content, vector and metadata. Returns the new id.
    async fn insert(
        &self,
        content: &str,
        vector: &[f32],
        metadata: &MemoryMetadata,
    ) -> StorageResult<RecordId>;

    /// At most `limit` results, narrowed by `filter`, ascending distance.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> StorageResult<Vec<MemoryResult>>;

    /// Remove a record and its vector entry together.
    async fn delete(&self, id: RecordId) -> StorageResult<()>;

    /// Number of records matching `filter`.
    async fn count(&self, filter: &SearchFilter) -> StorageResult<u64>;

    /// Record which embedding model writes to this store, warning when it
    /// differs from the one recorded earlier. Backends without a place to
    /// keep it accept anything.
    async fn check_embedding_model(&self, _model: &str) -> StorageResult<()> {
        Ok(())
    }

    /// Release underlying resources.
    async fn close(&self) -> StorageResult<()>;
}

/// Reject vectors whose length differs from the store dimension.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> StorageResult<()> {
    if vector.len() != expected {
        return Err(StorageError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Create the configured store. The store still needs `init()`.
pub fn create_store(
    config: &StorageConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorStore>, FabricError> {
    match config.backend {
        StorageBackend::Sqlite => {
            let path = config.resolved_db_path();
            let store = sqlite::SqliteStore::open(&path, dimension)?;
            Ok(Arc::new(store))
        }
        StorageBackend::Postgres => {
            let url = config.postgres_url.as_deref().ok_or_else(|| {
                FabricError::config("storage.postgres_url is required for the postgres backend")
            })?;
            let store =
                postgres::PgStore::connect_lazy(url, &config.table, dimension, config.max_connections)?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SearchFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&MemoryMetadata::default()));
    }

    #[test]
    fn filter_fields_are_and_combined() {
        let filter = SearchFilter {
            entity_id: Some("user-1".into()),
            process_id: Some("chat".into()),
            ..Default::default()
        };
        let mut meta = MemoryMetadata {
            entity_id: Some("user-1".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&meta), "missing process_id must not match");

        meta.process_id = Some("chat".into());
        assert!(filter.matches(&meta));

        meta.entity_id = Some("user-2".into());
        assert!(!filter.matches(&meta));
    }

    #[test]
    fn role_filter() {
        let filter = SearchFilter {
            role: Some(Role::Assistant),
            ..Default::default()
        };
        let meta = MemoryMetadata {
            role: Some(Role::User),
            ..Default::default()
        };
        assert!(!filter.matches(&meta));
    }

    #[test]
    fn dimension_check_rejects_mismatch() {
        assert!(check_dimension(3, &[0.0, 1.0, 2.0]).is_ok());
        let err = check_dimension(3, &[0.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }
}
