//! Embedded backend: one SQLite file with a sqlite-vec `vec0` index.
//!
//! The `memories` row and its `memories_vec` entry share a rowid and are
//! written and deleted inside one transaction, so a reader never sees one
//! without the other. All database work runs on the blocking pool behind a
//! single connection mutex, which also serializes writers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::{check_dimension, SearchFilter, StorageResult, VectorStore};
use crate::db::{self, blob_to_vector, vector_to_blob};
use crate::error::StorageError;
use crate::types::{MemoryMetadata, MemoryRecord, MemoryResult, RecordId};

/// SQLite + sqlite-vec implementation of [`VectorStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
    dimension: usize,
    initialized: AtomicBool,
    location: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database file. Schema is created by `init()`.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = db::open_connection(path)?;
        Ok(Self::from_connection(conn, dimension, Some(path.to_path_buf())))
    }

    /// A store that lives only as long as this value.
    pub fn in_memory(dimension: usize) -> StorageResult<Self> {
        let conn = db::open_memory_connection()?;
        Ok(Self::from_connection(conn, dimension, None))
    }

    fn from_connection(conn: Connection, dimension: usize, location: Option<PathBuf>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            dimension,
            initialized: AtomicBool::new(false),
            location,
        }
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, require_init: bool, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if require_init && !self.initialized.load(Ordering::Acquire) {
            return Err(StorageError::NotInitialized);
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::Task(format!("db lock poisoned: {e}")))?;
            let conn = guard.as_mut().ok_or(StorageError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| StorageError::Task(format!("db task failed: {e}")))?
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn init(&self) -> StorageResult<()> {
        let dimension = self.dimension;
        self.with_conn(false, move |conn| db::schema::init_schema(conn, dimension))
            .await?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            path = ?self.location,
            dimension,
            "sqlite store initialized"
        );
        Ok(())
    }

    async fn insert(
        &self,
        content: &str,
        vector: &[f32],
        metadata: &MemoryMetadata,
    ) -> StorageResult<RecordId> {
        check_dimension(self.dimension, vector)?;

        let mut metadata = metadata.clone();
        if metadata.created_at.is_none() {
            metadata.created_at = Some(chrono::Utc::now().to_rfc3339());
        }
        let metadata_json = serde_json::to_string(&metadata)?;
        let content = content.to_owned();
        let blob = vector_to_blob(vector);

        let id = self
            .with_conn(true, move |conn| {
                insert_record(conn, &content, &blob, &metadata, &metadata_json)
            })
            .await?;
        tracing::debug!(id, "record inserted");
        Ok(id)
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> StorageResult<Vec<MemoryResult>> {
        check_dimension(self.dimension, vector)?;
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StorageError::NotInitialized);
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let blob = vector_to_blob(vector);
        let filter = filter.clone();
        self.with_conn(true, move |conn| {
            let knn = if filter.is_empty() {
                knn_search(conn, &blob, limit)?
            } else {
                None
            };
            let rows = match knn {
                Some(rows) => rows,
                None => exact_search(conn, &blob, limit, &filter)?,
            };
            rows.into_iter().map(RawRow::into_result).collect()
        })
        .await
    }

    async fn delete(&self, id: RecordId) -> StorageResult<()> {
        self.with_conn(true, move |conn| delete_record(conn, id))
            .await?;
        tracing::debug!(id, "record deleted");
        Ok(())
    }

    async fn count(&self, filter: &SearchFilter) -> StorageResult<u64> {
        let filter = filter.clone();
        self.with_conn(true, move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories m \
                 WHERE (?1 IS NULL OR m.entity_id = ?1) \
                   AND (?2 IS NULL OR m.process_id = ?2) \
                   AND (?3 IS NULL OR m.session_id = ?3) \
                   AND (?4 IS NULL OR m.role = ?4)",
                params![
                    filter.entity_id,
                    filter.process_id,
                    filter.session_id,
                    filter.role.map(|r| r.as_str()),
                ],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn check_embedding_model(&self, model: &str) -> StorageResult<()> {
        let model = model.to_owned();
        self.with_conn(true, move |conn| {
            match db::schema::get_embedding_model(conn)? {
                Some(stored) if stored != model => {
                    tracing::warn!(
                        stored = %stored,
                        configured = %model,
                        "embedding model changed since this database was written; \
                         distances against older records are not meaningful"
                    );
                }
                Some(_) => {}
                None => db::schema::set_embedding_model(conn, &model)?,
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> StorageResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::Task(format!("db lock poisoned: {e}")))?;
            let conn = guard.take().ok_or(StorageError::Closed)?;
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
        })
        .await
        .map_err(|e| StorageError::Task(format!("db task failed: {e}")))??;
        tracing::info!(path = ?self.location, "sqlite store closed");
        Ok(())
    }
}

/// Row + vector + audit entry in one transaction.
fn insert_record(
    conn: &mut Connection,
    content: &str,
    blob: &[u8],
    metadata: &MemoryMetadata,
    metadata_json: &str,
) -> StorageResult<RecordId> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO memories (content, role, entity_id, process_id, session_id, created_at, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            content,
            metadata.role.map(|r| r.as_str()),
            metadata.entity_id,
            metadata.process_id,
            metadata.session_id,
            metadata.created_at,
            metadata_json,
        ],
    )?;
    let id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO memories_vec (rowid, embedding) VALUES (?1, ?2)",
        params![id, blob],
    )?;

    write_audit_log(&tx, "create", id, None)?;
    tx.commit()?;
    Ok(id)
}

fn delete_record(conn: &mut Connection, id: RecordId) -> StorageResult<()> {
    let tx = conn.transaction()?;

    let exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM memories WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StorageError::NotFound(id));
    }

    tx.execute("DELETE FROM memories_vec WHERE rowid = ?1", params![id])?;
    tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    write_audit_log(&tx, "delete", id, None)?;

    tx.commit()?;
    Ok(())
}

/// Write an entry to the memory_log audit table.
fn write_audit_log(
    conn: &Connection,
    operation: &str,
    memory_id: RecordId,
    details: Option<&serde_json::Value>,
) -> StorageResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details_json, now],
    )?;
    Ok(())
}

struct RawRow {
    id: RecordId,
    content: String,
    metadata: String,
    embedding: Vec<u8>,
    distance: f64,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            metadata: row.get(2)?,
            embedding: row.get(3)?,
            distance: row.get(4)?,
        })
    }

    fn into_result(self) -> StorageResult<MemoryResult> {
        let vector = blob_to_vector(&self.embedding).ok_or_else(|| StorageError::Corrupt {
            id: self.id,
            reason: format!("embedding blob of {} bytes", self.embedding.len()),
        })?;
        Ok(MemoryResult {
            record: MemoryRecord {
                id: self.id,
                content: self.content,
                vector,
                metadata: serde_json::from_str(&self.metadata)?,
            },
            distance: self.distance,
        })
    }
}

/// Largest `k` a vec0 KNN query accepts.
const MAX_KNN_K: usize = 4096;

/// Unfiltered fast path: let vec0 pick the nearest neighbours.
///
/// Fetches one row past `limit` to see whether the cut falls inside a run of
/// equal distances. vec0 picks arbitrarily among tied rows, so in that case
/// (and for limits past `MAX_KNN_K`) this returns `None` and the caller
/// falls back to the exact scan.
fn knn_search(
    conn: &Connection,
    blob: &[u8],
    limit: usize,
) -> StorageResult<Option<Vec<RawRow>>> {
    if limit >= MAX_KNN_K {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "WITH knn AS ( \
             SELECT rowid, distance, embedding FROM memories_vec \
             WHERE embedding MATCH ?1 \
             ORDER BY distance \
             LIMIT ?2 \
         ) \
         SELECT m.id, m.content, m.metadata, knn.embedding, knn.distance \
         FROM knn JOIN memories m ON m.id = knn.rowid \
         ORDER BY knn.distance, m.id",
    )?;
    let mut rows = stmt
        .query_map(params![blob, (limit + 1) as i64], RawRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    if rows.len() > limit {
        if rows[limit].distance <= rows[limit - 1].distance {
            return Ok(None);
        }
        rows.truncate(limit);
    }
    Ok(Some(rows))
}

/// Exact path: narrow by the filter first, then rank every candidate.
fn exact_search(
    conn: &Connection,
    blob: &[u8],
    limit: usize,
    filter: &SearchFilter,
) -> StorageResult<Vec<RawRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.content, m.metadata, v.embedding, vec_distance_l2(v.embedding, ?1) AS distance \
         FROM memories m JOIN memories_vec v ON v.rowid = m.id \
         WHERE (?2 IS NULL OR m.entity_id = ?2) \
           AND (?3 IS NULL OR m.process_id = ?3) \
           AND (?4 IS NULL OR m.session_id = ?4) \
           AND (?5 IS NULL OR m.role = ?5) \
         ORDER BY distance, m.id \
         LIMIT ?6",
    )?;
    let rows = stmt
        .query_map(
            params![
                blob,
                filter.entity_id,
                filter.process_id,
                filter.session_id,
                filter.role.map(|r| r.as_str()),
                i64::try_from(limit).unwrap_or(i64::MAX),
            ],
            RawRow::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    const DIM: usize = 8;

    fn spike(pos: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[pos % DIM] = 1.0;
        v
    }

    async fn ready_store() -> SqliteStore {
        let store = SqliteStore::in_memory(DIM).unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_before_init_fails() {
        let store = SqliteStore::in_memory(DIM).unwrap();
        let err = store
            .insert("x", &spike(0), &MemoryMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }

    #[tokio::test]
    async fn insert_writes_row_vector_and_audit_log() {
        let store = ready_store().await;
        let id = store
            .insert("Rust is a systems language", &spike(1), &MemoryMetadata::default())
            .await
            .unwrap();

        let conn = Arc::clone(&store.conn);
        let guard = conn.lock().unwrap();
        let conn = guard.as_ref().unwrap();

        let content: String = conn
            .query_row("SELECT content FROM memories WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(content, "Rust is a systems language");

        let vec_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_vec WHERE rowid = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(vec_count, 1);

        let op: String = conn
            .query_row(
                "SELECT operation FROM memory_log WHERE memory_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(op, "create");
    }

    #[tokio::test]
    async fn insert_stamps_created_at() {
        let store = ready_store().await;
        store
            .insert("x", &spike(2), &MemoryMetadata::default())
            .await
            .unwrap();
        let results = store
            .search(&spike(2), 1, &SearchFilter::default())
            .await
            .unwrap();
        assert!(results[0].metadata.created_at.is_some());
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = ready_store().await;
        let a = store
            .insert("a", &spike(0), &MemoryMetadata::default())
            .await
            .unwrap();
        store.delete(a).await.unwrap();
        let b = store
            .insert("b", &spike(0), &MemoryMetadata::default())
            .await
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn role_filter_is_pushed_down() {
        let store = ready_store().await;
        let user = MemoryMetadata {
            role: Some(Role::User),
            ..Default::default()
        };
        let assistant = MemoryMetadata {
            role: Some(Role::Assistant),
            ..Default::default()
        };
        store.insert("question", &spike(3), &user).await.unwrap();
        let answer = store.insert("answer", &spike(3), &assistant).await.unwrap();

        let filter = SearchFilter {
            role: Some(Role::Assistant),
            ..Default::default()
        };
        let results = store.search(&spike(3), 10, &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, answer);
        assert_eq!(store.count(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_limit_returns_nothing() {
        let store = ready_store().await;
        store
            .insert("a", &spike(0), &MemoryMetadata::default())
            .await
            .unwrap();
        let results = store
            .search(&spike(0), 0, &SearchFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn double_close_reports_closed() {
        let store = ready_store().await;
        store.close().await.unwrap();
        assert!(matches!(store.close().await, Err(StorageError::Closed)));
    }

    #[tokio::test]
    async fn embedding_model_is_recorded_once() {
        let store = ready_store().await;
        store.check_embedding_model("model-a").await.unwrap();
        // Mismatch only warns.
        store.check_embedding_model("model-b").await.unwrap();

        let guard = store.conn.lock().unwrap();
        let stored = db::schema::get_embedding_model(guard.as_ref().unwrap()).unwrap();
        assert_eq!(stored.as_deref(), Some("model-a"));
    }
}
