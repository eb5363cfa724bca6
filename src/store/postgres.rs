//! Networked backend: PostgreSQL with the pgvector extension.
//!
//! One row per record holds content, JSONB metadata and the vector, so an
//! insert or delete is atomic without an explicit transaction. Attribution
//! columns are duplicated out of the metadata for filter pushdown.
//! Vectors travel as pgvector text literals (`[0.1,0.2,...]`).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;

use super::{check_dimension, SearchFilter, StorageResult, VectorStore};
use crate::error::{FabricError, StorageError};
use crate::types::{MemoryMetadata, MemoryRecord, MemoryResult, RecordId};

/// Key for `pg_advisory_xact_lock`, serializing concurrent `init()` calls.
const SCHEMA_LOCK_KEY: i64 = 0x6d65_6d66_6162;

/// PostgreSQL + pgvector implementation of [`VectorStore`].
pub struct PgStore {
    pool: PgPool,
    table: String,
    dimension: usize,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl PgStore {
    /// Build a pool that connects on first use. `table` must be a plain identifier.
    pub fn connect_lazy(
        url: &str,
        table: &str,
        dimension: usize,
        max_connections: u32,
    ) -> Result<Self, FabricError> {
        if !is_valid_identifier(table) {
            return Err(FabricError::config(format!(
                "invalid postgres table name: {table:?}"
            )));
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(StorageError::from)?;
        Ok(Self::from_pool(pool, table, dimension))
    }

    /// Wrap an existing pool. The caller vouches for `table`.
    pub fn from_pool(pool: PgPool, table: &str, dimension: usize) -> Self {
        Self {
            pool,
            table: table.to_string(),
            dimension,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_ready(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StorageError::NotInitialized);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn init(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        for statement in schema_statements(&self.table, self.dimension) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        let existing: Option<(i32,)> = sqlx::query_as(
            "SELECT a.atttypmod FROM pg_attribute a \
             WHERE a.attrelid = to_regclass($1) AND a.attname = 'embedding' AND NOT a.attisdropped",
        )
        .bind(&self.table)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((stored,)) = existing {
            if stored > 0 && stored as usize != self.dimension {
                return Err(StorageError::DimensionMismatch {
                    expected: stored as usize,
                    actual: self.dimension,
                });
            }
        }

        tx.commit().await?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(table = %self.table, dimension = self.dimension, "postgres store initialized");
        Ok(())
    }

    async fn insert(
        &self,
        content: &str,
        vector: &[f32],
        metadata: &MemoryMetadata,
    ) -> StorageResult<RecordId> {
        self.ensure_ready()?;
        check_dimension(self.dimension, vector)?;

        let mut metadata = metadata.clone();
        let created_at = metadata
            .created_at
            .get_or_insert_with(|| chrono::Utc::now().to_rfc3339())
            .clone();

        let sql = format!(
            "INSERT INTO {} (content, metadata, embedding, role, entity_id, process_id, session_id, created_at) \
             VALUES ($1, $2, $3::vector, $4, $5, $6, $7, $8::timestamptz) \
             RETURNING id",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(content)
            .bind(Json(&metadata))
            .bind(vector_literal(vector))
            .bind(metadata.role.map(|r| r.as_str()))
            .bind(metadata.entity_id.as_deref())
            .bind(metadata.process_id.as_deref())
            .bind(metadata.session_id.as_deref())
            .bind(created_at)
            .fetch_one(&self.pool)
            .await?;
        let id: i64 = row.try_get("id")?;
        tracing::debug!(id, table = %self.table, "record inserted");
        Ok(id)
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> StorageResult<Vec<MemoryResult>> {
        self.ensure_ready()?;
        check_dimension(self.dimension, vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, content, metadata, embedding::text AS embedding, \
                    (embedding <-> $1::vector) AS distance \
             FROM {} \
             WHERE {} \
             ORDER BY distance, id \
             LIMIT $6",
            self.table,
            filter_clause(2)
        );
        let rows = sqlx::query(&sql)
            .bind(vector_literal(vector))
            .bind(filter.entity_id.as_deref())
            .bind(filter.process_id.as_deref())
            .bind(filter.session_id.as_deref())
            .bind(filter.role.map(|r| r.as_str()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_result).collect()
    }

    async fn delete(&self, id: RecordId) -> StorageResult<()> {
        self.ensure_ready()?;
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        tracing::debug!(id, table = %self.table, "record deleted");
        Ok(())
    }

    async fn count(&self, filter: &SearchFilter) -> StorageResult<u64> {
        self.ensure_ready()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table,
            filter_clause(1)
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(filter.entity_id.as_deref())
            .bind(filter.process_id.as_deref())
            .bind(filter.session_id.as_deref())
            .bind(filter.role.map(|r| r.as_str()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StorageError::Closed);
        }
        self.pool.close().await;
        tracing::info!(table = %self.table, "postgres store closed");
        Ok(())
    }
}

/// Exact-match pushdown on four consecutive parameters starting at `$first`.
fn filter_clause(first: usize) -> String {
    ["entity_id", "process_id", "session_id", "role"]
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let n = first + i;
            format!("(${n}::text IS NULL OR {column} = ${n})")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// DDL for one memory table, in execution order.
fn schema_statements(table: &str, dimension: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                id BIGSERIAL PRIMARY KEY, \
                content TEXT NOT NULL, \
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
                embedding vector({dimension}) NOT NULL, \
                role TEXT, \
                entity_id TEXT, \
                process_id TEXT, \
                session_id TEXT, \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now())"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_entity_idx ON {table} (entity_id)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_process_idx ON {table} (process_id)"),
        format!("CREATE INDEX IF NOT EXISTS {table}_session_idx ON {table} (session_id)"),
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_embedding_idx ON {table} \
             USING hnsw (embedding vector_l2_ops)"
        ),
    ]
}

fn row_to_result(row: &PgRow) -> StorageResult<MemoryResult> {
    let id: i64 = row.try_get("id")?;
    let embedding: String = row.try_get("embedding")?;
    let vector = parse_vector_literal(&embedding).ok_or_else(|| StorageError::Corrupt {
        id,
        reason: "unparseable vector literal".into(),
    })?;
    let Json(metadata): Json<MemoryMetadata> = row.try_get("metadata")?;
    Ok(MemoryResult {
        record: MemoryRecord {
            id,
            content: row.try_get("content")?,
            vector,
            metadata,
        },
        distance: row.try_get("distance")?,
    })
}

/// Format a vector as a pgvector text literal.
pub(crate) fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, x) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&x.to_string());
    }
    out.push(']');
    out
}

/// Parse pgvector's text output.
pub(crate) fn parse_vector_literal(text: &str) -> Option<Vec<f32>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner.split(',').map(|s| s.trim().parse().ok()).collect()
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes (Postgres NAMEDATALEN - 1).
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
