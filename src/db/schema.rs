//! SQL DDL for the embedded backend.
//!
//! Defines `memories`, the `memories_vec` vec0 index keyed by the same rowid,
//! the `memory_log` audit table and `schema_meta`. All DDL uses
//! `IF NOT EXISTS`, so initialization is idempotent.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StorageError;

/// Schema version this binary writes.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    role TEXT CHECK(role IS NULL OR role IN ('user','assistant','system','tool')),
    entity_id TEXT,
    process_id TEXT,
    session_id TEXT,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_memories_entity ON memories(entity_id);
CREATE INDEX IF NOT EXISTS idx_memories_process ON memories(process_id);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);

CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','delete')),
    memory_id INTEGER NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 takes its width in the DDL, so this one is formatted per store.
fn vec_table_sql(dimension: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_vec USING vec0(embedding FLOAT[{dimension}]);"
    )
}

/// Create all tables and record the schema version and vector dimension.
///
/// Fails with [`StorageError::DimensionMismatch`] if the file was created for
/// a different dimension.
pub fn init_schema(conn: &mut Connection, dimension: usize) -> Result<(), StorageError> {
    // Write lock up front: concurrent initializers wait on the busy timeout
    // rather than fail a read-to-write upgrade.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(SCHEMA_SQL)?;

    if let Some(stored) = stored_dimension(&tx)? {
        if stored != dimension {
            return Err(StorageError::DimensionMismatch {
                expected: stored,
                actual: dimension,
            });
        }
    }

    tx.execute_batch(&vec_table_sql(dimension))?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('dimension', ?1)",
        params![dimension.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

/// Dimension the database was created with, if it has been initialized.
pub fn stored_dimension(conn: &Connection) -> Result<Option<usize>, StorageError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'dimension'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Get the stored embedding model identifier, if any.
pub fn get_embedding_model(conn: &Connection) -> Result<Option<String>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

/// Set the stored embedding model identifier.
pub fn set_embedding_model(conn: &Connection, model: &str) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}
