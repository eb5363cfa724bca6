//! SQLite plumbing for the embedded backend: extension loading, connection
//! setup, schema, and the f32 ↔ BLOB encoding sqlite-vec expects.

pub mod schema;

use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::error::StorageError;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) a database file with sqlite-vec loaded and pragmas set.
///
/// Schema creation is left to [`schema::init_schema`] so that it happens in
/// the store's `init()`.
pub fn open_connection(path: impl AsRef<Path>) -> Result<Connection, StorageError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    tracing::info!(path = %path.display(), "database opened");
    Ok(conn)
}

/// Open an in-memory database. Used by tests and ephemeral fabrics.
pub fn open_memory_connection() -> Result<Connection, StorageError> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Encode a vector as the little-endian f32 blob sqlite-vec stores.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode a sqlite-vec f32 blob. Returns `None` if the length is not a
/// multiple of four.
pub fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
