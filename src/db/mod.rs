//! Search engine backed by SQLite and sqlite-vec.
use std::path::Path;
use std::sync::{Mutex, MutexGuard, Once};

use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::info;

use crate::chunker::Chunk;
use crate::store::{
    ChunkFilter, ChunkHit, ClearSummary, FileIndexRecord, IndexStats,
    SearchBackend, StoreError, StoreResult, WriteBatch,
};

pub mod documents;
pub mod files;
pub mod relations;
pub mod search;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS code_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id TEXT NOT NULL,
    repo_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    name TEXT NOT NULL,
    parent_name TEXT,
    language TEXT NOT NULL,
    signature TEXT,
    content TEXT NOT NULL,
    doc_comment TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    imports TEXT NOT NULL DEFAULT '[]',
    calls TEXT NOT NULL DEFAULT '[]',
    bases TEXT NOT NULL DEFAULT '[]',
    indexed_at DATETIME NOT NULL,
    file_hash TEXT NOT NULL,
    searchable_text TEXT NOT NULL,
    has_embedding INTEGER NOT NULL DEFAULT 0,
    UNIQUE(repo_id, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON code_chunks(repo_id, file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_relative ON code_chunks(repo_id, relative_path);
CREATE INDEX IF NOT EXISTS idx_chunks_name ON code_chunks(name);
CREATE INDEX IF NOT EXISTS idx_chunks_language ON code_chunks(language);
CREATE INDEX IF NOT EXISTS idx_chunks_type ON code_chunks(chunk_type);
CREATE INDEX IF NOT EXISTS idx_chunks_parent ON code_chunks(repo_id, parent_name);

CREATE TABLE IF NOT EXISTS file_hashes (
    repo_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    chunk_count INTEGER NOT NULL,
    last_indexed DATETIME NOT NULL,
    PRIMARY KEY (repo_id, file_path)
);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Column list shared by every chunk query; see [`map_chunk_row`].
pub(crate) const CHUNK_COLUMNS: &str = "c.chunk_id, c.repo_id, c.file_path, c.relative_path, \
     c.chunk_type, c.name, c.parent_name, c.language, c.signature, c.content, c.doc_comment, \
     c.start_line, c.end_line, c.imports, c.calls, c.bases, c.file_hash";

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn json_list(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Map a row selected with [`CHUNK_COLUMNS`] followed by a score column.
pub(crate) fn map_chunk_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkHit> {
    let kind: String = row.get(4)?;
    let chunk = Chunk {
        chunk_id: row.get(0)?,
        file_path: row.get(2)?,
        relative_path: row.get(3)?,
        kind: kind.parse().map_err(|e: String| conversion_error(4, e))?,
        name: row.get(5)?,
        parent_name: row.get(6)?,
        language: row.get(7)?,
        signature: row.get(8)?,
        content: row.get(9)?,
        doc_comment: row.get(10)?,
        start_line: row.get::<_, i64>(11)? as usize,
        end_line: row.get::<_, i64>(12)? as usize,
        imports: json_list(row, 13)?,
        calls: json_list(row, 14)?,
        bases: json_list(row, 15)?,
    };
    Ok(ChunkHit {
        repo_id: row.get(1)?,
        chunk,
        file_hash: row.get(16)?,
        score: row.get(17)?,
    })
}

/// A SQLite connection initialized with sqlite-vec and the chunk schema.
///
/// The connection sits behind a mutex so one `Db` can be shared across
/// indexing workers and retrieval calls.
pub struct Db {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl Db {
    /// Open a database at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        // Register sqlite-vec extension globally
        init_sqlite_vec();

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        let db = Self::init(conn, dimensions)?;

        info!("Database initialized successfully");
        Ok(db)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> StoreResult<Self> {
        init_sqlite_vec();
        Self::init(Connection::open_in_memory()?, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> StoreResult<Self> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored.and_then(|v| v.parse::<usize>().ok()) {
            Some(existing) if existing != dimensions => {
                return Err(StoreError::DimensionMismatch {
                    expected: existing,
                    actual: dimensions,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('dimensions', ?)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub(crate) fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl SearchBackend for Db {
    fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()> {
        self.apply_batch(batch)
    }

    fn delete_file(&self, repo_id: &str, file_path: &str) -> StoreResult<usize> {
        self.remove_file(repo_id, file_path)
    }

    fn file_record(&self, repo_id: &str, file_path: &str) -> StoreResult<Option<FileIndexRecord>> {
        self.get_file_record(repo_id, file_path)
    }

    fn file_records(&self, repo_id: &str) -> StoreResult<Vec<FileIndexRecord>> {
        self.list_file_records(repo_id)
    }

    fn vector_search(
        &self,
        vector: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        self.search_vectors(vector, filter, limit)
    }

    fn lexical_search(
        &self,
        terms: &[String],
        filter: &ChunkFilter,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        self.search_terms(terms, filter, limit)
    }

    fn symbol_search(
        &self,
        name: &str,
        filter: &ChunkFilter,
        exact: bool,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        self.search_symbol(name, filter, exact, limit)
    }

    fn callers(&self, name: &str, repo_id: Option<&str>, limit: usize) -> StoreResult<Vec<ChunkHit>> {
        self.find_callers(name, repo_id, limit)
    }

    fn get_chunk(&self, repo_id: &str, chunk_id: &str) -> StoreResult<Option<ChunkHit>> {
        self.chunk_by_id(repo_id, chunk_id)
    }

    fn members_of(
        &self,
        repo_id: &str,
        parent_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        self.find_members(repo_id, parent_name, limit)
    }

    fn chunks_in_range(
        &self,
        repo_id: &str,
        relative_path: &str,
        start: usize,
        end: usize,
    ) -> StoreResult<Vec<ChunkHit>> {
        self.find_in_range(repo_id, relative_path, start, end)
    }

    fn file_chunks(&self, repo_id: &str, file_path: &str) -> StoreResult<Vec<ChunkHit>> {
        self.list_file_chunks(repo_id, file_path)
    }

    fn stats(&self, repo_id: Option<&str>) -> StoreResult<IndexStats> {
        self.collect_stats(repo_id)
    }

    fn clear_repository(&self, repo_id: &str) -> StoreResult<ClearSummary> {
        self.clear_repo(repo_id)
    }
}

/// Builds a document for tests in this module tree.
#[cfg(test)]
pub(crate) fn test_document(
    repo_id: &str,
    file_path: &str,
    name: &str,
    kind: crate::chunker::ChunkKind,
    start_line: usize,
    embedding: Option<Vec<f32>>,
) -> crate::store::ChunkDocument {
    let chunk = Chunk {
        chunk_id: crate::chunker::chunk_id(file_path, name, start_line),
        file_path: file_path.to_string(),
        relative_path: file_path.trim_start_matches("/repo/").to_string(),
        kind,
        name: name.to_string(),
        parent_name: None,
        language: "python".to_string(),
        signature: Some(format!("def {name}()")),
        content: format!("def {name}():\n    pass\n"),
        doc_comment: None,
        start_line,
        end_line: start_line + 5,
        imports: Vec::new(),
        calls: Vec::new(),
        bases: Vec::new(),
    };
    crate::store::ChunkDocument {
        repo_id: repo_id.to_string(),
        searchable_text: name.to_string(),
        chunk,
        embedding,
        file_hash: "h1".to_string(),
        indexed_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory(384).expect("Failed to open in-memory DB");
        let conn = db.conn().unwrap();

        let tables: usize = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('code_chunks', 'file_hashes', 'vec_chunks', 'index_meta');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_dimension_mismatch_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let db = Db::open(&path, 8).unwrap();
            assert_eq!(db.dimensions(), 8);
        }
        assert!(Db::open(&path, 8).is_ok());
        assert!(matches!(
            Db::open(&path, 16),
            Err(StoreError::DimensionMismatch {
                expected: 8,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("get_user%"), "get\\_user\\%");
        assert_eq!(like_escape("plain"), "plain");
    }
}
