/// Query shapes the indexer and retriever need from a search engine.
///
/// [`crate::db::Db`] implements [`SearchBackend`] over SQLite + sqlite-vec;
/// tests wrap it to inject failures. Implementations are blocking and must
/// be `Send + Sync`.
pub mod models;

use std::time::Duration;

use thiserror::Error;

pub use models::{
    ChunkDocument, ChunkFilter, ChunkHit, ClearSummary, FileIndexRecord, IndexStats, WriteBatch,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search engine unavailable: {0}")]
    Unavailable(String),

    #[error("query rejected: {0}")]
    Rejected(String),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("search engine timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Whether one more attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait SearchBackend: Send + Sync {
    /// Apply one batch atomically: drop chunks of replaced files, insert
    /// documents, upsert file records.
    fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()>;

    /// Remove a file's chunks and its record; returns chunks deleted.
    fn delete_file(&self, repo_id: &str, file_path: &str) -> StoreResult<usize>;

    fn file_record(&self, repo_id: &str, file_path: &str) -> StoreResult<Option<FileIndexRecord>>;

    fn file_records(&self, repo_id: &str) -> StoreResult<Vec<FileIndexRecord>>;

    /// Nearest neighbours by cosine similarity, best first.
    fn vector_search(
        &self,
        vector: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>>;

    /// Weighted term match over name, signature, doc comment and content.
    fn lexical_search(
        &self,
        terms: &[String],
        filter: &ChunkFilter,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>>;

    /// Exact-then-fuzzy lookup of `name` against chunk names and signatures.
    fn symbol_search(
        &self,
        name: &str,
        filter: &ChunkFilter,
        exact: bool,
        limit: usize,
    ) -> StoreResult<Vec<ChunkHit>>;

    /// Chunks whose `calls` contain `name`.
    fn callers(&self, name: &str, repo_id: Option<&str>, limit: usize) -> StoreResult<Vec<ChunkHit>>;

    fn get_chunk(&self, repo_id: &str, chunk_id: &str) -> StoreResult<Option<ChunkHit>>;

    /// Chunks of `parent_name`, ordered by file and line.
    fn members_of(&self, repo_id: &str, parent_name: &str, limit: usize)
    -> StoreResult<Vec<ChunkHit>>;

    /// Chunks of one file overlapping `start..=end`, ordered by start line.
    fn chunks_in_range(
        &self,
        repo_id: &str,
        relative_path: &str,
        start: usize,
        end: usize,
    ) -> StoreResult<Vec<ChunkHit>>;

    /// Every chunk of one file, ordered by start line.
    fn file_chunks(&self, repo_id: &str, file_path: &str) -> StoreResult<Vec<ChunkHit>>;

    fn stats(&self, repo_id: Option<&str>) -> StoreResult<IndexStats>;

    fn clear_repository(&self, repo_id: &str) -> StoreResult<ClearSummary>;
}
