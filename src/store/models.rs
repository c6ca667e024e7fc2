use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, ChunkKind};

/// A chunk as persisted: the chunk plus indexing metadata.
#[derive(Debug, Clone)]
pub struct ChunkDocument {
    pub repo_id: String,
    pub chunk: Chunk,
    /// Summary text the embedding was generated from.
    pub searchable_text: String,
    /// `None` when embedding failed; the chunk is still searchable lexically.
    pub embedding: Option<Vec<f32>>,
    pub file_hash: String,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexRecord {
    pub repo_id: String,
    pub file_path: String,
    pub file_hash: String,
    pub chunk_count: usize,
    pub last_indexed: DateTime<Utc>,
}

/// A stored chunk returned by a query, with the query's raw score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub repo_id: String,
    #[serde(flatten)]
    pub chunk: Chunk,
    pub file_hash: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub repo_id: Option<String>,
    pub language: Option<String>,
    pub chunk_type: Option<ChunkKind>,
}

impl ChunkFilter {
    pub fn repo(repo_id: &str) -> Self {
        Self {
            repo_id: Some(repo_id.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_lines: usize,
    pub total_files: usize,
    pub chunks_with_embedding: usize,
    pub by_language: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_repo: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    pub chunks_deleted: usize,
    pub files_deleted: usize,
}

/// Unit of work for [`super::SearchBackend::write_batch`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// `(repo_id, file_path)` pairs whose previous chunks are dropped first.
    pub replaced_files: Vec<(String, String)>,
    pub documents: Vec<ChunkDocument>,
    pub records: Vec<FileIndexRecord>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.replaced_files.is_empty() && self.documents.is_empty() && self.records.is_empty()
    }
}
