//! Keeps the search engine's chunk collection in sync with a working tree.
//!
//! Every file goes through the same pipeline: hash, compare with the stored
//! [`FileIndexRecord`], chunk, embed, write. A file's delete-old and
//! insert-new steps always travel in the same [`WriteBatch`], so they commit
//! together.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, Chunker, content_hash, truncate_with_marker};
use crate::config::{ExternalCallConfig, IndexerConfig};
use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::retry::call_blocking;
use crate::store::{ChunkDocument, FileIndexRecord, SearchBackend, WriteBatch};

const PROGRESS_EVERY: usize = 50;

// ── Outcomes ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Unchanged,
    Indexed,
    NoChunks,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIndexOutcome {
    pub status: FileStatus,
    pub chunks_indexed: usize,
    /// Chunks stored without a vector because embedding failed.
    pub chunks_without_embedding: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileIndexOutcome {
    fn with_status(status: FileStatus) -> Self {
        Self {
            status,
            chunks_indexed: 0,
            chunks_without_embedding: 0,
            errors: 0,
            message: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            errors: 1,
            message: Some(message),
            ..Self::with_status(FileStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub message: String,
}

/// Aggregate counts of one [`Indexer::index_repository`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub repo_id: String,
    pub files_processed: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub total_chunks: usize,
    pub chunks_without_embedding: usize,
    pub errors: usize,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

impl IndexSummary {
    fn fail(&mut self, path: String, message: String) {
        self.errors += 1;
        self.failures.push(FileFailure { path, message });
    }
}

/// Per-run overrides for [`Indexer::index_repository`].
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub extensions: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    /// When false every file is re-chunked regardless of its stored hash.
    pub incremental: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            extensions: None,
            exclude_patterns: None,
            incremental: true,
        }
    }
}

// ── Searchable summary ───────────────────────────────────────────────

/// Name, signature, doc comment and the leading `body_chars` of the body.
pub fn build_searchable_text(chunk: &Chunk, body_chars: usize) -> String {
    let mut parts: Vec<String> = vec![chunk.name.clone()];
    if let Some(sig) = &chunk.signature {
        parts.push(sig.clone());
    }
    if let Some(doc) = &chunk.doc_comment {
        parts.push(doc.clone());
    }
    parts.push(truncate_with_marker(&chunk.content, body_chars));
    parts.join(" ")
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ── Batch writer ─────────────────────────────────────────────────────

/// Result of writing one accumulated batch.
struct FlushReport {
    files: Vec<String>,
    chunks: usize,
    without_embedding: usize,
    error: Option<String>,
}

/// Single writer-side buffer shared by all workers.
struct BatchWriter {
    store: Arc<dyn SearchBackend>,
    external: ExternalCallConfig,
    batch_size: usize,
    pending: Mutex<WriteBatch>,
}

impl BatchWriter {
    /// Buffer one file's changes; returns a report when this push filled the batch.
    async fn push(&self, prepared: PreparedFile) -> Option<FlushReport> {
        let full = {
            let mut pending = self.pending.lock().await;
            prepared.append_to(&mut pending);
            if pending.documents.len() >= self.batch_size {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        match full {
            Some(batch) => Some(self.write(batch).await),
            None => None,
        }
    }

    async fn finish(&self) -> Option<FlushReport> {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if batch.is_empty() {
            None
        } else {
            Some(self.write(batch).await)
        }
    }

    async fn write(&self, batch: WriteBatch) -> FlushReport {
        let files: Vec<String> = batch.records.iter().map(|r| r.file_path.clone()).collect();
        let chunks = batch.documents.len();
        let without_embedding = batch.documents.iter().filter(|d| d.embedding.is_none()).count();
        debug!("flushing {} documents from {} files", chunks, files.len());

        let store = Arc::clone(&self.store);
        let batch = Arc::new(batch);
        let result = call_blocking(&self.external, "batch write", move || store.write_batch(&batch)).await;

        FlushReport {
            files,
            chunks,
            without_embedding,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

// ── Per-file preparation ─────────────────────────────────────────────

/// A changed file, chunked and embedded, ready to be written.
struct PreparedFile {
    repo_id: String,
    file_path: String,
    documents: Vec<ChunkDocument>,
    record: FileIndexRecord,
}

impl PreparedFile {
    fn without_embedding(&self) -> usize {
        self.documents.iter().filter(|d| d.embedding.is_none()).count()
    }

    fn append_to(self, batch: &mut WriteBatch) {
        batch.replaced_files.push((self.repo_id, self.file_path));
        batch.documents.extend(self.documents);
        batch.records.push(self.record);
    }
}

enum Prepared {
    Unchanged,
    Changed(PreparedFile),
}

// ── Indexer ──────────────────────────────────────────────────────────

pub struct Indexer {
    store: Arc<dyn SearchBackend>,
    embedder: Arc<dyn Embedder>,
    chunker: Arc<Chunker>,
    config: IndexerConfig,
    external: ExternalCallConfig,
    embed_permits: Arc<Semaphore>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn SearchBackend>,
        embedder: Arc<dyn Embedder>,
        chunker: Arc<Chunker>,
        config: IndexerConfig,
        external: ExternalCallConfig,
    ) -> Self {
        let embed_permits = Arc::new(Semaphore::new(config.embedding_concurrency.max(1)));
        Self {
            store,
            embedder,
            chunker,
            config,
            external,
            embed_permits,
        }
    }

    /// Index one file, writing its chunks immediately.
    ///
    /// The file's path doubles as its relative path; see
    /// [`Indexer::index_file_under`] to index relative to a repository root.
    pub async fn index_file(
        &self,
        path: &Path,
        content: &str,
        repo_id: &str,
        force: bool,
    ) -> FileIndexOutcome {
        self.index_file_under(None, path, content, repo_id, force).await
    }

    pub async fn index_file_under(
        &self,
        repo_root: Option<&Path>,
        path: &Path,
        content: &str,
        repo_id: &str,
        force: bool,
    ) -> FileIndexOutcome {
        if repo_id.trim().is_empty() {
            return FileIndexOutcome::failed("repo_id must not be empty".to_string());
        }

        let prepared = match self.prepare_file(repo_root, path, content, repo_id, force).await {
            Ok(Prepared::Unchanged) => return FileIndexOutcome::with_status(FileStatus::Unchanged),
            Ok(Prepared::Changed(prepared)) => prepared,
            Err(e) => {
                warn!("Failed to index {}: {e}", path.display());
                return FileIndexOutcome::failed(e.to_string());
            }
        };

        let chunks = prepared.documents.len();
        let without_embedding = prepared.without_embedding();
        let mut batch = WriteBatch::default();
        prepared.append_to(&mut batch);

        let store = Arc::clone(&self.store);
        let batch = Arc::new(batch);
        if let Err(e) = call_blocking(&self.external, "file write", move || store.write_batch(&batch)).await {
            warn!("Failed to write chunks of {}: {e}", path.display());
            return FileIndexOutcome::failed(e.to_string());
        }

        let status = if chunks == 0 {
            FileStatus::NoChunks
        } else {
            FileStatus::Indexed
        };
        debug!("{}: {:?}, {} chunks", path.display(), status, chunks);
        FileIndexOutcome {
            status,
            chunks_indexed: chunks,
            chunks_without_embedding: without_embedding,
            errors: 0,
            message: None,
        }
    }

    /// Index every candidate file under `root`.
    ///
    /// Files are processed by `workers` concurrent tasks and written in
    /// batches of about `batch_size` documents. Records of files that no
    /// longer exist under `root` are removed afterwards unless the run was
    /// cancelled.
    pub async fn index_repository(
        &self,
        root: &Path,
        repo_id: &str,
        options: RepositoryOptions,
        cancel: CancellationToken,
    ) -> Result<IndexSummary> {
        if repo_id.trim().is_empty() {
            return Err(Error::InvalidArgument("repo_id must not be empty".to_string()));
        }
        let root = tokio::fs::canonicalize(root).await?;
        let extensions = normalize_extensions(options.extensions.as_ref().unwrap_or(&self.config.extensions));
        let exclude_patterns = options
            .exclude_patterns
            .clone()
            .unwrap_or_else(|| self.config.exclude_patterns.clone());

        info!("Starting repository indexing: {repo_id}");
        info!("  Path: {}", root.display());
        info!("  Incremental: {}", options.incremental);

        let walk_root = root.clone();
        let max_file_size = self.config.max_file_size;
        let (candidates, skipped) = tokio::task::spawn_blocking(move || {
            collect_candidates(&walk_root, &extensions, &exclude_patterns, max_file_size)
        })
        .await?;

        let mut summary = IndexSummary {
            repo_id: repo_id.to_string(),
            files_skipped: skipped,
            ..IndexSummary::default()
        };
        let total = candidates.len();
        info!("  Found {total} files to process, {skipped} excluded");

        let writer = BatchWriter {
            store: Arc::clone(&self.store),
            external: self.external,
            batch_size: self.config.batch_size.max(1),
            pending: Mutex::new(WriteBatch::default()),
        };
        let force = !options.incremental;
        let seen: HashSet<String> = candidates.iter().map(|p| path_key(p)).collect();

        let mut results = stream::iter(candidates)
            .map(|path| {
                let writer = &writer;
                let root = root.as_path();
                let cancel = &cancel;
                async move {
                    if cancel.is_cancelled() {
                        return WorkerReport::Cancelled;
                    }
                    self.process_candidate(writer, root, path, repo_id, force).await
                }
            })
            .buffer_unordered(self.config.workers.max(1));

        let mut done = 0usize;
        while let Some(report) = results.next().await {
            match report {
                WorkerReport::Cancelled => continue,
                WorkerReport::Unchanged => summary.files_unchanged += 1,
                WorkerReport::Buffered(flush) => {
                    if let Some(flush) = flush {
                        apply_flush(&mut summary, flush);
                    }
                }
                WorkerReport::Failed { path, message } => summary.fail(path, message),
            }
            done += 1;
            if done % PROGRESS_EVERY == 0 {
                info!("  Progress: {done}/{total} files");
            }
        }
        drop(results);

        if let Some(flush) = writer.finish().await {
            apply_flush(&mut summary, flush);
        }
        summary.files_processed = done;
        summary.cancelled = cancel.is_cancelled();

        if summary.cancelled {
            warn!("Indexing of {repo_id} cancelled after {done}/{total} files");
        } else {
            summary.files_removed = self.remove_stale_files(&root, repo_id, &seen).await;
        }

        info!(
            "Indexing complete: {} files, {} chunks, {} unchanged, {} errors",
            summary.files_indexed, summary.total_chunks, summary.files_unchanged, summary.errors
        );
        Ok(summary)
    }

    /// Whether a repository run over `root` would pick up `path`.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !normalize_extensions(&self.config.extensions).contains(&ext) {
            return false;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        if is_excluded(&path_key(relative), &self.config.exclude_patterns) {
            return false;
        }
        // Removed paths have no metadata and still pass.
        !path
            .metadata()
            .is_ok_and(|meta| meta.is_file() && meta.len() > self.config.max_file_size)
    }

    /// Drop a file's chunks and record; returns the number of chunks removed.
    pub async fn remove_file(&self, path: &Path, repo_id: &str) -> Result<usize> {
        let store = Arc::clone(&self.store);
        let (repo, key) = (repo_id.to_string(), path_key(path));
        Ok(call_blocking(&self.external, "file removal", move || store.delete_file(&repo, &key)).await?)
    }

    async fn process_candidate(
        &self,
        writer: &BatchWriter,
        root: &Path,
        path: PathBuf,
        repo_id: &str,
        force: bool,
    ) -> WorkerReport {
        let key = path_key(&path);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Error reading {key}: {e}");
                return WorkerReport::Failed {
                    path: key,
                    message: e.to_string(),
                };
            }
        };
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                warn!("Skipping {key}: not valid UTF-8");
                return WorkerReport::Failed {
                    path: key,
                    message: "not valid UTF-8".to_string(),
                };
            }
        };

        match self.prepare_file(Some(root), &path, &content, repo_id, force).await {
            Ok(Prepared::Unchanged) => WorkerReport::Unchanged,
            Ok(Prepared::Changed(prepared)) => WorkerReport::Buffered(writer.push(prepared).await),
            Err(e) => {
                warn!("Error processing {key}: {e}");
                WorkerReport::Failed {
                    path: key,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Hash check, chunking and embedding for one file. Nothing is written.
    async fn prepare_file(
        &self,
        repo_root: Option<&Path>,
        path: &Path,
        content: &str,
        repo_id: &str,
        force: bool,
    ) -> Result<Prepared> {
        let file_path = path_key(path);
        let file_hash = content_hash(content);

        if !force {
            let store = Arc::clone(&self.store);
            let (repo, key) = (repo_id.to_string(), file_path.clone());
            match call_blocking(&self.external, "hash lookup", move || store.file_record(&repo, &key)).await {
                Ok(Some(record)) if record.file_hash == file_hash => return Ok(Prepared::Unchanged),
                Ok(_) => {}
                Err(e) => warn!("Hash lookup for {file_path} failed ({e}), reindexing"),
            }
        }

        let chunker = Arc::clone(&self.chunker);
        let (owned_path, owned_root, owned_content) = (
            path.to_path_buf(),
            repo_root.map(Path::to_path_buf),
            content.to_string(),
        );
        let chunks = tokio::task::spawn_blocking(move || {
            chunker.chunk(&owned_path, &owned_content, owned_root.as_deref())
        })
        .await?;

        let texts: Vec<String> = chunks
            .iter()
            .map(|c| build_searchable_text(c, self.config.summary_body_chars))
            .collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embed_texts(&file_path, &texts).await
        };

        let indexed_at = Utc::now();
        let documents: Vec<ChunkDocument> = chunks
            .into_iter()
            .zip(texts)
            .zip(vectors)
            .map(|((chunk, searchable_text), embedding)| ChunkDocument {
                repo_id: repo_id.to_string(),
                chunk,
                searchable_text,
                embedding,
                file_hash: file_hash.clone(),
                indexed_at,
            })
            .collect();

        let record = FileIndexRecord {
            repo_id: repo_id.to_string(),
            file_path: file_path.clone(),
            file_hash,
            chunk_count: documents.len(),
            last_indexed: indexed_at,
        };
        Ok(Prepared::Changed(PreparedFile {
            repo_id: repo_id.to_string(),
            file_path,
            documents,
            record,
        }))
    }

    /// One vector per text; `None` where embedding failed.
    ///
    /// Tries the whole file as one batch first, then falls back to one call
    /// per chunk. A transient failure during the fallback ends it, since the
    /// service is presumably down for the rest of the file too.
    async fn embed_texts(&self, label: &str, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let _permit = self.embed_permits.acquire().await.ok();
        let expected = self.embedder.dimensions();
        let inputs: Arc<Vec<String>> = Arc::new(
            texts
                .iter()
                .map(|t| cap_chars(t, self.config.max_embedding_chars))
                .collect(),
        );

        let embedder = Arc::clone(&self.embedder);
        let batch_inputs = Arc::clone(&inputs);
        let batch = call_blocking(&self.external, "embedding batch", move || {
            let refs: Vec<&str> = batch_inputs.iter().map(String::as_str).collect();
            embedder.embed_batch(&refs)
        })
        .await;

        match batch {
            Ok(vectors) if vectors.len() == inputs.len() => {
                return vectors
                    .into_iter()
                    .map(|v| checked_vector(v, expected, label))
                    .collect();
            }
            Ok(vectors) => warn!(
                "{label}: embedding service returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            ),
            Err(e) => warn!("{label}: batch embedding failed ({e}), embedding chunks one by one"),
        }

        let mut out = Vec::with_capacity(inputs.len());
        for idx in 0..inputs.len() {
            let embedder = Arc::clone(&self.embedder);
            let single = Arc::clone(&inputs);
            match call_blocking(&self.external, "embedding", move || embedder.embed(&single[idx])).await {
                Ok(v) => out.push(checked_vector(v, expected, label)),
                Err(e) => {
                    warn!("{label}: chunk {idx} stored without embedding: {e}");
                    out.push(None);
                    if e.is_transient() {
                        out.resize(inputs.len(), None);
                        break;
                    }
                }
            }
        }
        out
    }

    async fn remove_stale_files(&self, root: &Path, repo_id: &str, seen: &HashSet<String>) -> usize {
        let store = Arc::clone(&self.store);
        let repo = repo_id.to_string();
        let records = match call_blocking(&self.external, "record listing", move || store.file_records(&repo)).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Skipping stale file cleanup for {repo_id}: {e}");
                return 0;
            }
        };

        let mut removed = 0;
        for record in records {
            let path = Path::new(&record.file_path);
            if seen.contains(&record.file_path) || !path.starts_with(root) || path.exists() {
                continue;
            }
            let store = Arc::clone(&self.store);
            let (repo, file) = (repo_id.to_string(), record.file_path.clone());
            match call_blocking(&self.external, "stale file removal", move || store.delete_file(&repo, &file)).await {
                Ok(chunks) => {
                    debug!("Removed {} ({chunks} chunks), file no longer exists", record.file_path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale {}: {e}", record.file_path),
            }
        }
        if removed > 0 {
            info!("  Removed {removed} deleted files from the index");
        }
        removed
    }
}

enum WorkerReport {
    Cancelled,
    Unchanged,
    /// The file went into the batch; carries the flush it triggered, if any.
    Buffered(Option<FlushReport>),
    Failed { path: String, message: String },
}

fn apply_flush(summary: &mut IndexSummary, flush: FlushReport) {
    match flush.error {
        None => {
            summary.files_indexed += flush.files.len();
            summary.total_chunks += flush.chunks;
            summary.chunks_without_embedding += flush.without_embedding;
        }
        Some(message) => {
            warn!("Batch write of {} files failed: {message}", flush.files.len());
            for path in flush.files {
                summary.fail(path, message.clone());
            }
        }
    }
}

fn checked_vector(vector: Vec<f32>, expected: usize, label: &str) -> Option<Vec<f32>> {
    if vector.len() == expected {
        Some(vector)
    } else {
        warn!("{label}: got a {}-dimensional vector, expected {expected}", vector.len());
        None
    }
}

/// Stable string key for a path; forward slashes on every platform.
fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn normalize_extensions(extensions: &[String]) -> HashSet<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Exclusion patterns are plain substrings of the root-relative path with a
/// leading `/`, so `/build/` only matches a `build` directory.
fn is_excluded(relative: &str, patterns: &[String]) -> bool {
    let anchored = format!("/{}", relative.trim_start_matches('/'));
    patterns.iter().any(|p| anchored.contains(p.as_str()))
}

/// Walk `root` and return `(candidates, skipped)`.
fn collect_candidates(
    root: &Path,
    extensions: &HashSet<String>,
    exclude_patterns: &[String],
    max_file_size: u64,
) -> (Vec<PathBuf>, usize) {
    let mut candidates = Vec::new();
    let mut skipped = 0;

    let walker = WalkBuilder::new(root).hidden(false).build();
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !extensions.contains(&ext) {
            continue;
        }

        let relative = path_key(path.strip_prefix(root).unwrap_or(path));
        if is_excluded(&relative, exclude_patterns) {
            skipped += 1;
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.len() > max_file_size => {
                debug!("Skipping {relative}: {} bytes", meta.len());
                skipped += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {relative}: {e}");
                skipped += 1;
                continue;
            }
        }
        candidates.push(path.to_path_buf());
    }

    candidates.sort();
    (candidates, skipped)
}
