/// End-to-end tests for the indexing and retrieval pipeline.
///
/// Tests the complete flow:
///   Chunker → Indexer → SQLite index → Retriever → formatted context
use codetriage::chunker::Chunker;
use codetriage::config::{ChunkerConfig, ExternalCallConfig, IndexerConfig, RetrievalConfig};
use codetriage::db::Db;
use codetriage::embedder::hashing::HashingEmbedder;
use codetriage::embedder::{Embedder, EmbedderError};
use codetriage::indexer::{FileStatus, Indexer, RepositoryOptions};
use codetriage::retriever::history::{HistoryError, IssueHistory, SimilarIssue, StaticIssueHistory};
use codetriage::retriever::{RetrievalStatus, Retriever, Signal};
use codetriage::store::{
    ChunkFilter, ChunkHit, ClearSummary, FileIndexRecord, IndexStats, SearchBackend, StoreError,
    StoreResult, WriteBatch,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

const DIMS: usize = 64;

const AUTH_PY: &str = r#"import hmac


def validate_token(tok):
    """Check a bearer token against the signing secret."""
    if not tok:
        return False
    parts = tok.split(".")
    if len(parts) != 3:
        return False
    expected = sign(parts[0], parts[1])
    return hmac.compare_digest(expected, parts[2])
"#;

const UTIL_PY: &str = "def log(msg):\n    print(msg)\n";

fn external() -> ExternalCallConfig {
    ExternalCallConfig {
        timeout_ms: 5_000,
        retry_backoff_ms: 1,
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    db: Arc<Db>,
    embedder: Arc<HashingEmbedder>,
    indexer: Indexer,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("auth.py"), AUTH_PY).unwrap();
        fs::write(root.join("util.py"), UTIL_PY).unwrap();

        let db = Arc::new(Db::open_in_memory(DIMS).unwrap());
        let embedder = Arc::new(HashingEmbedder::new(DIMS));
        let indexer = Indexer::new(
            db.clone(),
            embedder.clone(),
            Arc::new(Chunker::new(ChunkerConfig::default()).unwrap()),
            IndexerConfig::default(),
            external(),
        );
        Self {
            _dir: dir,
            root,
            db,
            embedder,
            indexer,
        }
    }

    async fn index(&self) -> codetriage::indexer::IndexSummary {
        self.indexer
            .index_repository(&self.root, "repo", RepositoryOptions::default(), CancellationToken::new())
            .await
            .unwrap()
    }

    fn key(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().replace('\\', "/")
    }

    fn retriever(&self) -> Retriever {
        self.retriever_over(self.db.clone(), self.embedder.clone())
    }

    fn retriever_over(&self, store: Arc<dyn SearchBackend>, embedder: Arc<dyn Embedder>) -> Retriever {
        Retriever::new(store, embedder, RetrievalConfig::default(), external())
    }
}

// ── Failure injection ────────────────────────────────────────────────

/// Delegates to the real index but the vector search is down.
struct VectorSearchDown(Arc<Db>);

impl SearchBackend for VectorSearchDown {
    fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()> {
        self.0.write_batch(batch)
    }

    fn delete_file(&self, repo_id: &str, file_path: &str) -> StoreResult<usize> {
        self.0.delete_file(repo_id, file_path)
    }

    fn file_record(&self, repo_id: &str, file_path: &str) -> StoreResult<Option<FileIndexRecord>> {
        self.0.file_record(repo_id, file_path)
    }

    fn file_records(&self, repo_id: &str) -> StoreResult<Vec<FileIndexRecord>> {
        self.0.file_records(repo_id)
    }

    fn vector_search(&self, _vector: &[f32], _filter: &ChunkFilter, _limit: usize) -> StoreResult<Vec<ChunkHit>> {
        Err(StoreError::Unavailable("vector index offline".into()))
    }

    fn lexical_search(&self, terms: &[String], filter: &ChunkFilter, limit: usize) -> StoreResult<Vec<ChunkHit>> {
        self.0.lexical_search(terms, filter, limit)
    }

    fn symbol_search(&self, name: &str, filter: &ChunkFilter, exact: bool, limit: usize) -> StoreResult<Vec<ChunkHit>> {
        self.0.symbol_search(name, filter, exact, limit)
    }

    fn callers(&self, name: &str, repo_id: Option<&str>, limit: usize) -> StoreResult<Vec<ChunkHit>> {
        self.0.callers(name, repo_id, limit)
    }

    fn get_chunk(&self, repo_id: &str, chunk_id: &str) -> StoreResult<Option<ChunkHit>> {
        self.0.get_chunk(repo_id, chunk_id)
    }

    fn members_of(&self, repo_id: &str, parent_name: &str, limit: usize) -> StoreResult<Vec<ChunkHit>> {
        self.0.members_of(repo_id, parent_name, limit)
    }

    fn chunks_in_range(&self, repo_id: &str, relative_path: &str, start: usize, end: usize) -> StoreResult<Vec<ChunkHit>> {
        self.0.chunks_in_range(repo_id, relative_path, start, end)
    }

    fn file_chunks(&self, repo_id: &str, file_path: &str) -> StoreResult<Vec<ChunkHit>> {
        self.0.file_chunks(repo_id, file_path)
    }

    fn stats(&self, repo_id: Option<&str>) -> StoreResult<IndexStats> {
        self.0.stats(repo_id)
    }

    fn clear_repository(&self, repo_id: &str) -> StoreResult<ClearSummary> {
        self.0.clear_repository(repo_id)
    }
}

struct EmbeddingServiceDown;

impl Embedder for EmbeddingServiceDown {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
        Err(EmbedderError::Unavailable("connection refused".into()))
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Err(EmbedderError::Unavailable("connection refused".into()))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

struct HistoryDown;

impl IssueHistory for HistoryDown {
    fn similar_issues(&self, _query: &str, _repo_id: Option<&str>, _limit: usize) -> Result<Vec<SimilarIssue>, HistoryError> {
        Err(HistoryError::Unavailable("issue tracker offline".into()))
    }
}

// ── Indexing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_index_then_rank_validator_first() {
    let fx = Fixture::new();
    let summary = fx.index().await;
    assert_eq!(summary.files_indexed, 2);
    assert_eq!(summary.errors, 0);

    let auth_chunks = fx.db.list_file_chunks("repo", &fx.key("auth.py")).unwrap();
    assert_eq!(auth_chunks.len(), 1, "auth.py has exactly one function unit");
    assert_eq!(auth_chunks[0].chunk.name, "validate_token");
    assert_eq!((auth_chunks[0].chunk.start_line, auth_chunks[0].chunk.end_line), (4, 12));

    let outcome = fx
        .retriever()
        .find_relevant_code("token validation fails silently", "", "repo", None)
        .await;
    assert_eq!(outcome.status, RetrievalStatus::Ok);
    assert!(outcome.has_code_context);
    assert_eq!(outcome.results[0].chunk.name, "validate_token");
    assert!(outcome.results[0].match_sources.contains(&"semantic_search".to_string()));
}

#[tokio::test]
async fn test_reindex_unchanged_repository_writes_nothing() {
    let fx = Fixture::new();
    fx.index().await;
    let chunks_before = fx.db.list_file_chunks("repo", &fx.key("auth.py")).unwrap();
    let records_before = fx.db.list_file_records("repo").unwrap();
    let stats_before = fx.db.collect_stats(Some("repo")).unwrap();

    let again = fx.index().await;
    assert_eq!(again.files_unchanged, 2);
    assert_eq!(again.files_indexed, 0);
    assert_eq!(again.total_chunks, 0);

    assert_eq!(fx.db.list_file_chunks("repo", &fx.key("auth.py")).unwrap(), chunks_before);
    assert_eq!(fx.db.list_file_records("repo").unwrap(), records_before);
    assert_eq!(fx.db.collect_stats(Some("repo")).unwrap(), stats_before);
}

#[tokio::test]
async fn test_only_edited_file_is_reindexed() {
    let fx = Fixture::new();
    fx.index().await;

    fs::write(fx.root.join("util.py"), "def log(msg, level):\n    print(level, msg)\n").unwrap();
    let summary = fx.index().await;
    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.files_unchanged, 1);

    let util = fx.db.list_file_chunks("repo", &fx.key("util.py")).unwrap();
    assert!(util.iter().all(|h| h.chunk.content.contains("level")));
}

#[tokio::test]
async fn test_invalid_syntax_still_indexed() {
    let fx = Fixture::new();
    let broken = "def broken(:\n    return (\n\nclass Also(\n    pass\n";
    let outcome = fx
        .indexer
        .index_file_under(Some(&fx.root), &fx.root.join("broken.py"), broken, "repo", false)
        .await;
    assert_eq!(outcome.status, FileStatus::Indexed);
    assert!(outcome.chunks_indexed >= 1);
}

#[tokio::test]
async fn test_embedding_outage_keeps_chunks_searchable() {
    let fx = Fixture::new();
    let indexer = Indexer::new(
        fx.db.clone(),
        Arc::new(EmbeddingServiceDown),
        Arc::new(Chunker::new(ChunkerConfig::default()).unwrap()),
        IndexerConfig::default(),
        external(),
    );
    let summary = indexer
        .index_repository(&fx.root, "repo", RepositoryOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.files_indexed, 2);
    assert_eq!(summary.chunks_without_embedding, summary.total_chunks);

    let hits = fx.retriever().search_by_symbol("validate_token", Some("repo"), true).await.unwrap();
    assert_eq!(hits.len(), 1);
}

// ── Retrieval ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_both_signals_outrank_either_alone() {
    let fx = Fixture::new();
    fx.index().await;
    let query = "validate_token fails silently";

    let both = fx.retriever().find_relevant_code(query, "", "repo", None).await;
    assert_eq!(both.status, RetrievalStatus::Ok);
    assert_eq!(both.signals, vec![Signal::Semantic, Signal::Symbol]);
    let top = &both.results[0];
    assert_eq!(top.chunk.name, "validate_token");
    assert_eq!(
        top.match_sources,
        vec!["semantic_search".to_string(), "symbol:validate_token".to_string()]
    );

    let symbol_only = fx
        .retriever_over(Arc::new(VectorSearchDown(fx.db.clone())), fx.embedder.clone())
        .find_relevant_code(query, "", "repo", None)
        .await;
    assert!(top.score >= symbol_only.results[0].score);
}

#[tokio::test]
async fn test_semantic_outage_degrades_to_symbols() {
    let fx = Fixture::new();
    fx.index().await;

    let outcome = fx
        .retriever_over(Arc::new(VectorSearchDown(fx.db.clone())), fx.embedder.clone())
        .find_relevant_code("validate_token returns false for expired tokens", "", "repo", None)
        .await;
    assert_eq!(outcome.status, RetrievalStatus::Degraded);
    assert_eq!(outcome.signals, vec![Signal::Symbol]);
    assert!(outcome.has_code_context);
    assert_eq!(outcome.results[0].chunk.name, "validate_token");
    assert_eq!(outcome.results[0].match_sources, vec!["symbol:validate_token".to_string()]);
    assert!(outcome.message.unwrap().contains("semantic search failed"));
}

#[tokio::test]
async fn test_no_signal_is_failed_not_empty() {
    let fx = Fixture::new();
    fx.index().await;

    let outcome = fx
        .retriever_over(fx.db.clone(), Arc::new(EmbeddingServiceDown))
        .find_relevant_code("token validation fails silently", "", "repo", None)
        .await;
    assert_eq!(outcome.status, RetrievalStatus::Failed);
    assert!(outcome.results.is_empty());
    assert!(!outcome.has_code_context);
    assert!(outcome.message.is_some());

    // An unindexed repository is a successful search with nothing in it.
    let empty = fx
        .retriever()
        .find_relevant_code("token validation fails silently", "", "other", None)
        .await;
    assert_eq!(empty.status, RetrievalStatus::Ok);
    assert!(!empty.has_code_context);
}

#[tokio::test]
async fn test_context_respects_budget() {
    let fx = Fixture::new();
    fx.index().await;
    let retriever = fx.retriever();

    let full = retriever
        .prepare_context("token validation fails silently", "", "repo", Some(100_000))
        .await;
    assert_eq!(full.code_blocks, 2);
    assert!(full.code_context.starts_with("### File: auth.py\n### Function: validate_token\n### Lines: 4-12"));
    assert!(full.code_context.contains("```python\n"));
    assert_eq!(full.total_context_chars, full.code_context.chars().count());

    let first_block = full.code_context.split("\n\n### File:").next().unwrap();
    let budget = first_block.chars().count() + 1;
    let tight = retriever
        .prepare_context("token validation fails silently", "", "repo", Some(budget))
        .await;
    assert_eq!(tight.code_blocks, 1);
    assert_eq!(tight.dropped_blocks, 1);
    assert!(tight.code_context.chars().count() <= budget);

    let none = retriever
        .prepare_context("token validation fails silently", "", "repo", Some(10))
        .await;
    assert_eq!(none.code_blocks, 0);
    assert!(!none.has_code_context);
    assert!(none.code_context.is_empty());
}

#[tokio::test]
async fn test_history_is_reported_separately() {
    let fx = Fixture::new();
    fx.index().await;
    let issues = StaticIssueHistory::new(vec![SimilarIssue {
        issue_id: "BUG-12".into(),
        title: "Token validation silently accepts garbage".into(),
        body: String::new(),
        state: Some("closed".into()),
        labels: vec!["auth".into()],
        assignee: Some("kim".into()),
        repo_id: Some("repo".into()),
        similarity_score: 0.0,
    }]);

    let context = fx
        .retriever()
        .with_history(Arc::new(issues))
        .prepare_context("token validation fails silently", "", "repo", None)
        .await;
    assert!(context.historical_context.starts_with("## Historical Context from Similar Issues"));
    assert!(context.historical_context.contains("**BUG-12**"));
    assert!(!context.code_context.contains("BUG-12"));
    assert_eq!(
        context.total_context_chars,
        context.code_context.chars().count() + context.historical_context.chars().count()
    );

    let without = fx
        .retriever()
        .with_history(Arc::new(HistoryDown))
        .prepare_context("token validation fails silently", "", "repo", None)
        .await;
    assert_eq!(without.status, RetrievalStatus::Ok);
    assert!(without.historical_context.is_empty());
    assert!(without.has_code_context);
}

#[tokio::test]
async fn test_clear_repository() {
    let fx = Fixture::new();
    fx.index().await;
    let retriever = fx.retriever();

    let cleared = retriever.clear_repository("repo").await.unwrap();
    assert_eq!(cleared.files_deleted, 2);
    assert!(cleared.chunks_deleted >= 2);

    let stats = retriever.get_index_stats(Some("repo")).await.unwrap();
    assert_eq!(stats.total_chunks, 0);
    assert!(Path::new(&fx.key("auth.py")).exists());
}
