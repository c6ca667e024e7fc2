//! Answers "which code is relevant to this bug report".
//!
//! [`Retriever::find_relevant_code`] runs a semantic search and one symbol
//! lookup per identifier found in the query, concurrently, then fuses the
//! hits by chunk: scores add up and every contributing signal is recorded as
//! a match source. Each signal can fail on its own; the outcome says which
//! ones contributed instead of hiding the failure.
pub mod context;
pub mod history;
pub mod symbols;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chunker::{Chunk, ChunkKind};
use crate::config::{ExternalCallConfig, RetrievalConfig};
use crate::embedder::Embedder;
use crate::embedder::hashing::words;
use crate::error::{Error, Result};
use crate::retry::call_blocking;
use crate::store::{ChunkFilter, ChunkHit, ClearSummary, IndexStats, SearchBackend, StoreResult};
use context::{format_block, pack_blocks};
use history::{HistoricalContext, IssueHistory, format_history, summarize};
use symbols::extract_symbols;

pub const SEMANTIC_SOURCE: &str = "semantic_search";
pub const LEXICAL_SOURCE: &str = "lexical_search";

const CALLER_LIMIT: usize = 100;
const CALLEE_LOOKUPS: usize = 10;
const HITS_PER_CALLEE: usize = 2;
const SAME_CLASS_LIMIT: usize = 20;
const DEFAULT_CONTEXT_LINES: usize = 10;

// ── Result types ─────────────────────────────────────────────────────

/// One ranked chunk with the signals that found it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub repo_id: String,
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f64,
    pub match_sources: Vec<String>,
    /// Short human-readable reason the chunk matched.
    pub relevance: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    /// Every attempted signal succeeded.
    Ok,
    /// At least one signal failed, at least one contributed.
    Degraded,
    /// No signal could contribute.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Semantic,
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalOutcome {
    pub status: RetrievalStatus,
    pub results: Vec<RetrievalResult>,
    pub symbols: Vec<String>,
    /// Signals that ran successfully.
    pub signals: Vec<Signal>,
    pub has_code_context: bool,
    /// Past issues, kept apart from the ranked code.
    pub history: Option<HistoricalContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RetrievalOutcome {
    fn failed(message: String) -> Self {
        Self {
            status: RetrievalStatus::Failed,
            results: Vec::new(),
            symbols: Vec::new(),
            signals: Vec::new(),
            has_code_context: false,
            history: None,
            message: Some(message),
        }
    }
}

/// Formatted code (and history) ready to be placed into a prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedContext {
    pub status: RetrievalStatus,
    pub signals: Vec<Signal>,
    pub has_code_context: bool,
    pub code_context: String,
    pub code_blocks: usize,
    pub dropped_blocks: usize,
    pub historical_context: String,
    pub total_context_chars: usize,
    pub symbols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedCode {
    pub chunk: RetrievalResult,
    pub callers: Vec<RetrievalResult>,
    pub callees: Vec<RetrievalResult>,
    pub same_class: Vec<RetrievalResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeContext {
    pub relative_path: String,
    pub target_lines: String,
    pub chunks: Vec<Chunk>,
}

/// Filters for [`Retriever::search_code`].
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub repo_id: Option<String>,
    pub language: Option<String>,
    pub chunk_type: Option<ChunkKind>,
    /// Vector search when true, weighted term search otherwise.
    pub semantic: bool,
    pub limit: Option<usize>,
}

// ── Relevance and fusion ─────────────────────────────────────────────

/// Which query words appear in the name or doc comment, plus the unit kind.
pub fn explain_relevance(query: &str, chunk: &Chunk) -> String {
    let query_words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    let mut reasons = Vec::new();

    let name = chunk.name.to_lowercase();
    let in_name: Vec<&str> = query_words
        .iter()
        .filter(|w| name.contains(w.as_str()))
        .map(String::as_str)
        .collect();
    if !in_name.is_empty() {
        reasons.push(format!("Name contains: {}", in_name.join(", ")));
    }

    if let Some(doc) = &chunk.doc_comment {
        let doc = doc.to_lowercase();
        let in_doc: Vec<&str> = query_words
            .iter()
            .filter(|w| doc.contains(w.as_str()))
            .take(3)
            .map(String::as_str)
            .collect();
        if !in_doc.is_empty() {
            reasons.push(format!("Documentation mentions: {}", in_doc.join(", ")));
        }
    }

    match (chunk.kind, &chunk.parent_name) {
        (ChunkKind::Class, _) => reasons.push("This is a class definition".to_string()),
        (ChunkKind::Function, _) => reasons.push("This is a function".to_string()),
        (ChunkKind::Method, Some(parent)) => reasons.push(format!("Method of class {parent}")),
        (ChunkKind::Method, None) => reasons.push("This is a method".to_string()),
        _ => {}
    }

    if reasons.is_empty() {
        "Semantic similarity match".to_string()
    } else {
        reasons.join("; ")
    }
}

fn into_result(hit: ChunkHit, score: f64, source: String, query: &str) -> RetrievalResult {
    let relevance = explain_relevance(query, &hit.chunk);
    RetrievalResult {
        repo_id: hit.repo_id,
        chunk: hit.chunk,
        score,
        match_sources: vec![source],
        relevance,
    }
}

/// Sum per-signal scores by chunk and keep every match source.
///
/// Symbol hits are multiplied by `symbol_boost`. Ties are broken by path and
/// line so rankings are stable.
pub fn fuse(
    query: &str,
    semantic: Vec<ChunkHit>,
    symbol_hits: Vec<(String, Vec<ChunkHit>)>,
    symbol_boost: f64,
    limit: usize,
) -> Vec<RetrievalResult> {
    let mut fused: HashMap<(String, String), RetrievalResult> = HashMap::new();

    let mut add = |hit: ChunkHit, score: f64, source: String| {
        let key = (hit.repo_id.clone(), hit.chunk.chunk_id.clone());
        match fused.get_mut(&key) {
            Some(existing) => {
                existing.score += score;
                if !existing.match_sources.contains(&source) {
                    existing.match_sources.push(source);
                }
            }
            None => {
                fused.insert(key, into_result(hit, score, source, query));
            }
        }
    };

    for hit in semantic {
        let score = hit.score;
        add(hit, score, SEMANTIC_SOURCE.to_string());
    }
    for (symbol, hits) in symbol_hits {
        for hit in hits {
            let score = hit.score * symbol_boost;
            add(hit, score, format!("symbol:{symbol}"));
        }
    }

    let mut results: Vec<RetrievalResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.relative_path.cmp(&b.chunk.relative_path))
            .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
    });
    results.truncate(limit);
    results
}

fn status_for(contributed: usize, failed: usize) -> RetrievalStatus {
    match (contributed, failed) {
        (0, _) => RetrievalStatus::Failed,
        (_, 0) => RetrievalStatus::Ok,
        _ => RetrievalStatus::Degraded,
    }
}

// ── Retriever ────────────────────────────────────────────────────────

pub struct Retriever {
    store: Arc<dyn SearchBackend>,
    embedder: Arc<dyn Embedder>,
    history: Option<Arc<dyn IssueHistory>>,
    config: RetrievalConfig,
    external: ExternalCallConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn SearchBackend>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
        external: ExternalCallConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            history: None,
            config,
            external,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn IssueHistory>) -> Self {
        self.history = Some(history);
        self
    }

    async fn store_call<T, F>(&self, label: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&dyn SearchBackend) -> StoreResult<T> + Send + Sync + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(call_blocking(&self.external, label, move || f(store.as_ref())).await?)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        Ok(call_blocking(&self.external, "query embedding", move || embedder.embed(&text)).await?)
    }

    async fn semantic_hits(&self, query: &str, filter: &ChunkFilter, limit: usize) -> Result<Vec<ChunkHit>> {
        let vector = self.embed_query(query).await?;
        let filter = filter.clone();
        self.store_call("vector search", move |store| store.vector_search(&vector, &filter, limit))
            .await
    }

    async fn symbol_lookup(
        &self,
        symbol: String,
        filter: &ChunkFilter,
        exact: bool,
        limit: usize,
    ) -> (String, Result<Vec<ChunkHit>>) {
        let filter = filter.clone();
        let name = symbol.clone();
        let hits = self
            .store_call("symbol search", move |store| store.symbol_search(&name, &filter, exact, limit))
            .await;
        (symbol, hits)
    }

    async fn similar_history(&self, query: &str, repo_id: &str) -> Option<HistoricalContext> {
        let history = Arc::clone(self.history.as_ref()?);
        let (query, repo, limit) = (query.to_string(), repo_id.to_string(), self.config.history_limit);
        match call_blocking(&self.external, "issue history", move || {
            history.similar_issues(&query, Some(repo.as_str()), limit)
        })
        .await
        {
            Ok(issues) => summarize(issues),
            Err(e) => {
                warn!("Issue history unavailable: {e}");
                None
            }
        }
    }

    /// Fused ranking of the code most likely related to a bug report.
    pub async fn find_relevant_code(
        &self,
        title: &str,
        body: &str,
        repo_id: &str,
        limit: Option<usize>,
    ) -> RetrievalOutcome {
        let query = format!("{title} {body}").trim().to_string();
        if query.is_empty() {
            return RetrievalOutcome::failed("query is empty".to_string());
        }
        let limit = limit.filter(|l| *l > 0).unwrap_or(self.config.default_limit);
        let symbols = extract_symbols(&query, self.config.max_symbols);
        let filter = ChunkFilter::repo(repo_id);
        debug!("find_relevant_code: {} symbols {:?}", repo_id, symbols);

        let per_symbol = self.config.symbol_hits_per_symbol;
        let symbol_lookups = join_all(
            symbols
                .iter()
                .map(|s| self.symbol_lookup(s.clone(), &filter, false, per_symbol)),
        );
        let (semantic, symbol_results, history) = tokio::join!(
            self.semantic_hits(&query, &filter, limit),
            symbol_lookups,
            self.similar_history(&query, repo_id),
        );

        let mut signals = Vec::new();
        let mut failures = Vec::new();

        let semantic = match semantic {
            Ok(hits) => {
                signals.push(Signal::Semantic);
                hits
            }
            Err(e) => {
                warn!("Semantic search failed, continuing with symbols only: {e}");
                failures.push(format!("semantic search failed: {e}"));
                Vec::new()
            }
        };

        let mut symbol_hits = Vec::new();
        let mut symbol_errors = 0;
        for (symbol, result) in symbol_results {
            match result {
                Ok(hits) => symbol_hits.push((symbol, hits)),
                Err(e) => {
                    warn!("Symbol search for {symbol} failed: {e}");
                    failures.push(format!("symbol search for {symbol} failed: {e}"));
                    symbol_errors += 1;
                }
            }
        }
        if !symbols.is_empty() && symbol_errors < symbols.len() {
            signals.push(Signal::Symbol);
        }

        let status = status_for(signals.len(), failures.len());
        let results = if status == RetrievalStatus::Failed {
            Vec::new()
        } else {
            fuse(&query, semantic, symbol_hits, self.config.symbol_boost, limit)
        };

        RetrievalOutcome {
            status,
            has_code_context: !results.is_empty(),
            results,
            symbols,
            signals,
            history,
            message: if failures.is_empty() {
                None
            } else {
                Some(failures.join("; "))
            },
        }
    }

    /// Formatted context for a downstream prompt, bounded by `max_chars`.
    pub async fn prepare_context(
        &self,
        title: &str,
        body: &str,
        repo_id: &str,
        max_chars: Option<usize>,
    ) -> PreparedContext {
        let max_chars = max_chars.unwrap_or(self.config.context_max_chars);
        let outcome = self.find_relevant_code(title, body, repo_id, None).await;

        let blocks: Vec<String> = outcome
            .results
            .iter()
            .map(|r| format_block(r, self.config.chunk_char_cap))
            .collect();
        let packed = pack_blocks(&blocks, max_chars);
        if packed.dropped > 0 {
            debug!("prepare_context: dropped {} blocks over budget", packed.dropped);
        }

        let historical_context = outcome
            .history
            .as_ref()
            .map(|h| format_history(h, self.config.history_limit))
            .unwrap_or_default();
        let total_context_chars = packed.chars + historical_context.chars().count();

        PreparedContext {
            status: outcome.status,
            signals: outcome.signals,
            has_code_context: packed.included > 0,
            code_context: packed.text,
            code_blocks: packed.included,
            dropped_blocks: packed.dropped,
            historical_context,
            total_context_chars,
            symbols: outcome.symbols,
            message: outcome.message,
        }
    }

    /// Ranked chunks for a free-text query with optional filters.
    pub async fn search_code(&self, request: SearchRequest) -> Result<Vec<RetrievalResult>> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(Error::InvalidArgument("query is empty".to_string()));
        }
        let limit = request.limit.filter(|l| *l > 0).unwrap_or(self.config.default_limit);
        let filter = ChunkFilter {
            repo_id: request.repo_id,
            language: request.language,
            chunk_type: request.chunk_type,
        };

        let (hits, source) = if request.semantic {
            (self.semantic_hits(&query, &filter, limit).await?, SEMANTIC_SOURCE)
        } else {
            let mut terms = words(&query);
            terms.retain(|t| t.len() > 1);
            terms.dedup();
            let hits = self
                .store_call("lexical search", move |store| store.lexical_search(&terms, &filter, limit))
                .await?;
            (hits, LEXICAL_SOURCE)
        };

        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = hit.score;
                into_result(hit, score, source.to_string(), &query)
            })
            .collect())
    }

    /// Exact-then-fuzzy lookup by unit name.
    pub async fn search_by_symbol(
        &self,
        name: &str,
        repo_id: Option<&str>,
        exact: bool,
    ) -> Result<Vec<RetrievalResult>> {
        let filter = ChunkFilter {
            repo_id: repo_id.map(str::to_string),
            ..ChunkFilter::default()
        };
        let (symbol, hits) = self
            .symbol_lookup(name.trim().to_string(), &filter, exact, self.config.symbol_hits_per_symbol)
            .await;
        Ok(hits?
            .into_iter()
            .map(|hit| {
                let score = hit.score;
                into_result(hit, score, format!("symbol:{symbol}"), &symbol)
            })
            .collect())
    }

    /// Chunks that call `name`.
    pub async fn get_function_calls(
        &self,
        name: &str,
        repo_id: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidArgument("function name is empty".to_string()));
        }
        let (target, repo) = (name.clone(), repo_id.map(str::to_string));
        let hits = self
            .store_call("caller search", move |store| store.callers(&target, repo.as_deref(), CALLER_LIMIT))
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| into_result(hit, 1.0, format!("calls:{name}"), &name))
            .collect())
    }

    /// Callers, callees and same-class siblings of one chunk; `None` when
    /// the chunk is not indexed.
    pub async fn find_related_code(&self, repo_id: &str, chunk_id: &str) -> Result<Option<RelatedCode>> {
        let (repo, id) = (repo_id.to_string(), chunk_id.to_string());
        let Some(hit) = self
            .store_call("chunk lookup", move |store| store.get_chunk(&repo, &id))
            .await?
        else {
            return Ok(None);
        };
        let chunk = hit.chunk.clone();

        let callers = self.get_function_calls(&chunk.name, Some(repo_id)).await?;

        let filter = ChunkFilter::repo(repo_id);
        let lookups = join_all(
            chunk
                .calls
                .iter()
                .take(CALLEE_LOOKUPS)
                .map(|call| self.symbol_lookup(call.clone(), &filter, true, HITS_PER_CALLEE)),
        )
        .await;
        let mut callees = Vec::new();
        for (call, result) in lookups {
            for callee in result? {
                callees.push(into_result(callee, 1.0, format!("called:{call}"), &call));
            }
        }

        let mut same_class = Vec::new();
        if let Some(parent) = chunk.parent_name.clone() {
            let repo = repo_id.to_string();
            let members = self
                .store_call("member lookup", move |store| store.members_of(&repo, &parent, SAME_CLASS_LIMIT))
                .await?;
            same_class = members
                .into_iter()
                .filter(|m| m.chunk.chunk_id != chunk.chunk_id)
                .map(|m| into_result(m, 1.0, "same_class".to_string(), ""))
                .collect();
        }

        Ok(Some(RelatedCode {
            chunk: into_result(hit, 1.0, "requested".to_string(), ""),
            callers,
            callees,
            same_class,
        }))
    }

    /// Chunks of a file overlapping `start..=end` widened by `context_lines`.
    pub async fn get_code_context(
        &self,
        repo_id: &str,
        relative_path: &str,
        start: usize,
        end: usize,
        context_lines: Option<usize>,
    ) -> Result<CodeContext> {
        if start == 0 || start > end {
            return Err(Error::InvalidArgument(format!("invalid line range {start}-{end}")));
        }
        let pad = context_lines.unwrap_or(DEFAULT_CONTEXT_LINES);
        let (from, to) = (start.saturating_sub(pad).max(1), end + pad);
        let (repo, path) = (repo_id.to_string(), relative_path.to_string());
        let hits = self
            .store_call("range lookup", move |store| store.chunks_in_range(&repo, &path, from, to))
            .await?;

        Ok(CodeContext {
            relative_path: relative_path.to_string(),
            target_lines: format!("{start}-{end}"),
            chunks: hits.into_iter().map(|h| h.chunk).collect(),
        })
    }

    pub async fn get_index_stats(&self, repo_id: Option<&str>) -> Result<IndexStats> {
        let repo = repo_id.map(str::to_string);
        self.store_call("stats", move |store| store.stats(repo.as_deref())).await
    }

    pub async fn clear_repository(&self, repo_id: &str) -> Result<ClearSummary> {
        if repo_id.trim().is_empty() {
            return Err(Error::InvalidArgument("repo_id must not be empty".to_string()));
        }
        let repo = repo_id.to_string();
        self.store_call("clear repository", move |store| store.clear_repository(&repo)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Db, test_document};
    use crate::embedder::hashing::HashingEmbedder;
    use crate::store::WriteBatch;

    fn hit(name: &str, score: f64) -> ChunkHit {
        let doc = test_document("repo", "/repo/auth.py", name, ChunkKind::Function, 1, None);
        ChunkHit {
            repo_id: doc.repo_id,
            chunk: doc.chunk,
            file_hash: doc.file_hash,
            score,
        }
    }

    #[test]
    fn test_fusion_sums_and_tags() {
        let results = fuse(
            "query",
            vec![hit("validate_token", 0.6), hit("log", 0.7)],
            vec![("validate_token".into(), vec![hit("validate_token", 3.0)])],
            1.5,
            10,
        );
        assert_eq!(results[0].chunk.name, "validate_token");
        assert!((results[0].score - (0.6 + 4.5)).abs() < 1e-9);
        assert_eq!(
            results[0].match_sources,
            vec!["semantic_search".to_string(), "symbol:validate_token".to_string()]
        );
        assert_eq!(results[1].match_sources, vec!["semantic_search".to_string()]);
    }

    #[test]
    fn test_fusion_is_monotone() {
        let semantic_only = fuse("q", vec![hit("a", 0.4)], Vec::new(), 1.5, 10);
        let symbol_only = fuse("q", Vec::new(), vec![("a".into(), vec![hit("a", 1.0)])], 1.5, 10);
        let both = fuse("q", vec![hit("a", 0.4)], vec![("a".into(), vec![hit("a", 1.0)])], 1.5, 10);
        assert!(both[0].score >= semantic_only[0].score);
        assert!(both[0].score >= symbol_only[0].score);
    }

    #[test]
    fn test_fusion_truncates() {
        let semantic: Vec<ChunkHit> = (0..5).map(|i| hit(&format!("f{i}"), i as f64 / 10.0)).collect();
        let results = fuse("q", semantic, Vec::new(), 1.5, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.name, "f4");
    }

    #[test]
    fn test_explain_relevance() {
        let mut chunk = hit("validate_token", 1.0).chunk;
        chunk.doc_comment = Some("Reject an expired token".into());
        let text = explain_relevance("token expired", &chunk);
        assert_eq!(
            text,
            "Name contains: token; Documentation mentions: token, expired; This is a function"
        );

        chunk.kind = ChunkKind::Block;
        chunk.doc_comment = None;
        assert_eq!(explain_relevance("nothing", &chunk), "Semantic similarity match");
    }

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(2, 0), RetrievalStatus::Ok);
        assert_eq!(status_for(1, 1), RetrievalStatus::Degraded);
        assert_eq!(status_for(0, 1), RetrievalStatus::Failed);
        assert_eq!(status_for(0, 0), RetrievalStatus::Failed);
    }

    fn seeded_retriever() -> Retriever {
        let embedder = Arc::new(HashingEmbedder::new(32));
        let db = Arc::new(Db::open_in_memory(32).unwrap());
        let mut batch = WriteBatch::default();
        for (name, parent, calls) in [
            ("login", None, vec!["validate_token"]),
            ("validate_token", None, vec!["decode"]),
            ("decode", None, vec![]),
            ("refresh", Some("Session"), vec!["validate_token"]),
            ("close", Some("Session"), vec![]),
        ] {
            let start = 1 + 10 * batch.documents.len();
            let mut doc = test_document("repo", "/repo/auth.py", name, ChunkKind::Function, start, None);
            if parent.is_some() {
                doc.chunk.kind = ChunkKind::Method;
                doc.chunk.parent_name = parent.map(str::to_string);
            }
            doc.chunk.calls = calls.into_iter().map(str::to_string).collect();
            doc.embedding = Some(embedder.embed(&doc.searchable_text).unwrap());
            batch.documents.push(doc);
        }
        db.apply_batch(&batch).unwrap();
        Retriever::new(db, embedder, RetrievalConfig::default(), ExternalCallConfig::default())
    }

    #[tokio::test]
    async fn test_find_related_code() {
        let retriever = seeded_retriever();
        let id = crate::chunker::chunk_id("/repo/auth.py", "refresh", 31);
        let related = retriever.find_related_code("repo", &id).await.unwrap().unwrap();
        assert_eq!(related.chunk.chunk.name, "refresh");
        assert!(related.callers.is_empty());
        assert_eq!(related.callees.len(), 1);
        assert_eq!(related.callees[0].chunk.name, "validate_token");
        assert_eq!(related.same_class.len(), 1);
        assert_eq!(related.same_class[0].chunk.name, "close");

        assert!(retriever.find_related_code("repo", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_function_calls_and_symbols() {
        let retriever = seeded_retriever();
        let callers = retriever.get_function_calls("validate_token", Some("repo")).await.unwrap();
        let names: Vec<_> = callers.iter().map(|c| c.chunk.name.as_str()).collect();
        assert_eq!(names, vec!["login", "refresh"]);

        let exact = retriever.search_by_symbol("decode", Some("repo"), true).await.unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].match_sources, vec!["symbol:decode".to_string()]);
    }

    #[tokio::test]
    async fn test_code_context_widens_range() {
        let retriever = seeded_retriever();
        // decode spans 21-26; lines 30-30 widened by 5 reach it
        let context = retriever
            .get_code_context("repo", "auth.py", 30, 30, Some(5))
            .await
            .unwrap();
        let names: Vec<_> = context.chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["decode", "refresh"]);
        assert_eq!(context.target_lines, "30-30");

        assert!(retriever.get_code_context("repo", "auth.py", 9, 3, None).await.is_err());
    }

    #[tokio::test]
    async fn test_lexical_search_code() {
        let retriever = seeded_retriever();
        let results = retriever
            .search_code(SearchRequest {
                query: "validateToken".into(),
                repo_id: Some("repo".into()),
                semantic: false,
                ..SearchRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(results[0].chunk.name, "validate_token");
        assert_eq!(results[0].match_sources, vec![LEXICAL_SOURCE.to_string()]);
    }

    #[tokio::test]
    async fn test_empty_query_fails_structured() {
        let retriever = seeded_retriever();
        let outcome = retriever.find_relevant_code("  ", "", "repo", None).await;
        assert_eq!(outcome.status, RetrievalStatus::Failed);
        assert!(!outcome.has_code_context);
        assert!(outcome.message.is_some());
    }
}
