/// MCP tool handlers.
///
/// One tool per public operation:
/// 1. index_repository   – index (or incrementally refresh) a repository
/// 2. index_file         – index a single file
/// 3. search_code        – semantic or lexical search with filters
/// 4. search_by_symbol   – exact-then-fuzzy symbol lookup
/// 5. find_relevant_code – fused ranking for a bug report
/// 6. prepare_context    – formatted, size-bounded context for a bug report
/// 7. get_function_calls – callers of a function
/// 8. find_related_code  – callers, callees and siblings of a chunk
/// 9. get_code_context   – chunks around a line range
/// 10. get_index_stats   – index statistics
/// 11. clear_repository  – drop a repository from the index
use crate::chunker::ChunkKind;
use crate::indexer::{FileStatus, RepositoryOptions};
use crate::mcp::server::McpContext;
use crate::retriever::SearchRequest;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct IndexRepositoryParams {
    /// Path to the repository root
    repo_path: String,
    /// Repository identifier chunks are stored under
    repo_id: String,
    /// File extensions to include, e.g. ["py", "ts"] (default: all supported)
    extensions: Option<Vec<String>>,
    /// Path substrings to exclude, matched against "/<relative path>", e.g. "/build/" (default: build, dependency and VCS directories)
    exclude_patterns: Option<Vec<String>>,
    /// Skip files whose content hash is unchanged (default: true)
    incremental: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
struct IndexFileParams {
    /// Path to the file
    file_path: String,
    /// Repository identifier
    repo_id: String,
    /// File content; read from disk when omitted
    content: Option<String>,
    /// Repository root used for the relative path
    repo_path: Option<String>,
    /// Re-index even if unchanged (default: false)
    force: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
struct SearchCodeParams {
    /// Search query (natural language or identifiers)
    query: String,
    /// Limit to one repository
    repo_id: Option<String>,
    /// Limit to one language, e.g. 'python'
    language: Option<String>,
    /// Limit to one unit kind: file | class | function | method | block
    chunk_type: Option<String>,
    /// Vector search when true, weighted term search when false (default: true)
    semantic: Option<bool>,
    /// Max results (default: 20)
    limit: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct SymbolParams {
    /// Function, method or class name
    symbol_name: String,
    /// Limit to one repository
    repo_id: Option<String>,
    /// Only exact or case-insensitive name matches (default: false)
    exact: Option<bool>,
}

#[derive(Deserialize, JsonSchema)]
struct BugReportParams {
    /// Bug title
    title: String,
    /// Bug description
    description: Option<String>,
    /// Repository identifier
    repo_id: String,
    /// Max results (default: 20)
    limit: Option<usize>,
    /// Character budget for formatted code (prepare_context only, default: 50000)
    max_chars: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct FunctionCallsParams {
    /// Name of the called function
    function_name: String,
    /// Limit to one repository
    repo_id: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct RelatedCodeParams {
    /// Repository identifier
    repo_id: String,
    /// Chunk id as returned by the search tools
    chunk_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct CodeContextParams {
    /// Repository identifier
    repo_id: String,
    /// File path relative to the repository root
    file_path: String,
    /// First line of interest (1-based)
    start_line: usize,
    /// Last line of interest
    end_line: usize,
    /// Extra lines on each side (default: 10)
    context_lines: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct RepoParam {
    /// Repository identifier
    repo_id: Option<String>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

fn internal(context: &str, e: impl std::fmt::Display) -> McpError {
    McpError::internal_error(format!("{context}: {e}"), None)
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Indexing ────────────────────────────────────────────────────

    #[tool(
        description = "Index a repository: chunk source files into functions, methods and classes, embed them and store them for search. Unchanged files are skipped unless incremental is false."
    )]
    async fn index_repository(
        &self,
        params: Parameters<IndexRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.repo_path.is_empty() || p.repo_id.is_empty() {
            return error_result("repo_path and repo_id are required");
        }
        let root = Path::new(&p.repo_path);
        if !root.is_dir() {
            return error_result(&format!("directory not found: {}", p.repo_path));
        }

        let options = RepositoryOptions {
            extensions: p.extensions,
            exclude_patterns: p.exclude_patterns,
            incremental: p.incremental.unwrap_or(true),
        };
        let summary = self
            .ctx
            .indexer
            .index_repository(root, &p.repo_id, options, self.ctx.shutdown.child_token())
            .await
            .map_err(|e| internal("indexing failed", e))?;

        json_result(&summary)
    }

    #[tool(description = "Index a single source file. Skipped when its content hash is unchanged unless force is true.")]
    async fn index_file(&self, params: Parameters<IndexFileParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.file_path.is_empty() || p.repo_id.is_empty() {
            return error_result("file_path and repo_id are required");
        }
        let path = Path::new(&p.file_path);
        let content = match p.content {
            Some(content) => content,
            None => match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => return error_result(&format!("cannot read {}: {e}", p.file_path)),
            },
        };

        let root = p.repo_path.map(PathBuf::from);
        let outcome = self
            .ctx
            .indexer
            .index_file_under(root.as_deref(), path, &content, &p.repo_id, p.force.unwrap_or(false))
            .await;
        if outcome.status == FileStatus::Failed {
            return error_result(outcome.message.as_deref().unwrap_or("indexing failed"));
        }

        json_result(&outcome)
    }

    // ── Search ──────────────────────────────────────────────────────

    #[tool(
        description = "Search indexed code by meaning (semantic=true) or by weighted keyword match (semantic=false). Filter by repository, language and unit kind."
    )]
    async fn search_code(&self, params: Parameters<SearchCodeParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.trim().is_empty() {
            return error_result("query is required");
        }
        let chunk_type = match p.chunk_type.as_deref().map(str::parse::<ChunkKind>).transpose() {
            Ok(kind) => kind,
            Err(e) => return error_result(&e),
        };

        let results = self
            .ctx
            .retriever
            .search_code(SearchRequest {
                query: p.query,
                repo_id: p.repo_id,
                language: p.language,
                chunk_type,
                semantic: p.semantic.unwrap_or(true),
                limit: p.limit,
            })
            .await
            .map_err(|e| internal("search failed", e))?;

        json_result(&serde_json::json!({ "results": results }))
    }

    #[tool(description = "Find functions, methods or classes by name. Exact matches rank first, then case-insensitive, then substring matches.")]
    async fn search_by_symbol(&self, params: Parameters<SymbolParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.symbol_name.trim().is_empty() {
            return error_result("symbol_name is required");
        }
        let results = self
            .ctx
            .retriever
            .search_by_symbol(&p.symbol_name, p.repo_id.as_deref(), p.exact.unwrap_or(false))
            .await
            .map_err(|e| internal("symbol search failed", e))?;

        json_result(&serde_json::json!({ "results": results }))
    }

    // ── Bug triage ──────────────────────────────────────────────────

    #[tool(
        description = "Rank the code most likely related to a bug report. Combines semantic search with lookups of identifiers mentioned in the report; status reports whether any search backend was degraded."
    )]
    async fn find_relevant_code(&self, params: Parameters<BugReportParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let outcome = self
            .ctx
            .retriever
            .find_relevant_code(&p.title, p.description.as_deref().unwrap_or(""), &p.repo_id, p.limit)
            .await;
        json_result(&outcome)
    }

    #[tool(
        description = "Build a size-bounded, formatted code context for a bug report, ready to paste into a prompt, plus a separate section of similar past issues when available."
    )]
    async fn prepare_context(&self, params: Parameters<BugReportParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let context = self
            .ctx
            .retriever
            .prepare_context(&p.title, p.description.as_deref().unwrap_or(""), &p.repo_id, p.max_chars)
            .await;
        json_result(&context)
    }

    // ── Relations ───────────────────────────────────────────────────

    #[tool(description = "List functions and methods that call the given function")]
    async fn get_function_calls(&self, params: Parameters<FunctionCallsParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.function_name.trim().is_empty() {
            return error_result("function_name is required");
        }
        let callers = self
            .ctx
            .retriever
            .get_function_calls(&p.function_name, p.repo_id.as_deref())
            .await
            .map_err(|e| internal("caller search failed", e))?;

        json_result(&serde_json::json!({ "function": p.function_name, "callers": callers }))
    }

    #[tool(description = "Show the callers, callees and same-class members of an indexed chunk")]
    async fn find_related_code(&self, params: Parameters<RelatedCodeParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let related = self
            .ctx
            .retriever
            .find_related_code(&p.repo_id, &p.chunk_id)
            .await
            .map_err(|e| internal("related code lookup failed", e))?;

        match related {
            Some(related) => json_result(&related),
            None => error_result(&format!("chunk not found: {}", p.chunk_id)),
        }
    }

    #[tool(description = "Get the indexed units of a file around a line range")]
    async fn get_code_context(&self, params: Parameters<CodeContextParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self
            .ctx
            .retriever
            .get_code_context(&p.repo_id, &p.file_path, p.start_line, p.end_line, p.context_lines)
            .await
        {
            Ok(context) => json_result(&context),
            Err(e) => error_result(&e.to_string()),
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────

    #[tool(description = "Index statistics: chunk, line and file counts by language, unit kind and repository")]
    async fn get_index_stats(&self, params: Parameters<RepoParam>) -> Result<CallToolResult, McpError> {
        let stats = self
            .ctx
            .retriever
            .get_index_stats(params.0.repo_id.as_deref())
            .await
            .map_err(|e| internal("stats failed", e))?;
        json_result(&stats)
    }

    #[tool(description = "Remove every chunk and file record of a repository from the index")]
    async fn clear_repository(&self, params: Parameters<RepoParam>) -> Result<CallToolResult, McpError> {
        let Some(repo_id) = params.0.repo_id.filter(|r| !r.trim().is_empty()) else {
            return error_result("repo_id is required");
        };
        let summary = self
            .ctx
            .retriever
            .clear_repository(&repo_id)
            .await
            .map_err(|e| internal("clear failed", e))?;

        json_result(&serde_json::json!({
            "success": true,
            "repo_id": repo_id,
            "chunks_deleted": summary.chunks_deleted,
            "files_deleted": summary.files_deleted,
        }))
    }
}
