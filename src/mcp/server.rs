/// MCP server over stdio.
///
/// Provides `McpContext` (shared state) and `McpServer` (startup logic).
use crate::mcp::tools::AppTools;
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{config::Config, indexer::Indexer, retriever::Retriever};

/// Shared state available to all tool handlers.
#[derive(Clone)]
pub struct McpContext {
    pub config: Arc<Config>,
    pub indexer: Arc<Indexer>,
    pub retriever: Arc<Retriever>,
    /// Cancelled on shutdown; repository runs stop dispatching new files.
    pub shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct McpServer {
    pub ctx: McpContext,
}

impl McpServer {
    pub fn new(ctx: McpContext) -> Self {
        Self { ctx }
    }

    /// Serve until the client disconnects.
    pub async fn start(self) -> Result<()> {
        tracing::info!("Starting MCP server on stdio...");
        let (stdin, stdout) = stdio();

        let app_tools = AppTools::new(self.ctx.clone());
        let router = Router::new(app_tools.clone()).with_tools(app_tools.tool_router.clone());

        let result = router
            .serve((stdin, stdout))
            .await
            .context("MCP server failed to initialize on stdio")?
            .waiting()
            .await;
        self.ctx.shutdown.cancel();
        result.context("MCP server stopped with an error")?;

        Ok(())
    }
}
