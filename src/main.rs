use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use codetriage::chunker::Chunker;
use codetriage::config::{Config, DEFAULT_CONFIG_PATH};
use codetriage::db::Db;
use codetriage::embedder::{self, Embedder};
use codetriage::indexer::{Indexer, RepositoryOptions};
use codetriage::mcp::server::{McpContext, McpServer};
use codetriage::retriever::Retriever;
use codetriage::retriever::history::StaticIssueHistory;
use codetriage::watcher::IndexWatcher;

#[derive(Parser)]
#[command(name = "codetriage", version, about = "Index source trees and retrieve code relevant to bug reports")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the MCP tools over stdio
    Serve {
        /// Keep this repository indexed while serving
        #[arg(long)]
        watch: Option<PathBuf>,
        /// Repository id for --watch (default: directory name)
        #[arg(long)]
        repo_id: Option<String>,
    },
    /// Index a repository
    Index {
        path: PathBuf,
        /// Repository id (default: directory name)
        #[arg(long)]
        repo_id: Option<String>,
        /// Re-index every file, ignoring stored hashes
        #[arg(long)]
        full: bool,
        /// Only these extensions (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,
        /// Extra path substrings to exclude, e.g. /generated/ (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Rank code relevant to a bug report (JSON)
    Find {
        title: String,
        #[arg(long)]
        repo_id: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print prompt-ready context for a bug report
    Context {
        title: String,
        #[arg(long)]
        repo_id: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long)]
        max_chars: Option<usize>,
        /// JSON array of past issues to draw historical context from
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Index statistics (JSON)
    Stats {
        #[arg(long)]
        repo_id: Option<String>,
    },
    /// Remove a repository from the index
    Clear {
        #[arg(long)]
        repo_id: String,
    },
}

struct App {
    config: Arc<Config>,
    indexer: Arc<Indexer>,
    retriever: Retriever,
}

async fn build_app(config: Config) -> Result<App> {
    let embedding = config.embedding.clone();
    let external = config.external;
    // The HTTP embedder owns a blocking client; build it off the runtime.
    let embedder: Arc<dyn Embedder> =
        tokio::task::spawn_blocking(move || embedder::from_config(&embedding, &external))
            .await?
            .context("Failed to initialize embedder")?;

    let db = Db::open(&config.db_path, embedder.dimensions()).context("Failed to open database")?;
    let store = Arc::new(db);
    let chunker = Arc::new(Chunker::new(config.chunker.clone()).context("Failed to initialize chunker")?);

    let indexer = Indexer::new(
        store.clone(),
        embedder.clone(),
        chunker,
        config.indexer.clone(),
        config.external,
    );
    let retriever = Retriever::new(store, embedder, config.retrieval.clone(), config.external);

    Ok(App {
        config: Arc::new(config),
        indexer: Arc::new(indexer),
        retriever,
    })
}

fn default_repo_id(path: &Path) -> Result<String> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Repository not found: {}", path.display()))?;
    match canonical.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("Cannot derive a repository id from {}; pass --repo-id", path.display()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancelled on the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing buffered work...");
            on_signal.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries MCP frames and command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve { watch, repo_id } => {
            let app = build_app(config).await?;
            let watcher = match watch {
                Some(root) => {
                    let repo_id = match repo_id {
                        Some(id) => id,
                        None => default_repo_id(&root)?,
                    };
                    Some(IndexWatcher::start(&root, &repo_id, app.indexer.clone())?)
                }
                None => None,
            };

            let ctx = McpContext {
                config: app.config.clone(),
                indexer: app.indexer.clone(),
                retriever: Arc::new(app.retriever),
                shutdown: CancellationToken::new(),
            };
            let served = McpServer::new(ctx).start().await;
            if let Some(watcher) = watcher {
                watcher.stop();
            }
            served?;
        }
        Command::Index {
            path,
            repo_id,
            full,
            extensions,
            exclude,
        } => {
            let repo_id = match repo_id {
                Some(id) => id,
                None => default_repo_id(&path)?,
            };
            let app = build_app(config).await?;

            let exclude_patterns = if exclude.is_empty() {
                None
            } else {
                let mut patterns = app.config.indexer.exclude_patterns.clone();
                patterns.extend(exclude);
                Some(patterns)
            };
            let options = RepositoryOptions {
                extensions: if extensions.is_empty() { None } else { Some(extensions) },
                exclude_patterns,
                incremental: !full,
            };

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed}]")?);
            spinner.set_message(format!("Indexing {repo_id}"));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let summary = app
                .indexer
                .index_repository(&path, &repo_id, options, interrupt_token())
                .await;
            spinner.finish_and_clear();
            print_json(&summary?)?;
        }
        Command::Find {
            title,
            repo_id,
            body,
            limit,
        } => {
            let app = build_app(config).await?;
            let outcome = app.retriever.find_relevant_code(&title, &body, &repo_id, limit).await;
            print_json(&outcome)?;
        }
        Command::Context {
            title,
            repo_id,
            body,
            max_chars,
            history,
        } => {
            let app = build_app(config).await?;
            let mut retriever = app.retriever;
            if let Some(path) = history {
                let data = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let issues = StaticIssueHistory::from_json(&data)
                    .with_context(|| format!("Invalid issue history in {}", path.display()))?;
                retriever = retriever.with_history(Arc::new(issues));
            }

            let context = retriever.prepare_context(&title, &body, &repo_id, max_chars).await;
            if let Some(message) = &context.message {
                eprintln!("warning: {message}");
            }
            println!("{}", context.code_context);
            if !context.historical_context.is_empty() {
                println!("\n{}", context.historical_context);
            }
        }
        Command::Stats { repo_id } => {
            let app = build_app(config).await?;
            print_json(&app.retriever.get_index_stats(repo_id.as_deref()).await?)?;
        }
        Command::Clear { repo_id } => {
            let app = build_app(config).await?;
            print_json(&app.retriever.clear_repository(&repo_id).await?)?;
        }
    }

    Ok(())
}
