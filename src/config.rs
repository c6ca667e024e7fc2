/// Configuration module for codetriage.
///
/// One immutable `Config` value is loaded (or defaulted) at startup and handed
/// to each component constructor; nothing reads configuration from ambient
/// process state afterwards.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::languages::Family;

pub const DEFAULT_CONFIG_PATH: &str = "codetriage.json";

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./code_index.db".to_string()
}

fn default_provider() -> EmbeddingProvider {
    EmbeddingProvider::Http
}

fn default_endpoint() -> String {
    "http://localhost:11434/v1/embeddings".to_string()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_min_function_lines() -> usize {
    5
}

fn default_max_chunk_lines() -> usize {
    100
}

fn default_overlap_lines() -> usize {
    3
}

fn default_extensions() -> Vec<String> {
    crate::chunker::languages::all_extensions()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Directory segments; matched against the root-relative path with a leading `/`.
fn default_exclude_patterns() -> Vec<String> {
    [
        "/node_modules/",
        "/.git/",
        "/__pycache__/",
        "/.venv/",
        "/venv/",
        "/dist/",
        "/build/",
        "/.idea/",
        "/.vscode/",
        "/target/",
        "/bin/",
        "/obj/",
        "/.next/",
        "/.nuxt/",
        "/coverage/",
        "/.pytest_cache/",
        "/.mypy_cache/",
        "/vendor/",
        "/.tox/",
        ".egg-info/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    1_000_000
}

fn default_batch_size() -> usize {
    50
}

fn default_workers() -> usize {
    4
}

fn default_embedding_concurrency() -> usize {
    2
}

fn default_summary_body_chars() -> usize {
    2000
}

fn default_max_embedding_chars() -> usize {
    8000
}

fn default_limit() -> usize {
    20
}

fn default_symbol_boost() -> f64 {
    1.5
}

fn default_max_symbols() -> usize {
    5
}

fn default_symbol_hits() -> usize {
    50
}

fn default_context_max_chars() -> usize {
    50_000
}

fn default_chunk_char_cap() -> usize {
    3000
}

fn default_history_limit() -> usize {
    5
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub chunker: ChunkerConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub external: ExternalCallConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
    /// Local feature-hashing embedder; no network, lower quality.
    Hashing,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Name of the environment variable holding the API key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Line-count thresholds for one language family.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub min_function_lines: usize,
    pub max_chunk_lines: usize,
    pub overlap_lines: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ChunkLimitsOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_function_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_lines: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkerConfig {
    #[serde(default = "default_min_function_lines")]
    pub min_function_lines: usize,

    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,

    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub family_overrides: HashMap<Family, ChunkLimitsOverride>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,

    /// Leading body characters folded into the searchable summary.
    #[serde(default = "default_summary_body_chars")]
    pub summary_body_chars: usize,

    /// Hard cap on the text sent to the embedding service.
    #[serde(default = "default_max_embedding_chars")]
    pub max_embedding_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_symbol_boost")]
    pub symbol_boost: f64,

    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,

    #[serde(default = "default_symbol_hits")]
    pub symbol_hits_per_symbol: usize,

    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,

    #[serde(default = "default_chunk_char_cap")]
    pub chunk_char_cap: usize,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Timeout and retry policy for calls to the search engine and embedding service.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct ExternalCallConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            embedding: EmbeddingConfig::default(),
            chunker: ChunkerConfig::default(),
            indexer: IndexerConfig::default(),
            retrieval: RetrievalConfig::default(),
            external: ExternalCallConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model_name(),
            dimensions: default_dimensions(),
            api_key_env: None,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_function_lines: default_min_function_lines(),
            max_chunk_lines: default_max_chunk_lines(),
            overlap_lines: default_overlap_lines(),
            family_overrides: HashMap::new(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            embedding_concurrency: default_embedding_concurrency(),
            summary_body_chars: default_summary_body_chars(),
            max_embedding_chars: default_max_embedding_chars(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            symbol_boost: default_symbol_boost(),
            max_symbols: default_max_symbols(),
            symbol_hits_per_symbol: default_symbol_hits(),
            context_max_chars: default_context_max_chars(),
            chunk_char_cap: default_chunk_char_cap(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for ExternalCallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl ChunkerConfig {
    /// Effective limits for a language family, with any override applied.
    #[must_use]
    pub fn limits_for(&self, family: Family) -> ChunkLimits {
        let base = ChunkLimits {
            min_function_lines: self.min_function_lines,
            max_chunk_lines: self.max_chunk_lines,
            overlap_lines: self.overlap_lines,
        };
        match self.family_overrides.get(&family) {
            Some(o) => ChunkLimits {
                min_function_lines: o.min_function_lines.unwrap_or(base.min_function_lines),
                max_chunk_lines: o.max_chunk_lines.unwrap_or(base.max_chunk_lines),
                overlap_lines: o.overlap_lines.unwrap_or(base.overlap_lines),
            },
            None => base,
        }
    }
}

impl ExternalCallConfig {
    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_PATH`].
    /// A missing file yields the default configuration.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.chunker.max_chunk_lines > 0,
            "chunker.max_chunk_lines must be positive"
        );
        anyhow::ensure!(
            self.chunker.min_function_lines > 0,
            "chunker.min_function_lines must be positive"
        );
        for family in Family::ALL {
            let limits = self.chunker.limits_for(family);
            anyhow::ensure!(
                limits.overlap_lines < limits.max_chunk_lines,
                "overlap_lines must be smaller than max_chunk_lines ({family:?})"
            );
        }
        anyhow::ensure!(self.indexer.batch_size > 0, "indexer.batch_size must be positive");
        anyhow::ensure!(self.indexer.workers > 0, "indexer.workers must be positive");
        anyhow::ensure!(
            self.indexer.embedding_concurrency > 0,
            "indexer.embedding_concurrency must be positive"
        );
        anyhow::ensure!(
            self.retrieval.default_limit > 0,
            "retrieval.default_limit must be positive"
        );
        anyhow::ensure!(
            self.retrieval.symbol_boost >= 1.0,
            "retrieval.symbol_boost must be at least 1.0"
        );
        anyhow::ensure!(
            self.retrieval.context_max_chars > 0,
            "retrieval.context_max_chars must be positive"
        );
        anyhow::ensure!(self.external.timeout_ms > 0, "external.timeout_ms must be positive");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
