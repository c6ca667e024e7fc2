/// Splits one source file into retrievable units.
///
/// Dispatch is table-driven (see [`languages`]): a grammar-backed language is
/// parsed with tree-sitter, a curly-brace or indentation language without a
/// grammar is scanned with per-family regexes, and everything else falls back
/// to fixed line windows. Each step degrades to the next one instead of
/// failing, so [`Chunker::chunk`] never returns an error.
pub mod heuristic;
pub mod languages;
pub mod structured;
pub mod window;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ChunkLimits, ChunkerConfig};
use heuristic::HeuristicScanner;
use languages::{Family, Strategy};
use structured::StructuredParser;

pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("grammar {grammar} could not be loaded: {message}")]
    Grammar {
        grammar: &'static str,
        message: String,
    },

    #[error("query for {grammar} failed to compile: {source}")]
    Query {
        grammar: &'static str,
        #[source]
        source: tree_sitter::QueryError,
    },

    #[error("pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{language} source has syntax errors")]
    Syntax { language: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    File,
    Class,
    Function,
    Method,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::File => "file",
            ChunkKind::Class => "class",
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Block => "block",
        }
    }

    /// Title-case label used in formatted context.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkKind::File => "File",
            ChunkKind::Class => "Class",
            ChunkKind::Function => "Function",
            ChunkKind::Method => "Method",
            ChunkKind::Block => "Block",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ChunkKind::File),
            "class" => Ok(ChunkKind::Class),
            "function" => Ok(ChunkKind::Function),
            "method" => Ok(ChunkKind::Method),
            "block" => Ok(ChunkKind::Block),
            other => Err(format!("unknown chunk type: {other}")),
        }
    }
}

/// One retrievable unit of source code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub file_path: String,
    pub relative_path: String,
    pub kind: ChunkKind,
    pub name: String,
    pub parent_name: Option<String>,
    pub language: String,
    pub signature: Option<String>,
    pub doc_comment: Option<String>,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub imports: Vec<String>,
    pub calls: Vec<String>,
    /// Extended or implemented types (class chunks only).
    pub bases: Vec<String>,
}

impl Chunk {
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// Stable id for a unit: first 16 hex chars of blake3 over `path:name:start_line`.
pub fn chunk_id(file_path: &str, name: &str, start_line: usize) -> String {
    let digest = blake3::hash(format!("{file_path}:{name}:{start_line}").as_bytes());
    digest.to_hex()[..16].to_string()
}

/// Content hash used to gate re-indexing.
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Cut `text` to at most `max_chars` characters, appending [`TRUNCATION_MARKER`] when cut.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// A file being chunked: paths, language and its lines.
pub struct SourceFile<'a> {
    pub path: String,
    pub relative_path: String,
    pub language: &'static str,
    pub limits: ChunkLimits,
    pub text: &'a str,
    pub lines: Vec<&'a str>,
}

impl<'a> SourceFile<'a> {
    /// Lines `start..=end` (1-based) joined with `\n`.
    pub fn line_span(&self, start: usize, end: usize) -> String {
        let end = end.min(self.lines.len());
        if start == 0 || start > end {
            return String::new();
        }
        self.lines[start - 1..end].join("\n")
    }

    pub fn new_chunk(&self, kind: ChunkKind, name: &str, start: usize, end: usize) -> Chunk {
        Chunk {
            chunk_id: chunk_id(&self.path, name, start),
            file_path: self.path.clone(),
            relative_path: self.relative_path.clone(),
            kind,
            name: name.to_string(),
            parent_name: None,
            language: self.language.to_string(),
            signature: None,
            doc_comment: None,
            content: self.line_span(start, end),
            start_line: start,
            end_line: end,
            imports: Vec::new(),
            calls: Vec::new(),
            bases: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative_path.clone())
    }
}

/// Entry point for chunking; cheap to share behind an `Arc`.
pub struct Chunker {
    config: ChunkerConfig,
    structured: StructuredParser,
    heuristic: HeuristicScanner,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        Ok(Self {
            config,
            structured: StructuredParser::new()?,
            heuristic: HeuristicScanner::new()?,
        })
    }

    /// Chunk `content`, read from `file_path`, relative to `repo_root` when given.
    pub fn chunk(&self, file_path: &Path, content: &str, repo_root: Option<&Path>) -> Vec<Chunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let ext = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let lang = languages::by_extension(ext);

        let path = file_path.to_string_lossy().into_owned();
        let relative_path = repo_root
            .and_then(|root| file_path.strip_prefix(root).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());

        let file = SourceFile {
            path,
            relative_path,
            language: lang.name,
            limits: self.config.limits_for(lang.family),
            text: content,
            lines: content.lines().collect(),
        };

        let chunks = match lang.strategy() {
            Strategy::Structured(grammar) => match self.structured.chunk(grammar, &file) {
                Ok(chunks) => chunks,
                Err(e) => {
                    debug!("{}: {e}, falling back to heuristic scan", file.relative_path);
                    self.scan_or_window(lang.family, &file)
                }
            },
            Strategy::Heuristic(family) => self.scan_or_window(family, &file),
            Strategy::FixedWindow => window::chunk(&file),
        };

        debug!(
            "{}: {} chunks ({})",
            file.relative_path,
            chunks.len(),
            file.language
        );
        chunks
    }

    fn scan_or_window(&self, family: Family, file: &SourceFile) -> Vec<Chunk> {
        let chunks = self.heuristic.scan(family, file);
        if chunks.is_empty() {
            window::chunk(file)
        } else {
            chunks
        }
    }
}
