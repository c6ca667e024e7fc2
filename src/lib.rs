//! # codetriage: code retrieval for bug triage
//!
//! Indexes source repositories into function/method/class chunks with vector
//! embeddings, keeps the index fresh incrementally, and answers "which code
//! is relevant to this bug report" with a fused symbol + semantic ranking and
//! a size-bounded, prompt-ready context block.
//!
//! ## Architecture
//!
//! - **[`chunker`]**: splits a source file into units (tree-sitter, brace/indent scan, fixed windows)
//! - **[`indexer`]**: hash-gated repository and file indexing with a worker pool and batched writes
//! - **[`retriever`]**: symbol extraction, parallel searches, fusion, context formatting
//! - **[`store`]**: the `SearchBackend` seam and its document types
//! - **[`db`]**: SQLite + sqlite-vec implementation of `SearchBackend`
//! - **[`embedder`]**: `Embedder` trait, HTTP embedding client, local hashing embedder
//! - **[`watcher`]**: re-indexes files as they change on disk
//! - **[`mcp`]**: MCP server exposing the operations as tools (stdio transport via rmcp)
//! - **[`config`]**, **[`error`]**, **[`retry`]**: configuration, error types, bounded external calls

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod mcp;
pub mod retriever;
pub mod retry;
pub mod store;
pub mod watcher;
