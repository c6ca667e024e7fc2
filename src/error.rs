use thiserror::Error;

use crate::chunker::ChunkerError;
use crate::embedder::EmbedderError;
use crate::store::StoreError;

/// Errors surfaced by the indexing and retrieval core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("chunker setup failed: {0}")]
    Chunker(#[from] ChunkerError),

    #[error("embedding failed: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("search engine error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
