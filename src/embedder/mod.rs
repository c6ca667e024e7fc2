/// Embedder trait and shared types for text embedding.
///
/// Implementations are blocking; async callers go through
/// [`crate::retry::call_blocking`], which moves the call onto the blocking
/// pool and bounds it with a timeout.
pub mod hashing;
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{EmbeddingConfig, EmbeddingProvider, ExternalCallConfig};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("embedding service timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding service is throttling requests")]
    RateLimited,

    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("expected {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedderError {
    /// Whether one more attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbedderError::Timeout(_) | EmbedderError::RateLimited | EmbedderError::Unavailable(_)
        )
    }
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, one per input, in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Build the configured embedder.
///
/// The HTTP client is blocking; construct it outside of async worker threads.
pub fn from_config(
    config: &EmbeddingConfig,
    external: &ExternalCallConfig,
) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match config.provider {
        EmbeddingProvider::Http => Ok(Arc::new(http::HttpEmbedder::new(config, external)?)),
        EmbeddingProvider::Hashing => Ok(Arc::new(hashing::HashingEmbedder::new(config.dimensions))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EmbedderError::RateLimited.is_transient());
        assert!(EmbedderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(EmbedderError::Unavailable("down".into()).is_transient());
        assert!(!EmbedderError::InferenceFailed("bad input".into()).is_transient());
        assert!(
            !EmbedderError::DimensionMismatch {
                expected: 384,
                actual: 3
            }
            .is_transient()
        );
    }

    #[test]
    fn test_from_config_hashing() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Hashing,
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        let embedder = from_config(&config, &ExternalCallConfig::default()).unwrap();
        assert_eq!(embedder.dimensions(), 64);
    }
}
