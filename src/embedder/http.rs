/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Throttling and server errors are reported as transient so the caller's
/// retry layer can decide whether to try once more.
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::{EmbeddingConfig, ExternalCallConfig};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, external: &ExternalCallConfig) -> Result<Self, EmbedderError> {
        let client = Client::builder()
            .timeout(external.timeout())
            .build()
            .map_err(|e| EmbedderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            api_key,
            timeout: external.timeout(),
        })
    }

    fn classify(&self, err: reqwest::Error) -> EmbedderError {
        if err.is_timeout() {
            EmbedderError::Timeout(self.timeout)
        } else if err.is_connect() || err.is_request() {
            EmbedderError::Unavailable(err.to_string())
        } else {
            EmbedderError::InferenceFailed(err.to_string())
        }
    }
}

fn status_error(status: StatusCode, body: String) -> EmbedderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbedderError::RateLimited
    } else if status.is_server_error() {
        EmbedderError::Unavailable(format!("HTTP {status}: {body}"))
    } else {
        EmbedderError::InferenceFailed(format!("HTTP {status}: {body}"))
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("empty response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().map_err(|e| self.classify(e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(status_error(status, body));
        }

        let parsed: EmbeddingResponse = resp.json().map_err(|e| self.classify(e))?;
        debug!("embedded {} texts via {}", parsed.data.len(), self.endpoint);
        order_vectors(parsed.data, texts.len(), self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Put response items back into request order and check their shape.
fn order_vectors(
    mut items: Vec<EmbeddingItem>,
    expected_len: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if items.len() != expected_len {
        return Err(EmbedderError::InferenceFailed(format!(
            "requested {expected_len} embeddings, received {}",
            items.len()
        )));
    }
    if items.iter().all(|i| i.index.is_some()) {
        items.sort_by_key(|i| i.index);
    }
    items
        .into_iter()
        .map(|item| {
            if item.embedding.len() == dimensions {
                Ok(item.embedding)
            } else {
                Err(EmbedderError::DimensionMismatch {
                    expected: dimensions,
                    actual: item.embedding.len(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, embedding: Vec<f32>) -> EmbeddingItem {
        EmbeddingItem {
            embedding,
            index: Some(index),
        }
    }

    #[test]
    fn test_order_vectors_sorts_by_index() {
        let items = vec![item(1, vec![2.0, 2.0]), item(0, vec![1.0, 1.0])];
        let vectors = order_vectors(items, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_order_vectors_dimension_mismatch() {
        let items = vec![item(0, vec![1.0])];
        assert!(matches!(
            order_vectors(items, 1, 2),
            Err(EmbedderError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_order_vectors_count_mismatch() {
        assert!(order_vectors(vec![], 1, 2).is_err());
    }

    #[test]
    fn test_status_errors() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            EmbedderError::RateLimited
        ));
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, String::new()).is_transient());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"data": [{"embedding": [0.5, 0.5], "index": 0}], "model": "m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.5, 0.5]);
    }
}
