/// Deterministic local embedder based on feature hashing.
///
/// Each lowercased word (identifiers are split on `_` and camelCase) and its
/// 5-character prefix is hashed into a signed bucket, then the vector is L2
/// normalised. Texts sharing vocabulary land close together, which is enough
/// for offline use and tests; it is not a semantic model.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError};

const PREFIX_CHARS: usize = 5;

pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

/// Lowercased words; `validateToken` and `validate_token` both give `validate`, `token`.
pub fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in raw.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    out
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if self.dimensions == 0 {
            return Err(EmbedderError::InferenceFailed(
                "zero-dimensional embedder".to_string(),
            ));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for word in words(text) {
            self.add_feature(&mut embedding, &word);
            if word.chars().count() > PREFIX_CHARS {
                let prefix: String = word.chars().take(PREFIX_CHARS).collect();
                self.add_feature(&mut embedding, &format!("{prefix}*"));
            }
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        } else {
            embedding[0] = 1.0;
        }

        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
