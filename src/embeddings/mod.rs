// src/embeddings/mod.rs
// Embedding provider module. OpenAI text-embedding-3-small; every vector is
// unit-normalized before storage or search.

mod openai;

pub use openai::OpenAiEmbeddings;

use std::sync::Arc;
use tracing::info;

use crate::cache::CacheService;
use crate::config::ApiKeys;
use crate::error::{LoupeError, Result};

/// Embedding dimensions for text-embedding-3-small
pub const EMBEDDING_DIM: usize = 1536;

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    OpenAi(OpenAiEmbeddings),
}

/// Embedding client with provider selection and an L1 cache in front.
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    cache: Arc<CacheService>,
}

impl EmbeddingClient {
    /// Create a client from pre-loaded configuration. Returns None when no
    /// embedding provider is configured (semantic search degrades).
    pub fn from_config(api_keys: &ApiKeys, cache: Arc<CacheService>) -> Option<Self> {
        if let Some(api_key) = api_keys.openai.as_ref() {
            info!("Using OpenAI embeddings (text-embedding-3-small)");
            return Some(Self {
                backend: EmbeddingBackend::OpenAi(OpenAiEmbeddings::new(api_key.clone())),
                cache,
            });
        }
        None
    }

    pub fn provider_id(&self) -> &'static str {
        match &self.backend {
            EmbeddingBackend::OpenAi(_) => "openai",
        }
    }

    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Provider-native batch size; one sub-batch maps to one HTTP request.
    pub fn batch_size(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::OpenAi(_) => openai::MAX_BATCH_SIZE,
        }
    }

    /// Embed a single text, unit-normalized, cached.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get_embedding(text).await {
            return Ok(cached.as_ref().clone());
        }

        let mut vector = match &self.backend {
            EmbeddingBackend::OpenAi(client) => client.embed(text).await?,
        };
        unit_normalize(&mut vector);
        self.cache.put_embedding(text, vector.clone()).await;
        Ok(vector)
    }

    /// Embed a batch of texts, unit-normalized. Batches beyond the provider
    /// limit are split into sub-batches.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for sub in texts.chunks(self.batch_size()) {
            let mut vectors = match &self.backend {
                EmbeddingBackend::OpenAi(client) => client.embed_batch(sub).await?,
            };
            if vectors.len() != sub.len() {
                return Err(LoupeError::Embedding(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    sub.len()
                )));
            }
            for v in &mut vectors {
                unit_normalize(v);
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Normalize a vector to unit length in place. Zero vectors stay zero.
pub fn unit_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_normalize() {
        let mut v = vec![3.0, 4.0];
        unit_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        unit_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
