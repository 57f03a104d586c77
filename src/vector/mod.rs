// src/vector/mod.rs
// Pluggable ANN store. Enum dispatch over the two backends; callers only see
// the uniform interface.

mod pgvector;
mod qdrant;

pub use pgvector::PgVectorBackend;
pub use qdrant::QdrantBackend;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::{VectorConfig, VectorStoreKind};
use crate::db::ChunkMetadata;
use crate::error::{LoupeError, Result};

/// One embedding ready for insertion
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk_id: i64,
    pub document_id: i64,
    pub project_id: i64,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// ANN search hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub score: f32,
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStats {
    pub backend: String,
    pub points: u64,
}

/// The configured vector backend
pub enum VectorStore {
    PgVector(PgVectorBackend),
    Qdrant(QdrantBackend),
}

impl VectorStore {
    /// Build the backend named by VECTOR_STORE_TYPE.
    pub async fn from_config(config: &VectorConfig, pool: PgPool) -> Result<Self> {
        match config.kind {
            VectorStoreKind::PgVector => Ok(Self::PgVector(PgVectorBackend::new(pool))),
            VectorStoreKind::Qdrant => {
                let url = config
                    .qdrant_url
                    .as_deref()
                    .ok_or_else(|| LoupeError::Config("QDRANT_URL is not set".into()))?;
                Ok(Self::Qdrant(
                    QdrantBackend::connect(
                        url,
                        config.qdrant_api_key.as_deref(),
                        config.dimensions as u64,
                        pool,
                    )
                    .await?,
                ))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::PgVector(_) => "pgvector",
            Self::Qdrant(_) => "qdrant",
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        match self {
            Self::PgVector(b) => b.initialize().await,
            Self::Qdrant(b) => b.initialize().await,
        }
    }

    pub async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        match self {
            Self::PgVector(b) => b.insert_embeddings(records).await,
            Self::Qdrant(b) => b.insert_embeddings(records).await,
        }
    }

    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        project_ids: Option<&[i64]>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        match self {
            Self::PgVector(b) => b.search(vector, limit, project_ids, score_threshold).await,
            Self::Qdrant(b) => b.search(vector, limit, project_ids, score_threshold).await,
        }
    }

    pub async fn delete_by_document(&self, document_id: i64) -> Result<u64> {
        match self {
            Self::PgVector(b) => b.delete_by_document(document_id).await,
            Self::Qdrant(b) => b.delete_by_document(document_id).await,
        }
    }

    pub async fn get_stats(&self) -> Result<VectorStats> {
        match self {
            Self::PgVector(b) => b.get_stats().await,
            Self::Qdrant(b) => b.get_stats().await,
        }
    }

    /// Whether the backend can garbage-collect points whose chunks are gone
    pub fn supports_gc(&self) -> bool {
        matches!(self, Self::Qdrant(_))
    }

    pub async fn gc_dangling_points(&self) -> Result<u64> {
        match self {
            Self::PgVector(_) => Ok(0),
            Self::Qdrant(b) => b.gc_dangling_points().await,
        }
    }
}

/// Render a vector as the pgvector text literal
pub(crate) fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{}", v));
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[0.5, -1.0, 2.0]), "[0.5,-1,2]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
