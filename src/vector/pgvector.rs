// src/vector/pgvector.rs
// pgvector backend: embeddings live on the chunks table, so inserts are
// updates and deletes ride the relational cascade.

use sqlx::{PgPool, Row};
use tracing::debug;

use super::{EmbeddingRecord, VectorHit, VectorStats, vector_literal};
use crate::db::ChunkMetadata;
use crate::error::Result;

pub struct PgVectorBackend {
    pool: PgPool,
}

impl PgVectorBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        // Approximate-NN index; build is idempotent
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_embedding
             ON chunks USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in &records {
            sqlx::query("UPDATE chunks SET embedding = $1::vector WHERE id = $2")
                .bind(vector_literal(&record.vector))
                .bind(record.chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = records.len(), "Stored embeddings in pgvector");
        Ok(())
    }

    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        project_ids: Option<&[i64]>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let literal = vector_literal(vector);
        let rows = sqlx::query(
            r#"SELECT c.id AS chunk_id, c.document_id, c.content, c.symbol_name, c.symbol_type,
                      c.start_line, c.end_line, d.file_path, d.language,
                      1 - (c.embedding <=> $1::vector) AS score
               FROM chunks c JOIN documents d ON d.id = c.document_id
               WHERE c.embedding IS NOT NULL
                 AND ($2::bigint[] IS NULL OR d.project_id = ANY($2))
               ORDER BY c.embedding <=> $1::vector
               LIMIT $3"#,
        )
        .bind(&literal)
        .bind(project_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let threshold = score_threshold.unwrap_or(f32::MIN);
        rows.into_iter()
            .map(|row| {
                Ok(VectorHit {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    score: row.try_get::<f64, _>("score")? as f32,
                    content: row.try_get("content")?,
                    metadata: ChunkMetadata {
                        file_path: row.try_get("file_path")?,
                        language: row.try_get("language")?,
                        symbol_name: row.try_get("symbol_name")?,
                        symbol_type: row.try_get("symbol_type")?,
                        start_line: row.try_get("start_line")?,
                        end_line: row.try_get("end_line")?,
                        ..Default::default()
                    },
                })
            })
            .filter(|hit: &Result<VectorHit>| match hit {
                Ok(h) => h.score >= threshold,
                Err(_) => true,
            })
            .collect()
    }

    pub async fn delete_by_document(&self, document_id: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE chunks SET embedding = NULL WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_stats(&self) -> Result<VectorStats> {
        let points: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(VectorStats {
            backend: "pgvector".into(),
            points: points as u64,
        })
    }
}
