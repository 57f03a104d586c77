// src/worker/mod.rs
// Background embedding worker: drains chunks without embeddings in batches,
// commits once per batch, maintains document index status, and runs hourly
// vector-store GC where supported. Document ingestion feeds the queue.

mod chunker;

pub use chunker::{DraftChunk, chunk_source};

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db::ChunkMetadata;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::vector::{EmbeddingRecord, VectorStore};

/// Maximum chunks embedded per batch (one transaction per batch)
const BATCH_SIZE: i64 = 100;
/// Idle sleep between empty scans
const IDLE_SLEEP: Duration = Duration::from_secs(5);
/// Backoff ladder applied on consecutive errors
const RETRY_DELAYS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(120),
];
/// Vector-store GC cadence
const GC_INTERVAL: Duration = Duration::from_secs(3600);

pub struct EmbeddingWorker {
    pool: PgPool,
    embeddings: Option<Arc<EmbeddingClient>>,
    vector_store: Arc<VectorStore>,
    shutdown: watch::Receiver<bool>,
}

impl EmbeddingWorker {
    pub fn new(
        pool: PgPool,
        embeddings: Option<Arc<EmbeddingClient>>,
        vector_store: Arc<VectorStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            embeddings,
            vector_store,
            shutdown,
        }
    }

    /// Worker loop. Runs until the shutdown signal flips.
    pub async fn run(mut self) {
        info!("Embedding worker started");
        let mut consecutive_errors = 0usize;
        let mut last_gc = Instant::now();

        loop {
            if *self.shutdown.borrow() {
                info!("Embedding worker shutting down");
                break;
            }

            match self.process_batch().await {
                Ok(processed) if processed > 0 => {
                    info!(processed, "Embedded pending chunks");
                    consecutive_errors = 0;
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let delay = RETRY_DELAYS[(consecutive_errors - 1).min(RETRY_DELAYS.len() - 1)];
                    warn!(
                        consecutive_errors,
                        "Embedding batch failed: {}; backing off {:?}", e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            if last_gc.elapsed() > GC_INTERVAL {
                last_gc = Instant::now();
                if self.vector_store.supports_gc() {
                    match self.vector_store.gc_dangling_points().await {
                        Ok(removed) => info!(removed, "Vector store GC pass complete"),
                        Err(e) => warn!("Vector store GC failed: {}", e),
                    }
                }
            }

            if self.shutdown.has_changed().unwrap_or(false) && *self.shutdown.borrow() {
                break;
            }
        }
    }

    /// Embed one batch of pending chunks. The relational write is one
    /// transaction; partial failure rolls the whole batch back.
    async fn process_batch(&self) -> Result<usize> {
        let Some(embeddings) = &self.embeddings else {
            // Without an embedding provider there is nothing to drain
            tokio::time::sleep(Duration::from_secs(60)).await;
            return Ok(0);
        };

        let rows = sqlx::query(
            r#"SELECT c.id, c.document_id, c.content, c.symbol_name, c.symbol_type,
                      c.start_line, c.end_line, d.project_id, d.file_path, d.language
               FROM chunks c JOIN documents d ON d.id = c.document_id
               WHERE c.embedding IS NULL
               ORDER BY c.id
               LIMIT $1"#,
        )
        .bind(BATCH_SIZE)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("content"))
            .collect::<std::result::Result<_, _>>()?;
        let vectors = embeddings.embed_batch(&texts).await?;

        let mut records = Vec::with_capacity(rows.len());
        for (row, vector) in rows.iter().zip(vectors) {
            records.push(EmbeddingRecord {
                chunk_id: row.try_get("id")?,
                document_id: row.try_get("document_id")?,
                project_id: row.try_get("project_id")?,
                vector,
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
            });
        }

        // Relational write: embeddings + index status, atomically
        let mut tx = self.pool.begin().await?;
        for record in &records {
            sqlx::query("UPDATE chunks SET embedding = $1::vector WHERE id = $2")
                .bind(crate::vector::vector_literal(&record.vector))
                .bind(record.chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        let mut document_ids: Vec<i64> = records.iter().map(|r| r.document_id).collect();
        document_ids.sort_unstable();
        document_ids.dedup();
        sqlx::query(
            r#"UPDATE documents d SET is_indexed = NOT EXISTS (
                 SELECT 1 FROM chunks c WHERE c.document_id = d.id AND c.embedding IS NULL
               )
               WHERE d.id = ANY($1)"#,
        )
        .bind(&document_ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        // External vector store gets the same batch (pgvector already has it)
        if self.vector_store.backend_name() == "qdrant" {
            let count = records.len();
            self.vector_store.insert_embeddings(records).await?;
            info!(count, "Mirrored batch to Qdrant");
        }

        Ok(rows.len())
    }
}

/// Ingest one document: upsert the row, replace its chunks, queue them for
/// embedding. Unchanged content (by hash) is a no-op.
pub async fn ingest_document(
    pool: &PgPool,
    vector_store: &VectorStore,
    project_id: i64,
    file_path: &str,
    content: &str,
    language: Option<&str>,
) -> Result<usize> {
    let content_hash = {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    let existing: Option<(i64, String)> = sqlx::query_as(
        "SELECT id, content_hash FROM documents WHERE project_id = $1 AND file_path = $2",
    )
    .bind(project_id)
    .bind(file_path)
    .fetch_optional(pool)
    .await?;

    if let Some((_, hash)) = &existing {
        if *hash == content_hash {
            return Ok(0);
        }
    }

    let document_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO documents (project_id, file_path, language, content_hash, is_indexed)
           VALUES ($1, $2, $3, $4, FALSE)
           ON CONFLICT (project_id, file_path) DO UPDATE
           SET language = $3, content_hash = $4, is_indexed = FALSE
           RETURNING id"#,
    )
    .bind(project_id)
    .bind(file_path)
    .bind(language)
    .bind(&content_hash)
    .fetch_one(pool)
    .await?;

    // Replace chunks; stale vector points are deleted (or GC'd) per backend
    if existing.is_some() {
        if let Err(e) = vector_store.delete_by_document(document_id).await {
            warn!("Failed to drop old vectors for document {}: {}", document_id, e);
        }
        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(pool)
            .await?;
    }

    let drafts = chunk_source(content, language);
    let count = drafts.len();
    let mut tx = pool.begin().await?;
    for draft in drafts {
        sqlx::query(
            r#"INSERT INTO chunks
               (document_id, content, symbol_name, symbol_type, start_line, end_line, tokens)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(document_id)
        .bind(&draft.content)
        .bind(&draft.symbol_name)
        .bind(&draft.symbol_type)
        .bind(draft.start_line)
        .bind(draft.end_line)
        .bind(draft.tokens)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(file_path, chunks = count, "Document ingested");
    Ok(count)
}
