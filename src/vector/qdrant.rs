// src/vector/qdrant.rs
// Qdrant backend. Point ids are the chunk ids; payload carries content plus
// the chunk metadata used for filtering.

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder, value::Kind,
};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::{EmbeddingRecord, VectorHit, VectorStats};
use crate::db::ChunkMetadata;
use crate::error::{LoupeError, Result};

const COLLECTION: &str = "loupe_code";
/// Upsert batch size; one request per batch
const UPSERT_BATCH: usize = 100;
/// GC scroll page size
const SCROLL_PAGE: u32 = 512;

pub struct QdrantBackend {
    client: Qdrant,
    dimensions: u64,
    /// Used by GC to cross-check point ids against live chunks
    pool: PgPool,
}

impl QdrantBackend {
    pub async fn connect(
        url: &str,
        api_key: Option<&str>,
        dimensions: u64,
        pool: PgPool,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url).skip_compatibility_check();
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| LoupeError::Vector(format!("failed to connect to Qdrant: {}", e)))?;
        info!("Connected to Qdrant at {}", url);
        Ok(Self {
            client,
            dimensions,
            pool,
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(COLLECTION)
            .await
            .map_err(|e| LoupeError::Vector(e.to_string()))?;
        if !exists {
            info!("Creating Qdrant collection: {}", COLLECTION);
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(COLLECTION).vectors_config(
                        VectorParamsBuilder::new(self.dimensions, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| LoupeError::Vector(format!("create collection failed: {}", e)))?;
        }
        Ok(())
    }

    pub async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        for batch in records.chunks(UPSERT_BATCH) {
            let points: Vec<PointStruct> = batch
                .iter()
                .map(|record| {
                    let mut payload: HashMap<String, qdrant_client::qdrant::Value> =
                        HashMap::new();
                    payload.insert("content".into(), record.content.clone().into());
                    payload.insert("document_id".into(), record.document_id.into());
                    payload.insert("project_id".into(), record.project_id.into());
                    payload.insert("file_path".into(), record.metadata.file_path.clone().into());
                    if let Some(lang) = &record.metadata.language {
                        payload.insert("language".into(), lang.clone().into());
                    }
                    if let Some(name) = &record.metadata.symbol_name {
                        payload.insert("symbol_name".into(), name.clone().into());
                    }
                    if let Some(st) = &record.metadata.symbol_type {
                        payload.insert("symbol_type".into(), st.clone().into());
                    }
                    if let Some(line) = record.metadata.start_line {
                        payload.insert("start_line".into(), i64::from(line).into());
                    }
                    if let Some(line) = record.metadata.end_line {
                        payload.insert("end_line".into(), i64::from(line).into());
                    }
                    PointStruct::new(record.chunk_id as u64, record.vector.clone(), payload)
                })
                .collect();

            self.client
                .upsert_points(UpsertPointsBuilder::new(COLLECTION, points).wait(true))
                .await
                .map_err(|e| LoupeError::Vector(format!("upsert failed: {}", e)))?;
        }
        debug!(count = records.len(), "Stored embeddings in Qdrant");
        Ok(())
    }

    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        project_ids: Option<&[i64]>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let mut request =
            SearchPointsBuilder::new(COLLECTION, vector.to_vec(), limit as u64).with_payload(true);

        if let Some(ids) = project_ids {
            let conditions: Vec<Condition> = ids
                .iter()
                .map(|id| Condition::matches("project_id", *id))
                .collect();
            request = request.filter(Filter::should(conditions));
        }
        if let Some(threshold) = score_threshold {
            request = request.score_threshold(threshold);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| LoupeError::Vector(format!("search failed: {}", e)))?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let chunk_id = match point.id.as_ref()?.point_id_options.as_ref()? {
                    qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => *n as i64,
                    _ => return None,
                };
                let payload = point.payload;
                let content = payload.get("content")?.as_str()?.to_string();
                let document_id = payload.get("document_id")?.as_integer()?;

                Some(VectorHit {
                    chunk_id,
                    document_id,
                    score: point.score,
                    content,
                    metadata: ChunkMetadata {
                        file_path: payload
                            .get("file_path")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_default(),
                        language: payload.get("language").and_then(|v| v.as_str()).map(String::from),
                        symbol_name: payload
                            .get("symbol_name")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        symbol_type: payload
                            .get("symbol_type")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        start_line: payload
                            .get("start_line")
                            .and_then(|v| v.as_integer())
                            .map(|v| v as i32),
                        end_line: payload
                            .get("end_line")
                            .and_then(|v| v.as_integer())
                            .map(|v| v as i32),
                        ..Default::default()
                    },
                })
            })
            .collect();
        Ok(hits)
    }

    pub async fn delete_by_document(&self, document_id: i64) -> Result<u64> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(COLLECTION)
                    .points(Filter::must([Condition::matches("document_id", document_id)]))
                    .wait(true),
            )
            .await
            .map_err(|e| LoupeError::Vector(format!("delete failed: {}", e)))?;
        Ok(0)
    }

    pub async fn get_stats(&self) -> Result<VectorStats> {
        let response = self
            .client
            .count(CountPointsBuilder::new(COLLECTION).exact(true))
            .await
            .map_err(|e| LoupeError::Vector(e.to_string()))?;
        Ok(VectorStats {
            backend: "qdrant".into(),
            points: response.result.map(|r| r.count).unwrap_or(0),
        })
    }

    /// Remove points whose chunk rows no longer exist. Runs from the
    /// embedding worker's hourly pass.
    pub async fn gc_dangling_points(&self) -> Result<u64> {
        let mut offset = None;
        let mut removed = 0u64;

        loop {
            let mut request = ScrollPointsBuilder::new(COLLECTION)
                .limit(SCROLL_PAGE)
                .with_payload(false)
                .with_vectors(false);
            if let Some(o) = offset.clone() {
                request = request.offset(o);
            }

            let page = self
                .client
                .scroll(request)
                .await
                .map_err(|e| LoupeError::Vector(format!("scroll failed: {}", e)))?;

            let ids: Vec<i64> = page
                .result
                .iter()
                .filter_map(|p| match p.id.as_ref()?.point_id_options.as_ref()? {
                    qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => Some(*n as i64),
                    _ => None,
                })
                .collect();

            if ids.is_empty() {
                break;
            }

            let live: Vec<i64> =
                sqlx::query_scalar("SELECT id FROM chunks WHERE id = ANY($1)")
                    .bind(&ids)
                    .fetch_all(&self.pool)
                    .await?;
            let live: HashSet<i64> = live.into_iter().collect();
            let dangling: Vec<qdrant_client::qdrant::PointId> = ids
                .iter()
                .filter(|id| !live.contains(id))
                .map(|id| (*id as u64).into())
                .collect();

            if !dangling.is_empty() {
                removed += dangling.len() as u64;
                if let Err(e) = self
                    .client
                    .delete_points(
                        DeletePointsBuilder::new(COLLECTION).points(dangling).wait(true),
                    )
                    .await
                {
                    warn!("GC delete failed: {}", e);
                }
            }

            offset = page.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        if removed > 0 {
            info!(removed, "Qdrant GC removed dangling points");
        }
        Ok(removed)
    }
}

/// Extension helpers matching the payload value shapes we store
trait PayloadValueExt {
    fn as_str(&self) -> Option<&str>;
    fn as_integer(&self) -> Option<i64>;
}

impl PayloadValueExt for qdrant_client::qdrant::Value {
    fn as_str(&self) -> Option<&str> {
        match &self.kind {
            Some(Kind::StringValue(s)) => Some(s),
            _ => None,
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match &self.kind {
            Some(Kind::IntegerValue(i)) => Some(*i),
            Some(Kind::DoubleValue(d)) => Some(*d as i64),
            _ => None,
        }
    }
}
