// src/cache/mod.rs
// In-process caches for embeddings and search results. This is the L1 the
// rest of the system treats as authoritative; any external L2 is additive.

use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::search::Hit;

const EMBEDDING_CAPACITY: u64 = 4096;
const EMBEDDING_TTL: Duration = Duration::from_secs(3600);
const SEARCH_CAPACITY: u64 = 1024;
const SEARCH_TTL: Duration = Duration::from_secs(600);

/// Hit/miss counters for observability
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

/// Shared cache layer for the retrieval pipeline
pub struct CacheService {
    embeddings: Cache<String, Arc<Vec<f32>>>,
    search_results: Cache<String, Arc<Vec<Hit>>>,
    pub embedding_metrics: CacheMetrics,
    pub search_metrics: CacheMetrics,
}

impl CacheService {
    pub fn new() -> Self {
        Self {
            embeddings: Cache::builder()
                .max_capacity(EMBEDDING_CAPACITY)
                .time_to_live(EMBEDDING_TTL)
                .build(),
            search_results: Cache::builder()
                .max_capacity(SEARCH_CAPACITY)
                .time_to_live(SEARCH_TTL)
                .build(),
            embedding_metrics: CacheMetrics::default(),
            search_metrics: CacheMetrics::default(),
        }
    }

    fn hash_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get_embedding(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        let result = self.embeddings.get(&Self::hash_key(text)).await;
        match &result {
            Some(_) => self.embedding_metrics.record_hit(),
            None => self.embedding_metrics.record_miss(),
        }
        result
    }

    pub async fn put_embedding(&self, text: &str, embedding: Vec<f32>) {
        self.embeddings
            .insert(Self::hash_key(text), Arc::new(embedding))
            .await;
    }

    /// Search results keyed by query + project set + filter fingerprint
    pub fn search_key(query: &str, project_ids: &[i64], filters_fingerprint: &str) -> String {
        Self::hash_key(&format!("{}|{:?}|{}", query, project_ids, filters_fingerprint))
    }

    pub async fn get_search(&self, key: &str) -> Option<Arc<Vec<Hit>>> {
        let result = self.search_results.get(key).await;
        match &result {
            Some(_) => self.search_metrics.record_hit(),
            None => self.search_metrics.record_miss(),
        }
        result
    }

    pub async fn put_search(&self, key: String, hits: Vec<Hit>) {
        self.search_results.insert(key, Arc::new(hits)).await;
    }

    /// Drop cached search results (called after re-indexing)
    pub fn invalidate_search(&self) {
        self.search_results.invalidate_all();
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_roundtrip() {
        let cache = CacheService::new();
        assert!(cache.get_embedding("hello").await.is_none());
        cache.put_embedding("hello", vec![0.1, 0.2]).await;
        let hit = cache.get_embedding("hello").await.unwrap();
        assert_eq!(hit.as_slice(), &[0.1, 0.2]);
        assert_eq!(cache.embedding_metrics.hits(), 1);
        assert_eq!(cache.embedding_metrics.misses(), 1);
    }

    #[test]
    fn test_search_key_varies_with_inputs() {
        let a = CacheService::search_key("q", &[1, 2], "");
        let b = CacheService::search_key("q", &[1, 3], "");
        let c = CacheService::search_key("q2", &[1, 2], "");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, CacheService::search_key("q", &[1, 2], ""));
    }

    #[test]
    fn test_hit_rate_math() {
        let metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_rate(), 0.0);
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert!((metrics.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
