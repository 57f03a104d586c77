// src/search/mod.rs
// Hybrid retrieval: query-type-adaptive fusion of semantic, keyword and
// structural modalities, with structural-prefix dispatch to git history and
// static analysis.

mod analyzer;
mod git_history;
mod keyword;
mod query_type;
mod semantic;
mod structural;

pub use analyzer::StaticAnalyzer;
pub use git_history::{
    BlameLine, CommitMatch, GitHistorySearcher, blame_to_hits_content, commits_brief,
};
pub use keyword::{expand_terms, keyword_search};
pub use query_type::{QueryType, SearchWeights, WeightTable, detect_query_type};
pub use semantic::semantic_search;
pub use structural::{StructuralQuery, parse_query};

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::cache::CacheService;
use crate::db::ChunkMetadata;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::vector::VectorStore;

/// One search result. Internal modality scores are already blended; the hit
/// carries only the final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "type")]
    pub hit_type: String,
    pub score: f32,
    pub document_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<i64>,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub search_type: String,
}

/// Optional filters narrowing all modalities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub language: Option<String>,
    /// "test" narrows to test files
    pub file_type: Option<String>,
    pub file_path_pattern: Option<String>,
}

impl SearchFilters {
    fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.language.as_deref().unwrap_or(""),
            self.file_type.as_deref().unwrap_or(""),
            self.file_path_pattern.as_deref().unwrap_or("")
        )
    }
}

/// Which modalities to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchModality {
    Semantic,
    Keyword,
    Structural,
}

/// Hybrid search over all modalities
pub struct HybridSearch {
    pool: PgPool,
    vector_store: Arc<VectorStore>,
    embeddings: Option<Arc<EmbeddingClient>>,
    analyzer: StaticAnalyzer,
    weights: WeightTable,
    /// Result cache for the fused path (structural dispatches bypass it)
    cache: Option<Arc<CacheService>>,
    /// Root used to resolve project repositories for commit:/blame:
    repo_root: PathBuf,
}

impl HybridSearch {
    pub fn new(
        pool: PgPool,
        vector_store: Arc<VectorStore>,
        embeddings: Option<Arc<EmbeddingClient>>,
        analyzer: StaticAnalyzer,
        repo_root: PathBuf,
    ) -> Self {
        Self {
            pool,
            vector_store,
            embeddings,
            analyzer,
            weights: WeightTable::default(),
            cache: None,
            repo_root,
        }
    }

    /// Install weight overrides from runtime config (`search_weights` key).
    pub fn with_weight_overrides(mut self, overrides: &serde_json::Value) -> Self {
        self.weights = WeightTable::from_overrides(overrides);
        self
    }

    /// Cache fused results per (query, projects, filters).
    pub fn with_cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Execute hybrid search across the requested modalities.
    pub async fn search(
        &self,
        query: &str,
        project_ids: &[i64],
        filters: Option<SearchFilters>,
        limit: usize,
        search_types: Option<Vec<SearchModality>>,
    ) -> Result<Vec<Hit>> {
        let mut query = query.to_string();
        let mut filters = filters;
        let mut search_types = search_types.unwrap_or_else(|| {
            vec![
                SearchModality::Semantic,
                SearchModality::Keyword,
                SearchModality::Structural,
            ]
        });

        let query_type = detect_query_type(&query);
        let weights = self.weights.weights_for(query_type);
        info!(
            query_type = query_type.as_str(),
            semantic = weights.semantic,
            keyword = weights.keyword,
            structural = weights.structural,
            "Query type detected"
        );

        // Structural prefixes can redirect the whole search
        let structural_parsed = parse_query(&query);
        if let Some(parsed) = &structural_parsed {
            match parsed {
                StructuralQuery::Commit { term } => {
                    return self.git_commits(project_ids, term, limit).await;
                }
                StructuralQuery::Blame { file, line } => {
                    return self.git_blame(project_ids, file, *line).await;
                }
                StructuralQuery::Doc { term } => {
                    // Doc queries drop the structural modality entirely and
                    // narrow to markdown. Structurally-meaningful doc hits
                    // are lost with it; kept for parity with the original
                    // ranking behavior.
                    query = term.clone();
                    let mut f = filters.unwrap_or_default();
                    f.file_path_pattern = Some("**/*.md".into());
                    filters = Some(f);
                    search_types = vec![SearchModality::Semantic, SearchModality::Keyword];
                }
                StructuralQuery::Lint { term } => {
                    return self.analyzer.run(term).await;
                }
                _ => {
                    search_types = vec![SearchModality::Structural];
                }
            }
        }

        // The fused path is cacheable; dispatches above are not
        let cache_key = self.cache.as_ref().map(|cache| {
            let fingerprint = filters.as_ref().map(|f| f.fingerprint()).unwrap_or_default();
            CacheService::search_key(&query, project_ids, &fingerprint)
        });
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(cached) = cache.get_search(key).await {
                return Ok(cached.as_ref().clone());
            }
        }

        // Run the modalities in parallel; each degrades to empty on failure.
        let semantic_fut = async {
            if !search_types.contains(&SearchModality::Semantic) {
                return Vec::new();
            }
            let Some(embeddings) = &self.embeddings else {
                return Vec::new();
            };
            match semantic::semantic_search(
                &self.vector_store,
                embeddings,
                &query,
                project_ids,
                filters.as_ref(),
                limit,
            )
            .await
            {
                Ok(mut hits) => {
                    for hit in &mut hits {
                        hit.score *= weights.semantic;
                    }
                    hits
                }
                Err(e) => {
                    error!("Semantic search failed: {}", e);
                    Vec::new()
                }
            }
        };

        let keyword_fut = async {
            if !search_types.contains(&SearchModality::Keyword) {
                return Vec::new();
            }
            match keyword::keyword_search(&self.pool, &query, project_ids, filters.as_ref(), limit)
                .await
            {
                Ok(mut hits) => {
                    for hit in &mut hits {
                        hit.score *= weights.keyword;
                    }
                    hits
                }
                Err(e) => {
                    error!("Keyword search failed: {}", e);
                    Vec::new()
                }
            }
        };

        let structural_fut = async {
            if !search_types.contains(&SearchModality::Structural) {
                return Vec::new();
            }
            let Some(parsed) = &structural_parsed else {
                return Vec::new();
            };
            match structural::search(&self.pool, parsed, project_ids, filters.as_ref(), limit).await
            {
                Ok(mut hits) => {
                    for hit in &mut hits {
                        hit.score *= weights.structural;
                    }
                    hits
                }
                Err(e) => {
                    error!("Structural search failed: {}", e);
                    Vec::new()
                }
            }
        };

        let (semantic_hits, keyword_hits, structural_hits) =
            tokio::join!(semantic_fut, keyword_fut, structural_fut);

        let mut all = semantic_hits;
        all.extend(keyword_hits);
        all.extend(structural_hits);

        let ranked = rank_and_dedupe(all, limit);
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.put_search(key, ranked.clone()).await;
        }
        Ok(ranked)
    }

    fn project_repo_path(&self, project_ids: &[i64]) -> PathBuf {
        // The first project is the primary one for git dispatch
        let id = project_ids.first().copied().unwrap_or(0);
        self.repo_root.join(format!("project_{}", id))
    }

    /// Git work is blocking; it runs on the blocking pool.
    async fn git_commits(&self, project_ids: &[i64], term: &str, limit: usize) -> Result<Vec<Hit>> {
        let path = self.project_repo_path(project_ids);
        let term = term.to_string();
        let matches = tokio::task::spawn_blocking(move || {
            GitHistorySearcher::open(&path)?.search_commits(&term, limit)
        })
        .await??;
        Ok(git_history::commits_to_hits(matches))
    }

    async fn git_blame(&self, project_ids: &[i64], file: &str, line: i64) -> Result<Vec<Hit>> {
        let path = self.project_repo_path(project_ids);
        let file_owned = file.to_string();
        let blame = tokio::task::spawn_blocking(move || {
            GitHistorySearcher::open(&path)?.blame_line(&file_owned, line as usize)
        })
        .await??;
        Ok(git_history::blame_to_hits(blame, file))
    }
}

/// Dedup key: document, chunk and a content prefix (mirrors chunk identity
/// even for hits without chunk ids).
fn dedup_key(hit: &Hit) -> String {
    let prefix: String = hit.content.chars().take(100).collect();
    let digest = md5::compute(format!(
        "{}:{}:{}",
        hit.document_id,
        hit.chunk_id.unwrap_or(0),
        prefix
    ));
    format!("{:x}", digest)
}

/// Fuse, deduplicate and rank hits. Duplicates keep the max score; a hit
/// confirmed by more than one modality is labeled `hybrid`. The result set's
/// search_type is `hybrid` when any semantic hit contributed, else `keyword`.
pub fn rank_and_dedupe(hits: Vec<Hit>, limit: usize) -> Vec<Hit> {
    let any_semantic = hits.iter().any(|h| h.hit_type == "semantic");

    let mut grouped: HashMap<String, Hit> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for hit in hits {
        let key = dedup_key(&hit);
        match grouped.get_mut(&key) {
            Some(existing) => {
                if hit.score > existing.score {
                    existing.score = hit.score;
                }
                if existing.hit_type != hit.hit_type {
                    existing.hit_type = "hybrid".into();
                }
            }
            None => {
                grouped.insert(key.clone(), hit);
                order.push(key);
            }
        }
    }

    let overall = if any_semantic { "hybrid" } else { "keyword" };
    let mut ranked: Vec<Hit> = order
        .into_iter()
        .filter_map(|key| grouped.remove(&key))
        .map(|mut hit| {
            hit.search_type = overall.to_string();
            hit
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}
