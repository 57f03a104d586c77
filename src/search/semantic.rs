// src/search/semantic.rs
// Semantic modality: embed the query, ANN-search the vector store, apply
// metadata filters.

use std::sync::Arc;
use tracing::debug;

use super::{Hit, SearchFilters};
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::vector::VectorStore;

/// Run the semantic modality. Fetches limit*2 candidates so metadata filters
/// have room to discard.
pub async fn semantic_search(
    vector_store: &Arc<VectorStore>,
    embeddings: &Arc<EmbeddingClient>,
    query: &str,
    project_ids: &[i64],
    filters: Option<&SearchFilters>,
    limit: usize,
) -> Result<Vec<Hit>> {
    let query_embedding = embeddings.embed(query).await?;

    let candidates = vector_store
        .search(&query_embedding, limit * 2, Some(project_ids), None)
        .await?;

    let mut hits: Vec<Hit> = candidates
        .into_iter()
        .filter(|hit| matches_filters(&hit.metadata.file_path, hit.metadata.language.as_deref(), filters))
        .take(limit)
        .map(|hit| Hit {
            hit_type: "semantic".into(),
            score: hit.score,
            document_id: hit.document_id,
            chunk_id: Some(hit.chunk_id),
            content: hit.content,
            metadata: hit.metadata,
            search_type: "semantic".into(),
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    debug!(count = hits.len(), "Semantic search");
    Ok(hits)
}

/// Language / file-type / path-pattern filters applied to candidates.
fn matches_filters(file_path: &str, language: Option<&str>, filters: Option<&SearchFilters>) -> bool {
    let Some(filters) = filters else {
        return true;
    };

    if let Some(want) = &filters.language {
        if language != Some(want.as_str()) {
            return false;
        }
    }
    if filters.file_type.as_deref() == Some("test") && !file_path.to_lowercase().contains("test") {
        return false;
    }
    if let Some(pattern) = &filters.file_path_pattern {
        if !glob_matches(pattern, file_path) {
            return false;
        }
    }
    true
}

/// Minimal glob support: `**/*.ext` (any path with the extension), `*.ext`,
/// and plain substring for everything else.
pub(crate) fn glob_matches(pattern: &str, path: &str) -> bool {
    if let Some(ext) = pattern.strip_prefix("**/*.") {
        return path.ends_with(&format!(".{}", ext));
    }
    if let Some(ext) = pattern.strip_prefix("*.") {
        return path.ends_with(&format!(".{}", ext)) && !path.contains('/');
    }
    path.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matches_doc_pattern() {
        assert!(glob_matches("**/*.md", "docs/setup.md"));
        assert!(glob_matches("**/*.md", "README.md"));
        assert!(!glob_matches("**/*.md", "src/main.rs"));
    }

    #[test]
    fn test_glob_matches_top_level() {
        assert!(glob_matches("*.toml", "Cargo.toml"));
        assert!(!glob_matches("*.toml", "config/dev.toml"));
    }

    #[test]
    fn test_glob_substring_fallback() {
        assert!(glob_matches("src/api", "src/api/ws/chat.rs"));
        assert!(!glob_matches("src/api", "tests/api.rs"));
    }

    #[test]
    fn test_filters() {
        let filters = SearchFilters {
            language: Some("rust".into()),
            file_type: None,
            file_path_pattern: None,
        };
        assert!(matches_filters("src/a.rs", Some("rust"), Some(&filters)));
        assert!(!matches_filters("src/a.py", Some("python"), Some(&filters)));
        assert!(matches_filters("anything", None, None));

        let test_filter = SearchFilters {
            language: None,
            file_type: Some("test".into()),
            file_path_pattern: None,
        };
        assert!(matches_filters("tests/auth_test.rs", None, Some(&test_filter)));
        assert!(!matches_filters("src/auth.rs", None, Some(&test_filter)));
    }
}
