// src/search/keyword.rs
// Keyword modality: Postgres FTS first, ILIKE fallback scored by TF-IDF with
// a base-score floor. Query terms are expanded through a small fixed synonym
// table before matching.

use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::{Hit, SearchFilters};
use crate::db::ChunkMetadata;
use crate::error::Result;

/// Base score for a LIKE hit before bonuses
const LIKE_BASE_SCORE: f32 = 0.5;
/// Bonus when the whole query appears verbatim in the content
const EXACT_CONTENT_BONUS: f32 = 0.3;
/// Bonus when the query matches the symbol name
const SYMBOL_MATCH_BONUS: f32 = 0.2;
/// Symbol-name hits get this multiplier on their TF-IDF score
const SYMBOL_TFIDF_BOOST: f32 = 1.5;

/// Fixed synonym expansion table
const SYNONYMS: &[(&str, &[&str])] = &[
    ("function", &["func", "method", "def"]),
    ("error", &["exception", "failure"]),
    ("config", &["configuration", "settings"]),
    ("delete", &["remove", "drop"]),
    ("create", &["add", "new"]),
    ("fetch", &["get", "retrieve"]),
    ("auth", &["authentication", "login"]),
    ("test", &["spec", "assert"]),
];

/// Expand query terms with their synonyms, deduplicated, original terms first.
pub fn expand_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for raw in query.split_whitespace() {
        let term: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if term.is_empty() || !seen.insert(term.clone()) {
            continue;
        }
        terms.push(term);
    }

    let originals = terms.clone();
    for term in originals {
        if let Some((_, synonyms)) = SYNONYMS.iter().find(|(k, _)| *k == term) {
            for synonym in *synonyms {
                if seen.insert((*synonym).to_string()) {
                    terms.push((*synonym).to_string());
                }
            }
        }
    }

    terms
}

/// Term frequency in a chunk (whole content scan, case-insensitive)
fn term_frequency(content: &str, term: &str) -> u32 {
    if term.is_empty() {
        return 0;
    }
    content.to_lowercase().matches(term).count() as u32
}

/// Smoothed inverse document frequency
fn inverse_document_frequency(total_docs: u64, doc_frequency: u64) -> f32 {
    if total_docs == 0 {
        return 0.0;
    }
    ((total_docs as f32) / (1.0 + doc_frequency as f32)).ln().max(0.0)
}

/// TF-IDF score for one chunk against the expanded terms, squashed to (0,1).
fn tfidf_score(content: &str, terms: &[String], doc_frequencies: &HashMap<String, u64>, total_docs: u64) -> f32 {
    let raw: f32 = terms
        .iter()
        .map(|term| {
            let tf = term_frequency(content, term) as f32;
            let idf = inverse_document_frequency(total_docs, *doc_frequencies.get(term).unwrap_or(&0));
            tf * idf
        })
        .sum();
    // Squash into (0, 1) so it fuses with the other modalities
    1.0 - (-raw / 4.0).exp()
}

/// Keyword search entry point.
pub async fn keyword_search(
    pool: &PgPool,
    query: &str,
    project_ids: &[i64],
    filters: Option<&SearchFilters>,
    limit: usize,
) -> Result<Vec<Hit>> {
    let mut results = Vec::new();

    match fts_search(pool, query, project_ids, filters, limit).await {
        Ok(hits) => results.extend(hits),
        Err(e) => {
            // Each statement auto-commits; nothing is left aborted for the
            // LIKE pass, we just degrade.
            warn!("Full-text search failed, falling back to LIKE: {}", e);
        }
    }

    if results.len() < limit {
        let remaining = limit - results.len();
        match like_search(pool, query, project_ids, filters, remaining).await {
            Ok(hits) => results.extend(hits),
            Err(e) => warn!("LIKE search failed: {}", e),
        }
    }

    // Deduplicate by (document, chunk)
    let mut seen = HashSet::new();
    results.retain(|hit| seen.insert((hit.document_id, hit.chunk_id)));
    results.truncate(limit);
    Ok(results)
}

/// Strip everything plainto_tsquery would choke on
fn prepare_fts_query(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

async fn fts_search(
    pool: &PgPool,
    query: &str,
    project_ids: &[i64],
    filters: Option<&SearchFilters>,
    limit: usize,
) -> Result<Vec<Hit>> {
    let fts_query = prepare_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        r#"SELECT c.id AS chunk_id, c.document_id, c.content, c.symbol_name, c.symbol_type,
                  c.start_line, c.end_line, d.file_path, d.language,
                  ts_rank(to_tsvector('english', c.content), plainto_tsquery('english', $2)) AS rank
           FROM chunks c JOIN documents d ON d.id = c.document_id
           WHERE d.project_id = ANY($1)
             AND to_tsvector('english', c.content) @@ plainto_tsquery('english', $2)"#,
    );
    if filters.and_then(|f| f.language.as_deref()).is_some() {
        sql.push_str(" AND d.language = $4");
    }
    sql.push_str(" ORDER BY rank DESC LIMIT $3");

    let mut q = sqlx::query(&sql)
        .bind(project_ids)
        .bind(&fts_query)
        .bind(limit as i64);
    if let Some(lang) = filters.and_then(|f| f.language.as_deref()) {
        q = q.bind(lang);
    }

    let rows = q.fetch_all(pool).await?;
    debug!(count = rows.len(), "FTS keyword search");

    rows.into_iter()
        .map(|row| {
            let rank: f32 = row.try_get("rank")?;
            Ok(Hit {
                hit_type: "keyword_fts".into(),
                score: rank.clamp(0.0, 1.0),
                document_id: row.try_get("document_id")?,
                chunk_id: Some(row.try_get("chunk_id")?),
                content: row.try_get("content")?,
                metadata: row_metadata(&row)?,
                search_type: "keyword".into(),
            })
        })
        .collect()
}

async fn like_search(
    pool: &PgPool,
    query: &str,
    project_ids: &[i64],
    filters: Option<&SearchFilters>,
    limit: usize,
) -> Result<Vec<Hit>> {
    let terms = expand_terms(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    // Doc frequencies collected lazily, one count per term for this query
    let total_docs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE project_id = ANY($1)")
            .bind(project_ids)
            .fetch_one(pool)
            .await?;
    let mut doc_frequencies: HashMap<String, u64> = HashMap::new();
    for term in &terms {
        let pattern = format!("%{}%", term);
        let df: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(DISTINCT c.document_id)
               FROM chunks c JOIN documents d ON d.id = c.document_id
               WHERE d.project_id = ANY($1) AND c.content ILIKE $2"#,
        )
        .bind(project_ids)
        .bind(&pattern)
        .fetch_one(pool)
        .await?;
        doc_frequencies.insert(term.clone(), df as u64);
    }

    let mut sql = String::from(
        r#"SELECT c.id AS chunk_id, c.document_id, c.content, c.symbol_name, c.symbol_type,
                  c.start_line, c.end_line, d.file_path, d.language
           FROM chunks c JOIN documents d ON d.id = c.document_id
           WHERE d.project_id = ANY($1)
             AND (c.content ILIKE ANY($2) OR c.symbol_name ILIKE ANY($2) OR d.file_path ILIKE ANY($2))"#,
    );
    if filters.and_then(|f| f.language.as_deref()).is_some() {
        sql.push_str(" AND d.language = $4");
    }
    if filters.is_some_and(|f| f.file_type.as_deref() == Some("test")) {
        sql.push_str(" AND (d.file_path LIKE '%test%' OR d.file_path LIKE '%spec%')");
    }
    sql.push_str(" LIMIT $3");

    let patterns: Vec<String> = terms.iter().map(|t| format!("%{}%", t)).collect();
    let mut q = sqlx::query(&sql)
        .bind(project_ids)
        .bind(&patterns)
        .bind((limit * 3) as i64);
    if let Some(lang) = filters.and_then(|f| f.language.as_deref()) {
        q = q.bind(lang);
    }

    let rows = q.fetch_all(pool).await?;
    let query_lower = query.to_lowercase();

    let mut hits: Vec<Hit> = rows
        .into_iter()
        .map(|row| {
            let content: String = row.try_get("content")?;
            let symbol_name: Option<String> = row.try_get("symbol_name")?;

            let mut base = LIKE_BASE_SCORE;
            if content.to_lowercase().contains(&query_lower) {
                base += EXACT_CONTENT_BONUS;
            }
            let symbol_hit = symbol_name
                .as_deref()
                .is_some_and(|s| {
                    let s = s.to_lowercase();
                    terms.iter().any(|t| s.contains(t))
                });
            if symbol_hit {
                base += SYMBOL_MATCH_BONUS;
            }

            let mut tfidf = tfidf_score(&content, &terms, &doc_frequencies, total_docs as u64);
            if symbol_hit {
                tfidf = (tfidf * SYMBOL_TFIDF_BOOST).min(1.0);
            }

            Ok(Hit {
                hit_type: "keyword_like".into(),
                score: base.max(tfidf).min(1.0),
                document_id: row.try_get("document_id")?,
                chunk_id: Some(row.try_get("chunk_id")?),
                content,
                metadata: ChunkMetadata {
                    file_path: row.try_get("file_path")?,
                    language: row.try_get("language")?,
                    symbol_name,
                    symbol_type: row.try_get("symbol_type")?,
                    start_line: row.try_get("start_line")?,
                    end_line: row.try_get("end_line")?,
                    ..Default::default()
                },
                search_type: "keyword".into(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

fn row_metadata(row: &sqlx::postgres::PgRow) -> Result<ChunkMetadata> {
    Ok(ChunkMetadata {
        file_path: row.try_get("file_path")?,
        language: row.try_get("language")?,
        symbol_name: row.try_get("symbol_name")?,
        symbol_type: row.try_get("symbol_type")?,
        start_line: row.try_get("start_line")?,
        end_line: row.try_get("end_line")?,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_terms_with_synonyms() {
        let terms = expand_terms("function error");
        assert_eq!(terms[0], "function");
        assert_eq!(terms[1], "error");
        assert!(terms.contains(&"func".to_string()));
        assert!(terms.contains(&"method".to_string()));
        assert!(terms.contains(&"def".to_string()));
        assert!(terms.contains(&"exception".to_string()));
    }

    #[test]
    fn test_expand_terms_strips_punctuation_and_dedupes() {
        let terms = expand_terms("parse() parse config!");
        assert_eq!(
            terms.iter().filter(|t| t.as_str() == "parse").count(),
            1
        );
        assert!(terms.contains(&"config".to_string()));
        assert!(terms.contains(&"configuration".to_string()));
    }

    #[test]
    fn test_prepare_fts_query() {
        assert_eq!(prepare_fts_query("fn main() -> i32"), "fn main i32");
        assert_eq!(prepare_fts_query("   "), "");
        assert_eq!(prepare_fts_query("user_id = 5"), "user_id 5");
    }

    #[test]
    fn test_term_frequency() {
        assert_eq!(term_frequency("foo bar foo Foo", "foo"), 3);
        assert_eq!(term_frequency("nothing here", "foo"), 0);
        assert_eq!(term_frequency("x", ""), 0);
    }

    #[test]
    fn test_idf_rare_terms_score_higher() {
        let rare = inverse_document_frequency(1000, 2);
        let common = inverse_document_frequency(1000, 500);
        assert!(rare > common);
        assert_eq!(inverse_document_frequency(0, 0), 0.0);
        // A term in every document is worth nothing
        assert_eq!(inverse_document_frequency(10, 10), 0.0);
    }

    #[test]
    fn test_tfidf_score_bounded() {
        let mut dfs = HashMap::new();
        dfs.insert("retry".to_string(), 3u64);
        let terms = vec!["retry".to_string()];
        let score = tfidf_score("retry retry retry logic", &terms, &dfs, 100);
        assert!(score > 0.0 && score < 1.0);
        let none = tfidf_score("unrelated", &terms, &dfs, 100);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_symbol_boost_caps_at_one() {
        let score: f32 = 0.9 * SYMBOL_TFIDF_BOOST;
        assert_eq!(score.min(1.0), 1.0);
    }
}
