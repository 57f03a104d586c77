// src/search/structural.rs
// Structural search: prefix grammar over symbols, files, lines and imports.
// Exact symbol-name match scores 1.0, prefix 0.9, substring 0.7.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{Hit, SearchFilters};
use crate::db::ChunkMetadata;
use crate::error::Result;

/// Parsed structural query
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralQuery {
    Symbol {
        term: String,
        /// function/class/method/interface/type when a prefix named one
        symbol_type: Option<String>,
    },
    File {
        term: String,
    },
    Line {
        file: String,
        line: i64,
    },
    Import {
        term: String,
    },
    Commit {
        term: String,
    },
    Blame {
        file: String,
        line: i64,
    },
    Doc {
        term: String,
    },
    Lint {
        term: String,
    },
}

static PREFIXED: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)^(func(?:tion)?|class|method|interface|type|import|commit|doc|lint|file):(.+)$")
        .unwrap()
});
static BLAME: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)^blame:(.+):(\d+)$").unwrap()
});
static FILE_LINE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(.+):(\d+)$").unwrap()
});
static CAPITAL_CASE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Z]\w*$").unwrap()
});
static SNAKE_CASE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z]+_\w+$").unwrap()
});
static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z]+[A-Z]\w*$").unwrap()
});

/// Parse a structural query. Bare identifiers in CapitalCase, snake_case or
/// camelCase count as symbol lookups.
pub fn parse_query(query: &str) -> Option<StructuralQuery> {
    let query = query.trim();

    if let Some(caps) = BLAME.captures(query) {
        return Some(StructuralQuery::Blame {
            file: caps[1].trim().to_string(),
            line: caps[2].parse().ok()?,
        });
    }

    if let Some(caps) = PREFIXED.captures(query) {
        let prefix = caps[1].to_lowercase();
        let term = caps[2].trim().to_string();
        return Some(match prefix.as_str() {
            "func" | "function" => StructuralQuery::Symbol {
                term,
                symbol_type: Some("function".into()),
            },
            "class" | "method" | "interface" | "type" => StructuralQuery::Symbol {
                term,
                symbol_type: Some(prefix),
            },
            "import" => StructuralQuery::Import { term },
            "commit" => StructuralQuery::Commit { term },
            "doc" => StructuralQuery::Doc { term },
            "lint" => StructuralQuery::Lint { term },
            "file" => StructuralQuery::File { term },
            _ => return None,
        });
    }

    if let Some(caps) = FILE_LINE.captures(query) {
        // Avoid swallowing prose with a trailing number; the left side must
        // look like a path
        let file = caps[1].trim();
        if !file.contains(' ') {
            return Some(StructuralQuery::Line {
                file: file.to_string(),
                line: caps[2].parse().ok()?,
            });
        }
    }

    if CAPITAL_CASE.is_match(query) || SNAKE_CASE.is_match(query) || CAMEL_CASE.is_match(query) {
        return Some(StructuralQuery::Symbol {
            term: query.to_string(),
            symbol_type: None,
        });
    }

    None
}

/// Run the structural modality against the relational store.
pub async fn search(
    pool: &PgPool,
    parsed: &StructuralQuery,
    project_ids: &[i64],
    filters: Option<&SearchFilters>,
    limit: usize,
) -> Result<Vec<Hit>> {
    match parsed {
        StructuralQuery::Symbol { term, symbol_type } => {
            search_symbols(pool, term, symbol_type.as_deref(), project_ids, filters, limit).await
        }
        StructuralQuery::File { term } => search_files(pool, term, project_ids, limit).await,
        StructuralQuery::Line { file, line } => {
            search_line(pool, file, *line, project_ids).await
        }
        StructuralQuery::Import { term } => search_imports(pool, term, project_ids, limit).await,
        // commit/blame/doc/lint are dispatched by the hybrid layer
        _ => Ok(Vec::new()),
    }
}

fn symbol_score(symbol_name: &str, term: &str) -> f32 {
    let name = symbol_name.to_lowercase();
    let term = term.to_lowercase();
    if name == term {
        1.0
    } else if name.starts_with(&term) {
        0.9
    } else {
        0.7
    }
}

async fn search_symbols(
    pool: &PgPool,
    term: &str,
    symbol_type: Option<&str>,
    project_ids: &[i64],
    filters: Option<&SearchFilters>,
    limit: usize,
) -> Result<Vec<Hit>> {
    let pattern = format!("%{}%", term);
    let mut sql = String::from(
        r#"SELECT c.id AS chunk_id, c.document_id, c.content, c.symbol_name, c.symbol_type,
                  c.start_line, c.end_line, d.file_path, d.language
           FROM chunks c JOIN documents d ON d.id = c.document_id
           WHERE d.project_id = ANY($1) AND c.symbol_name ILIKE $2"#,
    );
    if symbol_type.is_some() {
        sql.push_str(" AND c.symbol_type = $3");
    }
    if filters.and_then(|f| f.language.as_deref()).is_some() {
        sql.push_str(if symbol_type.is_some() {
            " AND d.language = $4"
        } else {
            " AND d.language = $3"
        });
    }
    sql.push_str(" LIMIT 200");

    let mut query = sqlx::query(&sql).bind(project_ids).bind(&pattern);
    if let Some(st) = symbol_type {
        query = query.bind(st);
    }
    if let Some(lang) = filters.and_then(|f| f.language.as_deref()) {
        query = query.bind(lang);
    }

    let rows = query.fetch_all(pool).await?;
    let mut hits: Vec<Hit> = rows
        .into_iter()
        .map(|row| {
            let symbol_name: Option<String> = row.try_get("symbol_name")?;
            let score = symbol_name
                .as_deref()
                .map(|name| symbol_score(name, term))
                .unwrap_or(0.7);
            Ok(Hit {
                hit_type: "structural_symbol".into(),
                score,
                document_id: row.try_get("document_id")?,
                chunk_id: Some(row.try_get("chunk_id")?),
                content: row.try_get("content")?,
                metadata: ChunkMetadata {
                    file_path: row.try_get("file_path")?,
                    language: row.try_get("language")?,
                    symbol_name,
                    symbol_type: row.try_get("symbol_type")?,
                    start_line: row.try_get("start_line")?,
                    end_line: row.try_get("end_line")?,
                    ..Default::default()
                },
                search_type: "structural".into(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    debug!(term = %term, count = hits.len(), "Structural symbol search");
    Ok(hits)
}

async fn search_files(
    pool: &PgPool,
    term: &str,
    project_ids: &[i64],
    limit: usize,
) -> Result<Vec<Hit>> {
    let pattern = format!("%{}%", term);
    let rows = sqlx::query(
        r#"SELECT DISTINCT ON (d.id) d.id AS document_id, d.file_path, d.language,
                  c.id AS chunk_id, c.content, c.start_line, c.end_line
           FROM documents d
           LEFT JOIN chunks c ON c.document_id = d.id
           WHERE d.project_id = ANY($1) AND d.file_path ILIKE $2
           ORDER BY d.id, c.start_line
           LIMIT $3"#,
    )
    .bind(project_ids)
    .bind(&pattern)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<Hit> = rows
        .into_iter()
        .map(|row| {
            let file_path: String = row.try_get("file_path")?;
            let score = if file_path
                .to_lowercase()
                .ends_with(&format!("/{}", term.to_lowercase()))
            {
                1.0
            } else {
                0.8
            };
            Ok(Hit {
                hit_type: "structural_file".into(),
                score,
                document_id: row.try_get("document_id")?,
                chunk_id: row.try_get("chunk_id").ok(),
                content: row.try_get::<Option<String>, _>("content")?.unwrap_or_default(),
                metadata: ChunkMetadata {
                    file_path,
                    language: row.try_get("language")?,
                    start_line: row.try_get("start_line").ok(),
                    end_line: row.try_get("end_line").ok(),
                    ..Default::default()
                },
                search_type: "structural".into(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(hits)
}

async fn search_line(
    pool: &PgPool,
    file: &str,
    line: i64,
    project_ids: &[i64],
) -> Result<Vec<Hit>> {
    let pattern = format!("%{}%", file);
    let row = sqlx::query(
        r#"SELECT c.id AS chunk_id, c.document_id, c.content, c.symbol_name, c.symbol_type,
                  c.start_line, c.end_line, d.file_path, d.language
           FROM chunks c JOIN documents d ON d.id = c.document_id
           WHERE d.project_id = ANY($1) AND d.file_path LIKE $2
             AND c.start_line <= $3 AND c.end_line >= $3
           LIMIT 1"#,
    )
    .bind(project_ids)
    .bind(&pattern)
    .bind(line as i32)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(Vec::new());
    };

    Ok(vec![Hit {
        hit_type: "structural_line".into(),
        score: 1.0,
        document_id: row.try_get("document_id")?,
        chunk_id: Some(row.try_get("chunk_id")?),
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
        search_type: "structural".into(),
    }])
}

/// Imports are matched against header chunks (the chunker labels the leading
/// import block with symbol_type 'header').
async fn search_imports(
    pool: &PgPool,
    term: &str,
    project_ids: &[i64],
    limit: usize,
) -> Result<Vec<Hit>> {
    let pattern = format!("%{}%", term);
    let rows = sqlx::query(
        r#"SELECT c.id AS chunk_id, c.document_id, c.content, c.start_line, c.end_line,
                  d.file_path, d.language
           FROM chunks c JOIN documents d ON d.id = c.document_id
           WHERE d.project_id = ANY($1) AND c.symbol_type = 'header' AND c.content ILIKE $2
           LIMIT $3"#,
    )
    .bind(project_ids)
    .bind(&pattern)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(Hit {
                hit_type: "structural_import".into(),
                score: 0.9,
                document_id: row.try_get("document_id")?,
                chunk_id: Some(row.try_get("chunk_id")?),
                content: row.try_get("content")?,
                metadata: ChunkMetadata {
                    file_path: row.try_get("file_path")?,
                    language: row.try_get("language")?,
                    symbol_type: Some("header".into()),
                    start_line: row.try_get("start_line")?,
                    end_line: row.try_get("end_line")?,
                    ..Default::default()
                },
                search_type: "structural".into(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol_prefixes() {
        assert_eq!(
            parse_query("func:parse_config"),
            Some(StructuralQuery::Symbol {
                term: "parse_config".into(),
                symbol_type: Some("function".into())
            })
        );
        assert_eq!(
            parse_query("function:Handle"),
            Some(StructuralQuery::Symbol {
                term: "Handle".into(),
                symbol_type: Some("function".into())
            })
        );
        assert_eq!(
            parse_query("class:UserService"),
            Some(StructuralQuery::Symbol {
                term: "UserService".into(),
                symbol_type: Some("class".into())
            })
        );
        assert_eq!(
            parse_query("method:authenticate"),
            Some(StructuralQuery::Symbol {
                term: "authenticate".into(),
                symbol_type: Some("method".into())
            })
        );
    }

    #[test]
    fn test_parse_blame_and_line() {
        assert_eq!(
            parse_query("blame:src/auth.rs:42"),
            Some(StructuralQuery::Blame {
                file: "src/auth.rs".into(),
                line: 42
            })
        );
        assert_eq!(
            parse_query("src/auth.rs:42"),
            Some(StructuralQuery::Line {
                file: "src/auth.rs".into(),
                line: 42
            })
        );
        // Prose with a trailing number is not a file:line query
        assert_eq!(parse_query("how do I fix error: 42"), None);
    }

    #[test]
    fn test_parse_doc_commit_lint_file() {
        assert_eq!(
            parse_query("doc:configuration"),
            Some(StructuralQuery::Doc {
                term: "configuration".into()
            })
        );
        assert_eq!(
            parse_query("commit:fix auth bug"),
            Some(StructuralQuery::Commit {
                term: "fix auth bug".into()
            })
        );
        assert_eq!(
            parse_query("lint:src/main.rs"),
            Some(StructuralQuery::Lint {
                term: "src/main.rs".into()
            })
        );
        assert_eq!(
            parse_query("file:handlers.rs"),
            Some(StructuralQuery::File {
                term: "handlers.rs".into()
            })
        );
        assert_eq!(
            parse_query("import:tokio"),
            Some(StructuralQuery::Import {
                term: "tokio".into()
            })
        );
    }

    #[test]
    fn test_parse_bare_identifiers() {
        assert_eq!(
            parse_query("UserService"),
            Some(StructuralQuery::Symbol {
                term: "UserService".into(),
                symbol_type: None
            })
        );
        assert_eq!(
            parse_query("parse_config"),
            Some(StructuralQuery::Symbol {
                term: "parse_config".into(),
                symbol_type: None
            })
        );
        assert_eq!(
            parse_query("getUserData"),
            Some(StructuralQuery::Symbol {
                term: "getUserData".into(),
                symbol_type: None
            })
        );
        assert_eq!(parse_query("how does auth work"), None);
        assert_eq!(parse_query("plain"), None);
    }

    #[test]
    fn test_symbol_score_tiers() {
        assert_eq!(symbol_score("authenticate", "authenticate"), 1.0);
        assert_eq!(symbol_score("Authenticate", "authenticate"), 1.0);
        assert_eq!(symbol_score("authenticate_user", "authenticate"), 0.9);
        assert_eq!(symbol_score("user_authenticate", "authenticate"), 0.7);
    }
}
