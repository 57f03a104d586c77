// src/search/git_history.rs
// Git history search for commit:/blame: queries and the git tools.

use git2::{BlameOptions, Repository};
use std::path::Path;

use super::Hit;
use crate::db::ChunkMetadata;
use crate::error::Result;

/// How many commits a message search will walk before giving up
const MAX_WALK: usize = 5000;

pub struct GitHistorySearcher {
    repo: Repository,
}

/// One matching commit
#[derive(Debug, Clone)]
pub struct CommitMatch {
    pub id: String,
    pub summary: String,
    pub author: String,
    pub time: i64,
}

/// Blame info for one line
#[derive(Debug, Clone)]
pub struct BlameLine {
    pub commit_id: String,
    pub author: String,
    pub line: usize,
    pub summary: String,
}

impl GitHistorySearcher {
    pub fn open(repo_path: &Path) -> Result<Self> {
        Ok(Self {
            repo: Repository::discover(repo_path)?,
        })
    }

    /// Walk history matching `term` against commit summaries and authors.
    pub fn search_commits(&self, term: &str, limit: usize) -> Result<Vec<CommitMatch>> {
        let term = term.to_lowercase();
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;

        let mut matches = Vec::new();
        for (walked, oid) in walk.flatten().enumerate() {
            if walked >= MAX_WALK || matches.len() >= limit {
                break;
            }
            let commit = match self.repo.find_commit(oid) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let summary = commit.summary().unwrap_or("").to_string();
            let author = commit.author().name().unwrap_or("").to_string();
            if summary.to_lowercase().contains(&term) || author.to_lowercase().contains(&term) {
                matches.push(CommitMatch {
                    id: oid.to_string(),
                    summary,
                    author,
                    time: commit.time().seconds(),
                });
            }
        }
        Ok(matches)
    }

    /// Blame one line of a file.
    pub fn blame_line(&self, file: &str, line: usize) -> Result<Option<BlameLine>> {
        let mut options = BlameOptions::new();
        options.min_line(line).max_line(line);
        let blame = self.repo.blame_file(Path::new(file), Some(&mut options))?;

        let Some(hunk) = blame.get_line(line) else {
            return Ok(None);
        };
        let commit_id = hunk.final_commit_id();
        let summary = self
            .repo
            .find_commit(commit_id)
            .ok()
            .and_then(|c| c.summary().map(String::from))
            .unwrap_or_default();

        Ok(Some(BlameLine {
            commit_id: commit_id.to_string(),
            author: hunk
                .final_signature()
                .name()
                .unwrap_or("unknown")
                .to_string(),
            line,
            summary,
        }))
    }
}

/// Render commit matches as search hits (git hits have no chunk identity).
pub fn commits_to_hits(matches: Vec<CommitMatch>) -> Vec<Hit> {
    matches
        .into_iter()
        .map(|m| Hit {
            hit_type: "git_commit".into(),
            score: 1.0,
            document_id: 0,
            chunk_id: None,
            content: format!("{} {} ({})", &m.id[..12.min(m.id.len())], m.summary, m.author),
            metadata: ChunkMetadata::default(),
            search_type: "git".into(),
        })
        .collect()
}

/// Compact commit list for tool output
pub fn commits_brief(matches: &[CommitMatch]) -> serde_json::Value {
    serde_json::Value::Array(
        matches
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": &m.id[..12.min(m.id.len())],
                    "summary": m.summary,
                    "author": m.author,
                    "time": m.time,
                })
            })
            .collect(),
    )
}

/// Compact blame record for tool output
pub fn blame_to_hits_content(blame: Option<BlameLine>, file: &str) -> serde_json::Value {
    match blame {
        Some(b) => serde_json::json!({
            "file": file,
            "line": b.line,
            "commit": &b.commit_id[..12.min(b.commit_id.len())],
            "author": b.author,
            "summary": b.summary,
        }),
        None => serde_json::Value::Null,
    }
}

pub fn blame_to_hits(blame: Option<BlameLine>, file: &str) -> Vec<Hit> {
    let Some(blame) = blame else {
        return Vec::new();
    };
    vec![Hit {
        hit_type: "git_blame".into(),
        score: 1.0,
        document_id: 0,
        chunk_id: None,
        content: format!(
            "{}:{} last changed by {} in {} ({})",
            file,
            blame.line,
            blame.author,
            &blame.commit_id[..12.min(blame.commit_id.len())],
            blame.summary
        ),
        metadata: ChunkMetadata {
            file_path: file.to_string(),
            start_line: Some(blame.line as i32),
            end_line: Some(blame.line as i32),
            ..Default::default()
        },
        search_type: "git".into(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blame_to_hits_empty() {
        assert!(blame_to_hits(None, "src/a.rs").is_empty());
    }

    #[test]
    fn test_blame_to_hits_format() {
        let hits = blame_to_hits(
            Some(BlameLine {
                commit_id: "abcdef1234567890".into(),
                author: "dev".into(),
                line: 7,
                summary: "tighten retries".into(),
            }),
            "src/llm/http.rs",
        );
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("abcdef123456"));
        assert!(hits[0].content.contains("dev"));
        assert_eq!(hits[0].metadata.start_line, Some(7));
        assert_eq!(hits[0].search_type, "git");
    }

    #[test]
    fn test_commits_to_hits_format() {
        let hits = commits_to_hits(vec![CommitMatch {
            id: "0123456789abcdef".into(),
            summary: "fix auth bug".into(),
            author: "dev".into(),
            time: 0,
        }]);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("fix auth bug"));
        assert!(hits[0].chunk_id.is_none());
    }
}
