// src/search/analyzer.rs
// lint: queries dispatch to an external static analyzer command. The command
// receives the target as its last argument and its stdout comes back one
// finding per line.

use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use super::Hit;
use crate::db::ChunkMetadata;
use crate::error::Result;

const ANALYZER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct StaticAnalyzer {
    /// Full command line, e.g. "cargo clippy --message-format short"
    command: Option<String>,
}

impl StaticAnalyzer {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }

    /// Run the analyzer against a target; absent configuration degrades to
    /// an empty result.
    pub async fn run(&self, target: &str) -> Result<Vec<Hit>> {
        let Some(command) = &self.command else {
            warn!("lint: query received but no analyzer command is configured");
            return Ok(Vec::new());
        };

        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Ok(Vec::new());
        };
        let args: Vec<&str> = parts.collect();

        let output = tokio::time::timeout(
            ANALYZER_TIMEOUT,
            Command::new(program).args(&args).arg(target).output(),
        )
        .await
        .map_err(|_| crate::error::LoupeError::Retrieval("analyzer timed out".into()))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let hits = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(50)
            .map(|line| Hit {
                hit_type: "lint".into(),
                score: 1.0,
                document_id: 0,
                chunk_id: None,
                content: line.trim().to_string(),
                metadata: ChunkMetadata {
                    file_path: target.to_string(),
                    ..Default::default()
                },
                search_type: "lint".into(),
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_analyzer_is_empty() {
        let analyzer = StaticAnalyzer::new(None);
        assert!(!analyzer.is_configured());
        let hits = analyzer.run("src/main.rs").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_echo_analyzer_produces_hits() {
        let analyzer = StaticAnalyzer::new(Some("echo warning:".into()));
        let hits = analyzer.run("src/main.rs").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("src/main.rs"));
        assert_eq!(hits[0].search_type, "lint");
    }
}
