// src/summarize/mod.rs
// LLM-backed compression of overflow chunks and conversation history, with a
// deterministic fallback. Fixed section headers let the assembler locate and
// truncate summaries downstream.

use std::sync::Arc;
use tracing::warn;

use crate::context::estimate_tokens;
use crate::db::Message;
use crate::llm::{ChatMessage, CompletionRequest, ProviderAdapter};
use crate::search::Hit;

pub const CONTEXT_SUMMARY_HEADER: &str = "## Summary of Additional Context";
pub const HISTORY_SUMMARY_HEADER: &str = "## Previous Conversation Summary";

/// Focus keywords mapped to the areas a summary should emphasize
const FOCUS_AREAS: &[(&str, &[&str])] = &[
    ("error", &["error handling", "exceptions", "debugging"]),
    ("test", &["testing", "unit tests", "test cases"]),
    ("performance", &["optimization", "speed", "efficiency"]),
    ("security", &["authentication", "authorization", "validation"]),
    ("api", &["endpoints", "routes", "requests"]),
    ("database", &["models", "queries", "migrations"]),
    ("config", &["configuration", "settings", "environment"]),
    ("deploy", &["deployment", "production", "scaling"]),
];

pub struct Summarizer {
    adapter: Option<Arc<ProviderAdapter>>,
}

impl Summarizer {
    pub fn new(adapter: Option<Arc<ProviderAdapter>>) -> Self {
        Self { adapter }
    }

    /// Extract up to three focus areas from the query.
    pub fn extract_focus_areas(query: &str) -> Vec<&'static str> {
        let lowered = query.to_lowercase();
        let mut areas = Vec::new();
        for (keyword, focus) in FOCUS_AREAS {
            if lowered.contains(keyword) {
                areas.extend_from_slice(focus);
            }
        }
        areas.truncate(3);
        areas
    }

    /// Compress overflow chunks into a compact Markdown section that keeps
    /// identifiers, paths and symbol kinds.
    pub async fn summarize_overflow_chunks(
        &self,
        chunks: &[Hit],
        query: &str,
        token_budget: u32,
    ) -> String {
        if chunks.is_empty() {
            return String::new();
        }

        if let Some(adapter) = &self.adapter {
            let focus = Self::extract_focus_areas(query);
            let mut prompt = format!(
                "Summarize the following code context in under {} tokens. \
                 Preserve file paths, symbol names and symbol kinds exactly. \
                 The summary supports answering: {}\n",
                token_budget, query
            );
            if !focus.is_empty() {
                prompt.push_str(&format!("Emphasize: {}.\n", focus.join(", ")));
            }
            for chunk in chunks {
                prompt.push_str(&format!(
                    "\n--- {} ---\n{}\n",
                    chunk.metadata.file_path,
                    truncate_chars(&chunk.content, 2000)
                ));
            }

            let request = CompletionRequest::new(vec![
                ChatMessage::system(
                    "You compress code context for retrieval-augmented prompts. Be terse and keep identifiers verbatim.",
                ),
                ChatMessage::user(prompt),
            ])
            .with_max_tokens(token_budget);

            match adapter.complete(request).await {
                Ok(completion) if !completion.text.trim().is_empty() => {
                    return format!("{}\n\n{}", CONTEXT_SUMMARY_HEADER, completion.text.trim());
                }
                Ok(_) => warn!("Summarizer returned empty output, using fallback"),
                Err(e) => warn!("Summarizer LLM call failed, using fallback: {}", e),
            }
        }

        fallback_chunk_summary(chunks, token_budget)
    }

    /// Compress the history prefix that no longer fits the prompt budget.
    pub async fn summarize_history(&self, messages: &[Message], token_budget: u32) -> String {
        if messages.is_empty() {
            return String::new();
        }

        if let Some(adapter) = &self.adapter {
            let mut prompt = format!(
                "Summarize this conversation prefix in under {} tokens. Keep decisions, \
                 constraints and any file or symbol names mentioned.\n\n",
                token_budget
            );
            for message in messages {
                prompt.push_str(&format!(
                    "{}: {}\n",
                    message.role,
                    truncate_chars(&message.content, 1000)
                ));
            }

            let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
                .with_max_tokens(token_budget);

            match adapter.complete(request).await {
                Ok(completion) if !completion.text.trim().is_empty() => {
                    return format!("{}\n\n{}", HISTORY_SUMMARY_HEADER, completion.text.trim());
                }
                Ok(_) => warn!("History summarizer returned empty output, using fallback"),
                Err(e) => warn!("History summarizer failed, using fallback: {}", e),
            }
        }

        fallback_history_summary(messages)
    }
}

/// Deterministic summary: a list of file paths and symbols, trimmed to budget.
fn fallback_chunk_summary(chunks: &[Hit], token_budget: u32) -> String {
    let mut lines = vec![CONTEXT_SUMMARY_HEADER.to_string(), String::new()];
    lines.push("Additional relevant locations not shown in full:".to_string());

    for chunk in chunks {
        let mut line = format!("- {}", chunk.metadata.file_path);
        if let (Some(kind), Some(name)) =
            (&chunk.metadata.symbol_type, &chunk.metadata.symbol_name)
        {
            line.push_str(&format!(" — {} {}", kind, name));
        }
        if let (Some(start), Some(end)) = (chunk.metadata.start_line, chunk.metadata.end_line) {
            line.push_str(&format!(" (lines {}-{})", start, end));
        }
        lines.push(line);

        let text = lines.join("\n");
        if estimate_tokens(&text) > token_budget as u64 {
            lines.pop();
            break;
        }
    }

    lines.join("\n")
}

fn fallback_history_summary(messages: &[Message]) -> String {
    let user_turns = messages.iter().filter(|m| m.role == "user").count();
    let mut out = format!(
        "{}\n\nEarlier conversation ({} messages, {} user turns). Recent topics:",
        HISTORY_SUMMARY_HEADER,
        messages.len(),
        user_turns
    );
    for message in messages.iter().rev().take(3).collect::<Vec<_>>().into_iter().rev() {
        out.push_str(&format!(
            "\n- {}: {}",
            message.role,
            truncate_chars(&message.content, 120)
        ));
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChunkMetadata;

    fn sample_hit(path: &str, symbol: Option<(&str, &str)>) -> Hit {
        Hit {
            hit_type: "semantic".into(),
            score: 0.5,
            document_id: 1,
            chunk_id: Some(1),
            content: "fn sample() {}".into(),
            metadata: ChunkMetadata {
                file_path: path.into(),
                symbol_type: symbol.map(|(k, _)| k.to_string()),
                symbol_name: symbol.map(|(_, n)| n.to_string()),
                start_line: Some(1),
                end_line: Some(3),
                ..Default::default()
            },
            search_type: "hybrid".into(),
        }
    }

    #[test]
    fn test_focus_areas() {
        let areas = Summarizer::extract_focus_areas("why does the api error on deploy");
        assert_eq!(areas.len(), 3);
        assert!(areas.contains(&"error handling"));
        assert!(Summarizer::extract_focus_areas("hello").is_empty());
    }

    #[test]
    fn test_fallback_chunk_summary_has_header_and_symbols() {
        let chunks = vec![
            sample_hit("src/auth.rs", Some(("function", "verify_token"))),
            sample_hit("src/db.rs", None),
        ];
        let summary = fallback_chunk_summary(&chunks, 500);
        assert!(summary.starts_with(CONTEXT_SUMMARY_HEADER));
        assert!(summary.contains("src/auth.rs — function verify_token (lines 1-3)"));
        assert!(summary.contains("src/db.rs"));
    }

    #[test]
    fn test_fallback_chunk_summary_respects_budget() {
        let chunks: Vec<Hit> = (0..200)
            .map(|i| sample_hit(&format!("src/module_{}.rs", i), None))
            .collect();
        let summary = fallback_chunk_summary(&chunks, 50);
        assert!(estimate_tokens(&summary) <= 60);
    }

    #[tokio::test]
    async fn test_no_adapter_uses_fallback() {
        let summarizer = Summarizer::new(None);
        let chunks = vec![sample_hit("src/a.rs", None)];
        let summary = summarizer.summarize_overflow_chunks(&chunks, "query", 200).await;
        assert!(summary.starts_with(CONTEXT_SUMMARY_HEADER));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefgh", 3), "abc…");
    }
}
