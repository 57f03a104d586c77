// src/tools/builtin.rs
// Built-in chat tools. Search-backed tools ride the hybrid retriever; code
// tools go back through the adapter; git tools use the repository directly.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{ChatTool, ToolOutcome, ToolRegistry, ToolRuntime};
use crate::error::ToolErrorKind;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::search::{GitHistorySearcher, SearchModality, blame_to_hits_content, commits_brief};

/// Install the built-in tool set.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(FileSearchTool));
    registry.register(Arc::new(ExplainCodeTool));
    registry.register(Arc::new(GenerateTestsTool));
    registry.register(Arc::new(SimilarCodeTool));
    registry.register(Arc::new(SearchCommitsTool));
    registry.register(Arc::new(GitBlameTool));
    registry.register(Arc::new(AnalyzeCodeQualityTool));
    registry.register(Arc::new(FetchDocumentationTool));
    registry.register(Arc::new(ComprehensiveAnalysisTool));
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn missing(key: &str) -> ToolOutcome {
    ToolOutcome::fail(ToolErrorKind::InvalidArguments, format!("missing required argument '{}'", key))
}

fn hits_json(hits: &[crate::search::Hit], limit: usize) -> Value {
    Value::Array(
        hits.iter()
            .take(limit)
            .map(|h| {
                json!({
                    "file_path": h.metadata.file_path,
                    "score": h.score,
                    "symbol": h.metadata.symbol_name,
                    "start_line": h.metadata.start_line,
                    "end_line": h.metadata.end_line,
                    "content": h.content.chars().take(1500).collect::<String>(),
                })
            })
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Search-backed tools
// ---------------------------------------------------------------------------

struct FileSearchTool;

#[async_trait]
impl ChatTool for FileSearchTool {
    fn name(&self) -> &'static str {
        "file_search"
    }
    fn description(&self) -> &'static str {
        "Search the indexed codebase. Supports plain queries and structural prefixes like func:, class:, file: or doc:."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "limit": {"type": "integer", "description": "Maximum results (default 10)"}
            },
            "required": ["query"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(query) = arg_str(&args, "query") else {
            return missing("query");
        };
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;

        match runtime
            .search
            .search(query, &runtime.project_ids, None, limit, None)
            .await
        {
            Ok(hits) => ToolOutcome::ok(json!({
                "count": hits.len(),
                "results": hits_json(&hits, limit),
            })),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

struct SimilarCodeTool;

#[async_trait]
impl ChatTool for SimilarCodeTool {
    fn name(&self) -> &'static str {
        "similar_code"
    }
    fn description(&self) -> &'static str {
        "Find code semantically similar to a snippet."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "snippet": {"type": "string", "description": "Code to match against"},
                "limit": {"type": "integer"}
            },
            "required": ["snippet"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(snippet) = arg_str(&args, "snippet") else {
            return missing("snippet");
        };
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

        match runtime
            .search
            .search(
                snippet,
                &runtime.project_ids,
                None,
                limit,
                Some(vec![SearchModality::Semantic]),
            )
            .await
        {
            Ok(hits) => ToolOutcome::ok(json!({
                "count": hits.len(),
                "results": hits_json(&hits, limit),
            })),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

struct FetchDocumentationTool;

#[async_trait]
impl ChatTool for FetchDocumentationTool {
    fn name(&self) -> &'static str {
        "fetch_documentation"
    }
    fn description(&self) -> &'static str {
        "Search project documentation (markdown files) for a topic."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": {"type": "string", "description": "Documentation topic"}
            },
            "required": ["topic"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(topic) = arg_str(&args, "topic") else {
            return missing("topic");
        };
        // doc: dispatch narrows to markdown and drops the structural pass
        let query = format!("doc:{}", topic);
        match runtime
            .search
            .search(&query, &runtime.project_ids, None, 8, None)
            .await
        {
            Ok(hits) => ToolOutcome::ok(json!({
                "count": hits.len(),
                "results": hits_json(&hits, 8),
            })),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// LLM-backed tools
// ---------------------------------------------------------------------------

struct ExplainCodeTool;

#[async_trait]
impl ChatTool for ExplainCodeTool {
    fn name(&self) -> &'static str {
        "explain_code"
    }
    fn description(&self) -> &'static str {
        "Explain what a piece of code does."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Code to explain"},
                "language": {"type": "string"}
            },
            "required": ["code"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(code) = arg_str(&args, "code") else {
            return missing("code");
        };
        let language = arg_str(&args, "language").unwrap_or("");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are an expert programmer who explains code clearly and concisely. \
                 Cover purpose, key logic flow and important details.",
            ),
            ChatMessage::user(format!("Explain this {} code:\n\n```{}\n{}\n```", language, language, code)),
        ])
        .with_max_tokens(1024);

        match runtime.adapter.complete(request).await {
            Ok(completion) => ToolOutcome::ok(json!({"explanation": completion.text})),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

struct GenerateTestsTool;

#[async_trait]
impl ChatTool for GenerateTestsTool {
    fn name(&self) -> &'static str {
        "generate_tests"
    }
    fn description(&self) -> &'static str {
        "Generate unit tests for a piece of code."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Code under test"},
                "language": {"type": "string"},
                "framework": {"type": "string", "description": "Test framework to target"}
            },
            "required": ["code"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(code) = arg_str(&args, "code") else {
            return missing("code");
        };
        let language = arg_str(&args, "language").unwrap_or("");
        let framework = arg_str(&args, "framework").unwrap_or("the language's standard test framework");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are a testing expert who writes comprehensive, well-structured unit tests. \
                 Cover all functions and edge cases; add helpful test names.",
            ),
            ChatMessage::user(format!(
                "Generate {} tests for this {} code:\n\n```{}\n{}\n```",
                framework, language, language, code
            )),
        ])
        .with_temperature(0.3)
        .with_max_tokens(2048);

        match runtime.adapter.complete(request).await {
            Ok(completion) => ToolOutcome::ok(json!({"tests": completion.text})),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Git tools
// ---------------------------------------------------------------------------

struct SearchCommitsTool;

#[async_trait]
impl ChatTool for SearchCommitsTool {
    fn name(&self) -> &'static str {
        "search_commits"
    }
    fn description(&self) -> &'static str {
        "Search git history for commits matching a term (message or author)."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "term": {"type": "string", "description": "Text to match"},
                "limit": {"type": "integer"}
            },
            "required": ["term"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(term) = arg_str(&args, "term") else {
            return missing("term");
        };
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;

        let repo_root = runtime.repo_root.clone();
        let term = term.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let searcher = GitHistorySearcher::open(&repo_root)?;
            searcher.search_commits(&term, limit)
        })
        .await;

        match result {
            Ok(Ok(commits)) => ToolOutcome::ok(json!({"commits": commits_brief(&commits)})),
            Ok(Err(e)) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

struct GitBlameTool;

#[async_trait]
impl ChatTool for GitBlameTool {
    fn name(&self) -> &'static str {
        "git_blame"
    }
    fn description(&self) -> &'static str {
        "Find who last changed a specific line of a file."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file": {"type": "string", "description": "Repository-relative file path"},
                "line": {"type": "integer", "description": "1-based line number"}
            },
            "required": ["file", "line"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(file) = arg_str(&args, "file") else {
            return missing("file");
        };
        let Some(line) = args.get("line").and_then(|v| v.as_u64()) else {
            return missing("line");
        };

        let repo_root = runtime.repo_root.clone();
        let file_owned = file.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let searcher = GitHistorySearcher::open(&repo_root)?;
            searcher.blame_line(&file_owned, line as usize)
        })
        .await;

        match result {
            Ok(Ok(blame)) => ToolOutcome::ok(json!({"blame": blame_to_hits_content(blame, file)})),
            Ok(Err(e)) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
            Err(e) => ToolOutcome::fail(ToolErrorKind::ExecutionException, e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis tools
// ---------------------------------------------------------------------------

struct AnalyzeCodeQualityTool;

#[async_trait]
impl ChatTool for AnalyzeCodeQualityTool {
    fn name(&self) -> &'static str {
        "analyze_code_quality"
    }
    fn description(&self) -> &'static str {
        "Heuristic quality report for a code snippet: size, nesting, TODO density, long lines."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Code to analyze"}
            },
            "required": ["code"]
        })
    }
    async fn call(&self, args: Value, _runtime: &ToolRuntime) -> ToolOutcome {
        let Some(code) = arg_str(&args, "code") else {
            return missing("code");
        };
        ToolOutcome::ok(quality_report(code))
    }
}

/// Deterministic quality heuristics shared with comprehensive_analysis
fn quality_report(code: &str) -> Value {
    let lines: Vec<&str> = code.lines().collect();
    let line_count = lines.len();
    let todo_count = lines
        .iter()
        .filter(|l| l.contains("TODO") || l.contains("FIXME") || l.contains("XXX"))
        .count();
    let long_lines = lines.iter().filter(|l| l.len() > 120).count();
    let max_indent = lines
        .iter()
        .map(|l| l.len() - l.trim_start().len())
        .max()
        .unwrap_or(0);
    let comment_lines = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("//") || t.starts_with('#') || t.starts_with("/*")
        })
        .count();

    let mut findings = Vec::new();
    if line_count > 100 {
        findings.push("long unit: consider splitting");
    }
    if todo_count > 0 {
        findings.push("unresolved TODO/FIXME markers");
    }
    if long_lines > 3 {
        findings.push("many overlong lines");
    }
    if max_indent > 24 {
        findings.push("deep nesting");
    }

    json!({
        "lines": line_count,
        "todo_count": todo_count,
        "long_lines": long_lines,
        "max_indent": max_indent,
        "comment_lines": comment_lines,
        "findings": findings,
    })
}

struct ComprehensiveAnalysisTool;

#[async_trait]
impl ChatTool for ComprehensiveAnalysisTool {
    fn name(&self) -> &'static str {
        "comprehensive_analysis"
    }
    fn description(&self) -> &'static str {
        "Combined report for a topic: code search, documentation and commit history."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": {"type": "string", "description": "What to analyze"}
            },
            "required": ["topic"]
        })
    }
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome {
        let Some(topic) = arg_str(&args, "topic") else {
            return missing("topic");
        };

        let code = runtime
            .search
            .search(topic, &runtime.project_ids, None, 5, None)
            .await
            .unwrap_or_default();
        let docs = runtime
            .search
            .search(&format!("doc:{}", topic), &runtime.project_ids, None, 3, None)
            .await
            .unwrap_or_default();

        let repo_root = runtime.repo_root.clone();
        let term = topic.to_string();
        let commits = tokio::task::spawn_blocking(move || {
            GitHistorySearcher::open(&repo_root)
                .and_then(|s| s.search_commits(&term, 5))
                .unwrap_or_default()
        })
        .await
        .unwrap_or_default();

        ToolOutcome::ok(json!({
            "code": hits_json(&code, 5),
            "documentation": hits_json(&docs, 3),
            "commits": commits_brief(&commits),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_report_flags() {
        let clean = quality_report("fn add(a: i32, b: i32) -> i32 {\n    a + b\n}");
        assert_eq!(clean["todo_count"], 0);
        assert!(clean["findings"].as_array().unwrap().is_empty());

        let messy = format!(
            "// TODO: rewrite\n{}{}",
            "let x = 1;\n".repeat(120),
            format!("{}\n", "y".repeat(130)).repeat(5)
        );
        let report = quality_report(&messy);
        assert_eq!(report["todo_count"], 1);
        let findings = report["findings"].as_array().unwrap();
        assert!(findings.iter().any(|f| f.as_str().unwrap().contains("TODO")));
        assert!(findings.iter().any(|f| f.as_str().unwrap().contains("long unit")));
    }

    #[test]
    fn test_builtin_registration() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        let names = registry.names();
        for expected in [
            "analyze_code_quality",
            "comprehensive_analysis",
            "explain_code",
            "fetch_documentation",
            "file_search",
            "generate_tests",
            "git_blame",
            "search_commits",
            "similar_code",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert_eq!(registry.len(), 9);
    }
}
