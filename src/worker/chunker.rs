// src/worker/chunker.rs
// Symbol-boundary chunking. Regex symbol detection per language; chunks are
// sized to a token budget and oversized symbols split into continuations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::estimate_tokens;

/// Token budget per chunk
const CHUNK_TOKEN_BUDGET: u64 = 400;
/// Lines of leading imports/attributes captured as the header chunk
const MAX_HEADER_LINES: usize = 40;

/// A chunk before it has a database identity
#[derive(Debug, Clone, PartialEq)]
pub struct DraftChunk {
    pub content: String,
    pub symbol_name: Option<String>,
    pub symbol_type: Option<String>,
    pub start_line: i32,
    pub end_line: i32,
    pub tokens: i32,
}

struct SymbolPattern {
    symbol_type: &'static str,
    regex: Lazy<Regex>,
}

macro_rules! symbol {
    ($kind:expr, $re:expr) => {
        SymbolPattern {
            symbol_type: $kind,
            regex: Lazy::new(|| {
                #[allow(clippy::unwrap_used)]
                Regex::new($re).unwrap()
            }),
        }
    };
}

static RUST_SYMBOLS: Lazy<Vec<SymbolPattern>> = Lazy::new(|| {
    vec![
        symbol!("function", r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)"),
        symbol!("struct", r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(\w+)"),
        symbol!("enum", r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(\w+)"),
        symbol!("trait", r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)"),
        symbol!("impl", r"^\s*impl(?:<[^>]*>)?\s+(?:\w+\s+for\s+)?(\w+)"),
    ]
});

static PYTHON_SYMBOLS: Lazy<Vec<SymbolPattern>> = Lazy::new(|| {
    vec![
        symbol!("function", r"^\s*(?:async\s+)?def\s+(\w+)"),
        symbol!("class", r"^class\s+(\w+)"),
    ]
});

static JS_SYMBOLS: Lazy<Vec<SymbolPattern>> = Lazy::new(|| {
    vec![
        symbol!("function", r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)"),
        symbol!("class", r"^\s*(?:export\s+)?class\s+(\w+)"),
        symbol!("function", r"^\s*(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s+)?(?:\(|function)"),
    ]
});

static GO_SYMBOLS: Lazy<Vec<SymbolPattern>> = Lazy::new(|| {
    vec![
        symbol!("function", r"^func\s+(?:\([^)]*\)\s+)?(\w+)"),
        symbol!("type", r"^type\s+(\w+)"),
    ]
});

static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^\s*(use\s|import\s|from\s+\S+\s+import|#\[|#!|//!|package\s|mod\s)").unwrap()
});

fn patterns_for(language: Option<&str>) -> &'static [SymbolPattern] {
    match language.map(|l| l.to_lowercase()).as_deref() {
        Some("rust") => &RUST_SYMBOLS,
        Some("python") => &PYTHON_SYMBOLS,
        Some("javascript") | Some("typescript") => &JS_SYMBOLS,
        Some("go") => &GO_SYMBOLS,
        _ => &RUST_SYMBOLS,
    }
}

fn match_symbol(line: &str, language: Option<&str>) -> Option<(String, &'static str)> {
    for pattern in patterns_for(language) {
        if let Some(caps) = pattern.regex.captures(line) {
            if let Some(name) = caps.get(1) {
                return Some((name.as_str().to_string(), pattern.symbol_type));
            }
        }
    }
    None
}

/// Chunk a source file into symbol-bounded, token-budgeted pieces. Lines are
/// 1-indexed; every line of input ends up in exactly one chunk.
pub fn chunk_source(content: &str, language: Option<&str>) -> Vec<DraftChunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    // Leading imports/attributes become the header chunk
    let mut header_end = 0usize;
    while header_end < lines.len().min(MAX_HEADER_LINES) {
        let line = lines[header_end];
        if line.trim().is_empty() || HEADER_LINE.is_match(line) {
            header_end += 1;
        } else {
            break;
        }
    }

    let mut chunks = Vec::new();
    if header_end > 0 && lines[..header_end].iter().any(|l| !l.trim().is_empty()) {
        push_chunk(
            &mut chunks,
            &lines[..header_end],
            1,
            None,
            Some("header".into()),
        );
    }

    // Split the remainder on symbol starts
    let mut region_start = header_end;
    let mut region_symbol: Option<(String, &'static str)> = None;

    for idx in header_end..lines.len() {
        if let Some(found) = match_symbol(lines[idx], language) {
            if idx > region_start {
                emit_region(
                    &mut chunks,
                    &lines[region_start..idx],
                    region_start + 1,
                    region_symbol.take(),
                );
            }
            region_start = idx;
            region_symbol = Some(found);
        }
    }
    if region_start < lines.len() {
        emit_region(
            &mut chunks,
            &lines[region_start..],
            region_start + 1,
            region_symbol,
        );
    }

    chunks
}

/// Emit one region, splitting into continuations when it exceeds the budget.
fn emit_region(
    chunks: &mut Vec<DraftChunk>,
    lines: &[&str],
    start_line: usize,
    symbol: Option<(String, &'static str)>,
) {
    if lines.iter().all(|l| l.trim().is_empty()) {
        return;
    }
    let (name, kind) = match symbol {
        Some((name, kind)) => (Some(name), Some(kind.to_string())),
        None => (None, None),
    };

    let mut piece_start = 0usize;
    let mut piece = 0usize;
    while piece_start < lines.len() {
        let mut end = piece_start;
        let mut tokens = 0u64;
        while end < lines.len() {
            let line_tokens = estimate_tokens(lines[end]) + 1;
            if tokens + line_tokens > CHUNK_TOKEN_BUDGET && end > piece_start {
                break;
            }
            tokens += line_tokens;
            end += 1;
        }

        let name = name.as_ref().map(|n| {
            if piece == 0 {
                n.clone()
            } else {
                format!("{} (continued)", n)
            }
        });
        push_chunk(
            chunks,
            &lines[piece_start..end],
            start_line + piece_start,
            name,
            kind.clone(),
        );
        piece += 1;
        piece_start = end;
    }
}

fn push_chunk(
    chunks: &mut Vec<DraftChunk>,
    lines: &[&str],
    start_line: usize,
    symbol_name: Option<String>,
    symbol_type: Option<String>,
) {
    let content = lines.join("\n");
    let tokens = estimate_tokens(&content) as i32;
    chunks.push(DraftChunk {
        content,
        symbol_name,
        symbol_type,
        start_line: start_line as i32,
        end_line: (start_line + lines.len().saturating_sub(1)) as i32,
        tokens,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUST_SAMPLE: &str = r#"use std::fmt;
use serde::Serialize;

pub struct Config {
    pub name: String,
}

pub fn load_config(path: &str) -> Config {
    Config { name: path.into() }
}

async fn refresh() {
    // periodic
}
"#;

    #[test]
    fn test_rust_chunking() {
        let chunks = chunk_source(RUST_SAMPLE, Some("rust"));
        assert_eq!(chunks[0].symbol_type.as_deref(), Some("header"));
        assert!(chunks[0].content.contains("use std::fmt;"));

        let names: Vec<_> = chunks.iter().filter_map(|c| c.symbol_name.clone()).collect();
        assert!(names.contains(&"Config".to_string()));
        assert!(names.contains(&"load_config".to_string()));
        assert!(names.contains(&"refresh".to_string()));
    }

    #[test]
    fn test_line_numbers_are_one_indexed_and_contiguous() {
        let chunks = chunk_source(RUST_SAMPLE, Some("rust"));
        assert_eq!(chunks[0].start_line, 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
            assert!(pair[0].end_line >= pair[0].start_line);
        }
    }

    #[test]
    fn test_python_chunking() {
        let source = "import os\n\nclass Runner:\n    def go(self):\n        pass\n\ndef main():\n    Runner().go()\n";
        let chunks = chunk_source(source, Some("python"));
        let names: Vec<_> = chunks.iter().filter_map(|c| c.symbol_name.clone()).collect();
        assert!(names.contains(&"Runner".to_string()));
        assert!(names.contains(&"main".to_string()));
    }

    #[test]
    fn test_long_symbol_gets_continuations() {
        let body: String = (0..400)
            .map(|i| format!("    let x{} = compute({});\n", i, i))
            .collect();
        let source = format!("fn huge() {{\n{}}}\n", body);
        let chunks = chunk_source(&source, Some("rust"));
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("huge"));
        assert!(chunks[1]
            .symbol_name
            .as_deref()
            .unwrap()
            .contains("(continued)"));
        // Every chunk respects the budget (with one-line tolerance)
        for chunk in &chunks {
            assert!(chunk.tokens as u64 <= CHUNK_TOKEN_BUDGET + 40);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_source("", Some("rust")).is_empty());
    }

    #[test]
    fn test_unknown_language_defaults_to_rust_patterns() {
        let chunks = chunk_source("fn lonely() {}\n", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("lonely"));
    }
}
