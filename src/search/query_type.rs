// src/search/query_type.rs
// Query-type detection driving modality fusion weights. Substring counting
// with a couple of shape heuristics; ties resolve in declared order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Detected query categories, in tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    ErrorDebug,
    ApiUsage,
    Implementation,
    Conceptual,
    SpecificCode,
    Performance,
    Testing,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::ErrorDebug => "error_debug",
            QueryType::ApiUsage => "api_usage",
            QueryType::Implementation => "implementation",
            QueryType::Conceptual => "conceptual",
            QueryType::SpecificCode => "specific_code",
            QueryType::Performance => "performance",
            QueryType::Testing => "testing",
        }
    }

    /// All types in tie-break order (first wins on equal counts)
    pub const ALL: [QueryType; 7] = [
        QueryType::ErrorDebug,
        QueryType::ApiUsage,
        QueryType::Implementation,
        QueryType::Conceptual,
        QueryType::SpecificCode,
        QueryType::Performance,
        QueryType::Testing,
    ];
}

/// Per-modality fusion weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    pub semantic: f32,
    pub keyword: f32,
    pub structural: f32,
}

impl SearchWeights {
    pub const fn new(semantic: f32, keyword: f32, structural: f32) -> Self {
        Self {
            semantic,
            keyword,
            structural,
        }
    }

    /// Built-in weight table per query type
    pub fn for_query_type(query_type: QueryType) -> Self {
        match query_type {
            QueryType::ErrorDebug => Self::new(0.3, 0.6, 0.1),
            QueryType::ApiUsage => Self::new(0.6, 0.2, 0.2),
            QueryType::Implementation => Self::new(0.7, 0.2, 0.1),
            QueryType::Conceptual => Self::new(0.8, 0.1, 0.1),
            QueryType::SpecificCode => Self::new(0.2, 0.3, 0.5),
            QueryType::Performance => Self::new(0.4, 0.4, 0.2),
            QueryType::Testing => Self::new(0.4, 0.5, 0.1),
        }
    }
}

/// Weight table with optional runtime overrides (runtime_config key
/// `search_weights`, an object of per-type `{semantic, keyword, structural}`).
#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    overrides: HashMap<QueryType, SearchWeights>,
}

impl WeightTable {
    pub fn from_overrides(value: &serde_json::Value) -> Self {
        let mut overrides = HashMap::new();
        if let Some(map) = value.as_object() {
            for query_type in QueryType::ALL {
                if let Some(entry) = map.get(query_type.as_str()) {
                    if let Ok(weights) = serde_json::from_value::<SearchWeights>(entry.clone()) {
                        overrides.insert(query_type, weights);
                    }
                }
            }
        }
        Self { overrides }
    }

    pub fn weights_for(&self, query_type: QueryType) -> SearchWeights {
        self.overrides
            .get(&query_type)
            .copied()
            .unwrap_or_else(|| SearchWeights::for_query_type(query_type))
    }
}

const ERROR_PATTERNS: &[&str] = &[
    "error",
    "exception",
    "traceback",
    "bug",
    "issue",
    "problem",
    "failed",
    "broken",
    "crash",
    "debug",
    "stacktrace",
    "typeerror",
    "valueerror",
    "attributeerror",
    "fix",
    "wrong",
    "not working",
];

const API_PATTERNS: &[&str] = &[
    "api", "endpoint", "request", "response", "http", "rest", "get", "post", "put", "delete",
    "route", "handler",
];

const IMPL_PATTERNS: &[&str] = &[
    "implement",
    "create",
    "build",
    "make",
    "add",
    "develop",
    "design",
    "architecture",
    "pattern",
    "approach",
    "solution",
];

const CONCEPTUAL_PATTERNS: &[&str] = &[
    "how",
    "what",
    "why",
    "when",
    "explain",
    "understand",
    "concept",
    "principle",
    "theory",
    "overview",
    "summary",
];

const SPECIFIC_PATTERNS: &[&str] = &[
    "function", "class", "method", "variable", "constant", "import", "module", "package", "file:",
    "line", "@",
];

const PERFORMANCE_PATTERNS: &[&str] = &[
    "performance",
    "optimize",
    "speed",
    "fast",
    "slow",
    "efficient",
    "memory",
    "cpu",
    "benchmark",
    "profil",
    "cache",
    "scale",
];

const TESTING_PATTERNS: &[&str] = &[
    "test",
    "testing",
    "unit test",
    "integration",
    "mock",
    "assert",
    "coverage",
    "pytest",
    "unittest",
    "spec",
    "tdd",
];

fn count_matches(haystack: &str, patterns: &[&str]) -> u32 {
    patterns.iter().filter(|p| haystack.contains(*p)).count() as u32
}

/// Detect the query type from its text.
pub fn detect_query_type(query: &str) -> QueryType {
    let lowered = query.to_lowercase();

    let mut counts: HashMap<QueryType, u32> = HashMap::from([
        (QueryType::ErrorDebug, count_matches(&lowered, ERROR_PATTERNS)),
        (QueryType::ApiUsage, count_matches(&lowered, API_PATTERNS)),
        (QueryType::Implementation, count_matches(&lowered, IMPL_PATTERNS)),
        (QueryType::Conceptual, count_matches(&lowered, CONCEPTUAL_PATTERNS)),
        (QueryType::SpecificCode, count_matches(&lowered, SPECIFIC_PATTERNS)),
        (QueryType::Performance, count_matches(&lowered, PERFORMANCE_PATTERNS)),
        (QueryType::Testing, count_matches(&lowered, TESTING_PATTERNS)),
    ]);

    // Symbolic shapes point at concrete code
    if query.contains('(') || query.contains(')') || query.contains('.') || query.contains("::")
        || lowered.contains("def ")
    {
        *counts.entry(QueryType::SpecificCode).or_default() += 2;
    }

    // "how ..." questions are conceptual unless they carry implementation words
    if lowered.starts_with("how") {
        if IMPL_PATTERNS.iter().any(|p| lowered.contains(p)) {
            *counts.entry(QueryType::Implementation).or_default() += 1;
        } else {
            *counts.entry(QueryType::Conceptual).or_default() += 1;
        }
    }

    // Pasted stack traces and error lines
    if ["traceback", "at line", "line ", "error:"]
        .iter()
        .any(|p| lowered.contains(p))
    {
        *counts.entry(QueryType::ErrorDebug).or_default() += 2;
    }

    if counts.values().all(|&c| c == 0) {
        return QueryType::Conceptual;
    }

    // First strictly-greater wins, preserving the declared tie-break order
    let mut best = QueryType::ALL[0];
    let mut best_count = counts.get(&best).copied().unwrap_or(0);
    for query_type in QueryType::ALL.into_iter().skip(1) {
        let count = counts.get(&query_type).copied().unwrap_or(0);
        if count > best_count {
            best = query_type;
            best_count = count;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_query() {
        assert_eq!(
            detect_query_type("I'm getting a TypeError when running this function"),
            QueryType::ErrorDebug
        );
        assert_eq!(
            detect_query_type("fix the broken crash in the parser"),
            QueryType::ErrorDebug
        );
    }

    #[test]
    fn test_conceptual_query() {
        assert_eq!(
            detect_query_type("What is the difference between async and sync programming?"),
            QueryType::Conceptual
        );
        assert_eq!(detect_query_type("hello there"), QueryType::Conceptual);
    }

    #[test]
    fn test_specific_code_query() {
        assert_eq!(
            detect_query_type("Where is the UserService.authenticate() method defined?"),
            QueryType::SpecificCode
        );
    }

    #[test]
    fn test_how_prefix_routing() {
        // "how" routes to conceptual even though "caching" scores performance
        assert_eq!(
            detect_query_type("how does caching work here"),
            QueryType::Conceptual
        );
        assert_eq!(
            detect_query_type("how should I implement the session design"),
            QueryType::Implementation
        );
        assert_eq!(
            detect_query_type("how are things going"),
            QueryType::Conceptual
        );
    }

    #[test]
    fn test_testing_and_performance() {
        assert_eq!(
            detect_query_type("write a unit test with mock coverage for this"),
            QueryType::Testing
        );
        assert_eq!(
            detect_query_type("optimize the slow memory benchmark"),
            QueryType::Performance
        );
    }

    #[test]
    fn test_weight_table_rows() {
        let w = SearchWeights::for_query_type(QueryType::Conceptual);
        assert_eq!((w.semantic, w.keyword, w.structural), (0.8, 0.1, 0.1));
        let w = SearchWeights::for_query_type(QueryType::ErrorDebug);
        assert_eq!((w.semantic, w.keyword, w.structural), (0.3, 0.6, 0.1));
        let w = SearchWeights::for_query_type(QueryType::SpecificCode);
        assert_eq!((w.semantic, w.keyword, w.structural), (0.2, 0.3, 0.5));
    }

    #[test]
    fn test_weight_overrides() {
        let table = WeightTable::from_overrides(&serde_json::json!({
            "conceptual": {"semantic": 0.5, "keyword": 0.25, "structural": 0.25},
            "bogus_type": {"semantic": 1.0, "keyword": 0.0, "structural": 0.0},
        }));
        let w = table.weights_for(QueryType::Conceptual);
        assert_eq!(w.semantic, 0.5);
        // Non-overridden types keep the builtin row
        let w = table.weights_for(QueryType::Testing);
        assert_eq!(w.keyword, 0.5);
    }

    #[test]
    fn test_tie_break_prefers_declared_order() {
        // "when" (conceptual) ties with "function" (specific) at 1 each
        // without symbol characters; error_debug..conceptual precede
        // specific_code in declared order.
        assert_eq!(
            detect_query_type("when function"),
            QueryType::Conceptual
        );
    }
}
