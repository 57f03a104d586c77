// tests/query_detection.rs
// Seed set of queries against their expected categories, plus the weight
// rows the fusion layer derives from them.

use loupe::search::{QueryType, SearchWeights, detect_query_type};

fn expect(query: &str, expected: QueryType) {
    assert_eq!(
        detect_query_type(query),
        expected,
        "query {:?} misclassified",
        query
    );
}

#[test]
fn seed_queries_match_expected_labels() {
    expect(
        "I'm getting a TypeError when running this function",
        QueryType::ErrorDebug,
    );
    expect(
        "What is the difference between async and sync programming?",
        QueryType::Conceptual,
    );
    expect(
        "Where is the UserService.authenticate() method defined?",
        QueryType::SpecificCode,
    );
    expect("traceback shows a crash in the parser", QueryType::ErrorDebug);
    expect("optimize the slow cache benchmark", QueryType::Performance);
    expect("write unit test coverage with mocks", QueryType::Testing);
    expect(
        "design an architecture pattern for the importer",
        QueryType::Implementation,
    );
    expect("POST endpoint route handler", QueryType::ApiUsage);
}

#[test]
fn empty_and_unmatched_queries_default_to_conceptual() {
    expect("", QueryType::Conceptual);
    expect("weather today", QueryType::Conceptual);
}

#[test]
fn weight_table_matches_detected_types() {
    let cases = [
        (QueryType::ErrorDebug, (0.3, 0.6, 0.1)),
        (QueryType::ApiUsage, (0.6, 0.2, 0.2)),
        (QueryType::Implementation, (0.7, 0.2, 0.1)),
        (QueryType::Conceptual, (0.8, 0.1, 0.1)),
        (QueryType::SpecificCode, (0.2, 0.3, 0.5)),
        (QueryType::Performance, (0.4, 0.4, 0.2)),
        (QueryType::Testing, (0.4, 0.5, 0.1)),
    ];
    for (query_type, (semantic, keyword, structural)) in cases {
        let weights = SearchWeights::for_query_type(query_type);
        assert_eq!(weights.semantic, semantic);
        assert_eq!(weights.keyword, keyword);
        assert_eq!(weights.structural, structural);
        let sum = weights.semantic + weights.keyword + weights.structural;
        assert!((sum - 1.0).abs() < 1e-6, "{:?} weights do not sum to 1", query_type);
    }
}
