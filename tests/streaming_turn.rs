// tests/streaming_turn.rs
// Single-pass streaming with an incrementally-materialized tool call, driven
// through the accumulator exactly as the chat loop drives it.

use loupe::chat::{StreamAccumulator, StreamAction};
use loupe::llm::{FinishReason, StreamEvent};

/// The mock provider sequence: tool-call name first, arguments split across
/// two fragments, then a tool_calls finish.
fn mock_tool_call_stream() -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCallStart {
            index: 0,
            id: "call_1".into(),
            name: "file_search".into(),
        },
        StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: r#"{"q":"#.into(),
        },
        StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: r#""x"}"#.into(),
        },
        StreamEvent::Done {
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        },
    ]
}

#[test]
fn single_pass_tool_call_stream() {
    let mut accumulator = StreamAccumulator::new();
    let mut started_frames = 0;
    let mut completed = 0;

    for event in mock_tool_call_stream() {
        for action in accumulator.apply(event) {
            match action {
                StreamAction::EmitToolStarted { name } => {
                    assert_eq!(name, "file_search");
                    started_frames += 1;
                }
                StreamAction::Completed => completed += 1,
                StreamAction::EmitText(_) => panic!("no text expected in this stream"),
                StreamAction::Failed(e) => panic!("unexpected failure: {}", e),
            }
        }
    }

    // Exactly one started notification and one completion
    assert_eq!(started_frames, 1);
    assert_eq!(completed, 1);

    let turn = accumulator.finalize();
    assert!(turn.has_tool_calls());
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].id, "call_1");
    assert_eq!(turn.tool_calls[0].name, "file_search");
    assert_eq!(turn.tool_calls[0].arguments, r#"{"q":"x"}"#);
    // Content may be empty when the model only called tools
    assert!(turn.content.is_empty());
    assert_eq!(turn.finish_reason, FinishReason::ToolCalls);
}

#[test]
fn started_frame_cardinality_matches_finalized_calls() {
    // Three tool calls with interleaved argument deltas across indexes
    let events = vec![
        StreamEvent::TextDelta("Checking a few things. ".into()),
        StreamEvent::ToolCallStart {
            index: 0,
            id: "a".into(),
            name: "file_search".into(),
        },
        StreamEvent::ToolCallStart {
            index: 1,
            id: "b".into(),
            name: "git_blame".into(),
        },
        StreamEvent::ToolCallDelta {
            index: 1,
            arguments_delta: r#"{"file":"src/a.rs","line":3}"#.into(),
        },
        StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: r#"{"query":"retry"}"#.into(),
        },
        StreamEvent::ToolCallStart {
            index: 2,
            id: "c".into(),
            name: "similar_code".into(),
        },
        StreamEvent::Done {
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        },
    ];

    let mut accumulator = StreamAccumulator::new();
    let mut started = 0;
    for event in events {
        started += accumulator
            .apply(event)
            .iter()
            .filter(|a| matches!(a, StreamAction::EmitToolStarted { .. }))
            .count();
    }

    let turn = accumulator.finalize();
    assert_eq!(turn.tool_calls.len(), started);
    assert_eq!(turn.tool_calls.len(), 3);
    // Per-index accumulation stayed monotone and isolated
    assert_eq!(turn.tool_calls[0].arguments, r#"{"query":"retry"}"#);
    assert_eq!(turn.tool_calls[1].arguments, r#"{"file":"src/a.rs","line":3}"#);
    assert_eq!(turn.tool_calls[2].arguments, "{}");
    assert_eq!(turn.content, "Checking a few things. ");
}

#[test]
fn text_only_stream_finishes_without_tool_calls() {
    let events = vec![
        StreamEvent::TextDelta("Hello".into()),
        StreamEvent::TextDelta(" world".into()),
        StreamEvent::Done {
            finish_reason: FinishReason::Stop,
            usage: None,
        },
    ];
    let mut accumulator = StreamAccumulator::new();
    let mut text = String::new();
    for event in events {
        for action in accumulator.apply(event) {
            if let StreamAction::EmitText(delta) = action {
                text.push_str(&delta);
            }
        }
    }
    let turn = accumulator.finalize();
    assert_eq!(text, "Hello world");
    assert_eq!(turn.content, "Hello world");
    assert!(!turn.has_tool_calls());
}
