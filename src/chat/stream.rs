// src/chat/stream.rs
// Explicit state machine over provider delta events. Text accumulates into
// the reply buffer; tool-call fragments accumulate monotonically per index
// until finalization.

use std::collections::BTreeMap;

use crate::llm::{FinishReason, StreamEvent, TokenUsage, ToolCall};

/// Side effects the caller should perform for one applied event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamAction {
    /// Forward a text delta to the client
    EmitText(String),
    /// A tool call's name is now known; notify the client once
    EmitToolStarted { name: String },
    /// Stream finished; finalize and continue the turn
    Completed,
    /// Provider-side failure
    Failed(String),
}

#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Accumulates one assistant turn from delta events.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: String,
    thinking: String,
    pending: BTreeMap<u32, PendingToolCall>,
    finish_reason: FinishReason,
    usage: Option<TokenUsage>,
    completed: bool,
}

/// The finalized turn
#[derive(Debug, Clone)]
pub struct FinalizedTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

impl FinalizedTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta event, returning the actions to perform.
    pub fn apply(&mut self, event: StreamEvent) -> Vec<StreamAction> {
        match event {
            StreamEvent::TextDelta(text) => {
                self.buffer.push_str(&text);
                vec![StreamAction::EmitText(text)]
            }
            StreamEvent::ThinkingDelta(text) => {
                // Deliberation stays server-side; kept for logging only
                self.thinking.push_str(&text);
                Vec::new()
            }
            StreamEvent::ToolCallStart { index, id, name } => {
                let call = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    call.id = id;
                }
                call.name = name.clone();
                if call.announced {
                    Vec::new()
                } else {
                    call.announced = true;
                    vec![StreamAction::EmitToolStarted { name }]
                }
            }
            StreamEvent::ToolCallDelta {
                index,
                arguments_delta,
            } => {
                self.pending
                    .entry(index)
                    .or_default()
                    .arguments
                    .push_str(&arguments_delta);
                Vec::new()
            }
            StreamEvent::Done { finish_reason, usage } => {
                self.finish_reason = finish_reason;
                self.usage = usage;
                self.completed = true;
                vec![StreamAction::Completed]
            }
            StreamEvent::Error(message) => vec![StreamAction::Failed(message)],
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Move all pending tool calls into their final form. Tool calls without
    /// arguments get an empty object so downstream parsing never fails.
    pub fn finalize(self) -> FinalizedTurn {
        let tool_calls: Vec<ToolCall> = self
            .pending
            .into_iter()
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id
                },
                name: call.name,
                arguments: if call.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                },
            })
            .collect();

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            self.finish_reason
        };

        FinalizedTurn {
            content: self.buffer,
            tool_calls,
            finish_reason,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_accumulation() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(
            acc.apply(StreamEvent::TextDelta("Hel".into())),
            vec![StreamAction::EmitText("Hel".into())]
        );
        acc.apply(StreamEvent::TextDelta("lo".into()));
        acc.apply(StreamEvent::Done {
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        let turn = acc.finalize();
        assert_eq!(turn.content, "Hello");
        assert!(!turn.has_tool_calls());
        assert_eq!(turn.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_single_tool_call_stream() {
        // Mock provider: name first, then two argument fragments, then done
        let mut acc = StreamAccumulator::new();
        let actions = acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: "call_abc".into(),
            name: "file_search".into(),
        });
        assert_eq!(
            actions,
            vec![StreamAction::EmitToolStarted {
                name: "file_search".into()
            }]
        );
        assert!(acc
            .apply(StreamEvent::ToolCallDelta {
                index: 0,
                arguments_delta: r#"{"q":"#.into(),
            })
            .is_empty());
        assert!(acc
            .apply(StreamEvent::ToolCallDelta {
                index: 0,
                arguments_delta: r#""x"}"#.into(),
            })
            .is_empty());
        acc.apply(StreamEvent::Done {
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        });

        let turn = acc.finalize();
        assert!(turn.has_tool_calls());
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "call_abc");
        assert_eq!(turn.tool_calls[0].name, "file_search");
        assert_eq!(turn.tool_calls[0].arguments, r#"{"q":"x"}"#);
        // Empty content is allowed when only tool calls streamed
        assert!(turn.content.is_empty());
    }

    #[test]
    fn test_tool_started_emitted_once_per_index() {
        let mut acc = StreamAccumulator::new();
        let first = acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: "c1".into(),
            name: "file_search".into(),
        });
        let second = acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: "c1".into(),
            name: "file_search".into(),
        });
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_started_frames_match_finalized_cardinality() {
        let mut acc = StreamAccumulator::new();
        let mut started = 0;
        for (index, name) in [(0u32, "file_search"), (1u32, "git_blame")] {
            started += acc
                .apply(StreamEvent::ToolCallStart {
                    index,
                    id: format!("c{}", index),
                    name: name.into(),
                })
                .iter()
                .filter(|a| matches!(a, StreamAction::EmitToolStarted { .. }))
                .count();
        }
        acc.apply(StreamEvent::Done {
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        });
        let turn = acc.finalize();
        assert_eq!(turn.tool_calls.len(), started);
    }

    #[test]
    fn test_interleaved_text_and_tool_deltas() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::TextDelta("Let me check. ".into()));
        acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: "c1".into(),
            name: "file_search".into(),
        });
        acc.apply(StreamEvent::ToolCallDelta {
            index: 0,
            arguments_delta: "{}".into(),
        });
        acc.apply(StreamEvent::TextDelta("Searching now.".into()));
        acc.apply(StreamEvent::Done {
            finish_reason: FinishReason::ToolCalls,
            usage: Some(TokenUsage::new(10, 5)),
        });
        let turn = acc.finalize();
        assert_eq!(turn.content, "Let me check. Searching now.");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.usage.unwrap().output_tokens, 5);
    }

    #[test]
    fn test_missing_arguments_default_to_empty_object() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: String::new(),
            name: "file_search".into(),
        });
        let turn = acc.finalize();
        assert_eq!(turn.tool_calls[0].arguments, "{}");
        assert_eq!(turn.tool_calls[0].id, "call_0");
    }

    #[test]
    fn test_thinking_deltas_not_emitted() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.apply(StreamEvent::ThinkingDelta("hmm".into())).is_empty());
        acc.apply(StreamEvent::TextDelta("answer".into()));
        let turn = acc.finalize();
        assert_eq!(turn.content, "answer");
    }

    #[test]
    fn test_finish_reason_forced_to_tool_calls_when_pending() {
        let mut acc = StreamAccumulator::new();
        acc.apply(StreamEvent::ToolCallStart {
            index: 0,
            id: "c".into(),
            name: "t".into(),
        });
        acc.apply(StreamEvent::Done {
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        assert_eq!(acc.finalize().finish_reason, FinishReason::ToolCalls);
    }
}
