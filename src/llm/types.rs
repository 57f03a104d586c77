// src/llm/types.rs
// Shared LLM types: messages, tools, the normalized completion envelope and
// the delta-event stream every provider is translated into.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role. `Developer` is the Responses-API replacement for `System`
/// on reasoning models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool responses - links the output to a specific call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self {
            role: Role::Developer,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Finalized tool call from the model. Arguments stay a JSON string because
/// they arrive as incremental fragments during streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Provider-agnostic tool definition; each client converts to its wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

impl ToolDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// OpenAI Chat Completions function-tool shape
    pub fn to_openai(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// Responses API flat tool shape
    pub fn to_responses(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }

    /// Anthropic tool shape
    pub fn to_anthropic(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// Normalized token usage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    pub fn accumulate(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Why the model stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

/// Normalized final response envelope - the core loop never branches on
/// provider shape.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request_id: String,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: FinishReason,
    pub model: String,
    pub duration_ms: u64,
}

/// Delta events every provider stream is normalized into. Tool-call deltas
/// carry a dense per-response index so accumulation is shape-independent.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCallStart {
        index: u32,
        id: String,
        name: String,
    },
    ToolCallDelta {
        index: u32,
        arguments_delta: String,
    },
    Done {
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    },
    Error(String),
}

/// Reasoning controls passed through to providers that support them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningOptions {
    pub effort: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Uniform request accepted by the adapter
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub tools: Option<Vec<ToolDef>>,
    pub tool_choice: Option<String>,
    pub parallel_tool_calls: Option<bool>,
    pub reasoning: Option<ReasoningOptions>,
    /// Override the adapter's active model for this call only
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            reasoning: None,
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        if !tools.is_empty() {
            self.tools = Some(tools);
            self.tool_choice = Some("auto".into());
        }
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool_result("call_1", "done");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.text(), "done");

        let msg = ChatMessage::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: "c1".into(),
                name: "file_search".into(),
                arguments: "{}".into(),
            }],
        );
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls.as_ref().map(|t| t.len()), Some(1));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Developer).unwrap(), "\"developer\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn test_tool_def_conversions() {
        let def = ToolDef::new(
            "file_search",
            "Search indexed code",
            serde_json::json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        );

        let openai = def.to_openai();
        assert_eq!(openai["type"], "function");
        assert_eq!(openai["function"]["name"], "file_search");

        let responses = def.to_responses();
        assert_eq!(responses["name"], "file_search");
        assert!(responses.get("function").is_none());

        let anthropic = def.to_anthropic();
        assert!(anthropic.get("input_schema").is_some());
        assert!(anthropic.get("type").is_none());
    }

    #[test]
    fn test_usage_accumulate() {
        let mut usage = TokenUsage::new(10, 5);
        usage.accumulate(TokenUsage::new(3, 7));
        assert_eq!(usage.input_tokens, 13);
        assert_eq!(usage.output_tokens, 12);
    }

    #[test]
    fn test_request_with_tools_sets_auto_choice() {
        let req = CompletionRequest::new(vec![]).with_tools(vec![ToolDef::new(
            "t",
            "d",
            serde_json::json!({}),
        )]);
        assert_eq!(req.tool_choice.as_deref(), Some("auto"));

        let req = CompletionRequest::new(vec![]).with_tools(vec![]);
        assert!(req.tool_choice.is_none());
    }
}
