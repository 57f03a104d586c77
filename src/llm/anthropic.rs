// src/llm/anthropic.rs
// Anthropic Messages API client. System text is a top-level param, tool
// results ride user-turn content blocks, and extended thinking arrives as
// separate content blocks in both modes.

use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorKind};
use crate::llm::http::{AuthScheme, LlmHttpClient};
use crate::llm::types::{
    ChatMessage, Completion, FinishReason, Role, StreamEvent, TokenUsage, ToolCall, ToolDef,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
/// Default output ceiling when the caller does not set one
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Floor the API accepts for a thinking budget
pub const MIN_THINKING_BUDGET: u32 = 1024;

/// Extended-thinking controls for a call
#[derive(Debug, Clone)]
pub struct ThinkingParams {
    /// Upper bound for the budget (claude_thinking_budget_tokens)
    pub max_budget_tokens: u32,
    /// Scale the budget with input size instead of always spending the max
    pub adaptive: bool,
}

/// Generation parameters for an Anthropic call
#[derive(Debug, Clone, Default)]
pub struct AnthropicParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub tools: Option<Vec<ToolDef>>,
    pub thinking: Option<ThinkingParams>,
}

/// Anthropic Messages client
#[derive(Clone)]
pub struct AnthropicClient {
    http: LlmHttpClient,
    auth: AuthScheme,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: LlmHttpClient::new(),
            auth: AuthScheme::AnthropicApiKey(api_key),
        }
    }

    /// Convert chat messages to the Anthropic wire shape:
    /// (system text, messages array).
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system: Vec<String> = Vec::new();
        let mut wire: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System | Role::Developer => system.push(msg.text().to_string()),
                Role::User => wire.push(json!({"role": "user", "content": msg.text()})),
                Role::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if let Some(content) = &msg.content {
                        if !content.is_empty() {
                            blocks.push(json!({"type": "text", "text": content}));
                        }
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            let input: Value = serde_json::from_str(&call.arguments)
                                .unwrap_or_else(|_| json!({}));
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": input,
                            }));
                        }
                    }
                    if !blocks.is_empty() {
                        wire.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
                Role::Tool => {
                    wire.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                            "content": msg.text(),
                        }],
                    }));
                }
            }
        }

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, wire)
    }

    /// Thinking budget scales with input size when adaptive, bounded by the
    /// configured maximum and the API floor.
    fn thinking_budget(params: &ThinkingParams, input_chars: usize) -> u32 {
        if !params.adaptive {
            return params.max_budget_tokens.max(MIN_THINKING_BUDGET);
        }
        let input_tokens = (input_chars / 4) as u32;
        (input_tokens * 2).clamp(MIN_THINKING_BUDGET, params.max_budget_tokens.max(MIN_THINKING_BUDGET))
    }

    fn build_body(
        model: &str,
        messages: &[ChatMessage],
        params: &AnthropicParams,
        stream: bool,
    ) -> String {
        let (system, wire_messages) = Self::convert_messages(messages);
        let input_chars: usize = messages.iter().map(|m| m.text().len()).sum();

        let mut body = json!({
            "model": model,
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": wire_messages,
        });

        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(tools) = &params.tools {
            body["tools"] = Value::Array(tools.iter().map(ToolDef::to_anthropic).collect());
        }
        if let Some(thinking) = &params.thinking {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": Self::thinking_budget(thinking, input_chars),
            });
        }
        if stream {
            body["stream"] = json!(true);
        }

        body.to_string()
    }

    /// Non-streaming completion
    pub async fn complete(
        &self,
        request_id: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &AnthropicParams,
    ) -> Result<Completion, ProviderError> {
        let start = Instant::now();
        let body = Self::build_body(model, messages, params, false);
        debug!(request_id = %request_id, model = %model, "Anthropic request");

        let response_body = self
            .http
            .post_with_retry(request_id, ANTHROPIC_API_URL, &self.auth, body)
            .await?;

        parse_response(&response_body, request_id, model, start.elapsed().as_millis() as u64)
    }

    /// Streaming completion
    pub async fn stream(
        &self,
        request_id: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &AnthropicParams,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let body = Self::build_body(model, messages, params, true);
        let response = self
            .http
            .post_streaming(request_id, ANTHROPIC_API_URL, &self.auth, body)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            pump_sse(response, tx, request_id).await;
        });
        Ok(rx)
    }
}

fn parse_response(
    body: &str,
    request_id: &str,
    model: &str,
    duration_ms: u64,
) -> Result<Completion, ProviderError> {
    let json: Value = serde_json::from_str(body).map_err(|e| {
        ProviderError::new(
            ProviderErrorKind::Transient,
            format!("failed to parse anthropic body: {}", e),
            request_id,
        )
    })?;

    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Err(ProviderError::new(
            crate::llm::http::classify_status(reqwest::StatusCode::BAD_REQUEST, message),
            message.to_string(),
            request_id,
        ));
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = json["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].to_string(),
                    });
                }
                // thinking blocks are internal deliberation, not reply text
                _ => {}
            }
        }
    }

    let usage = json.get("usage").filter(|u| !u.is_null()).map(|u| {
        TokenUsage::new(
            u["input_tokens"].as_u64().unwrap_or(0) as u32,
            u["output_tokens"].as_u64().unwrap_or(0) as u32,
        )
    });

    let finish_reason = match json["stop_reason"].as_str() {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    };

    Ok(Completion {
        request_id: request_id.to_string(),
        text,
        tool_calls,
        usage,
        finish_reason,
        model: model.to_string(),
        duration_ms,
    })
}

/// Translate Anthropic SSE events into StreamEvents. Content-block indexes
/// are remapped onto dense tool-call indexes.
async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>, request_id: String) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    // content_block index -> (tool index, is_tool_block)
    let mut block_kinds: std::collections::HashMap<u64, BlockKind> = std::collections::HashMap::new();
    let mut tool_count: u32 = 0;
    let mut saw_tool_calls = false;
    let mut usage: Option<TokenUsage> = None;
    let mut input_tokens: u32 = 0;
    let mut finish = FinishReason::Stop;
    let mut done_sent = false;

    #[derive(Clone, Copy)]
    enum BlockKind {
        Text,
        Thinking,
        Tool(u32),
    }

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                warn!(request_id = %request_id, "Anthropic stream read failed: {}", e);
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].trim().to_string();
            buffer = buffer[line_end + 1..].to_string();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let Ok(json) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            match json["type"].as_str() {
                Some("message_start") => {
                    input_tokens = json
                        .pointer("/message/usage/input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as u32;
                }
                Some("content_block_start") => {
                    let index = json["index"].as_u64().unwrap_or(0);
                    match json.pointer("/content_block/type").and_then(|t| t.as_str()) {
                        Some("tool_use") => {
                            let tool_index = tool_count;
                            tool_count += 1;
                            saw_tool_calls = true;
                            block_kinds.insert(index, BlockKind::Tool(tool_index));
                            let _ = tx
                                .send(StreamEvent::ToolCallStart {
                                    index: tool_index,
                                    id: json
                                        .pointer("/content_block/id")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or_default()
                                        .to_string(),
                                    name: json
                                        .pointer("/content_block/name")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or("unknown")
                                        .to_string(),
                                })
                                .await;
                        }
                        Some("thinking") => {
                            block_kinds.insert(index, BlockKind::Thinking);
                        }
                        _ => {
                            block_kinds.insert(index, BlockKind::Text);
                        }
                    }
                }
                Some("content_block_delta") => {
                    let index = json["index"].as_u64().unwrap_or(0);
                    let kind = block_kinds.get(&index).copied().unwrap_or(BlockKind::Text);
                    match json.pointer("/delta/type").and_then(|t| t.as_str()) {
                        Some("text_delta") => {
                            if let Some(t) = json.pointer("/delta/text").and_then(|v| v.as_str()) {
                                let _ = tx.send(StreamEvent::TextDelta(t.to_string())).await;
                            }
                        }
                        Some("thinking_delta") => {
                            if let Some(t) =
                                json.pointer("/delta/thinking").and_then(|v| v.as_str())
                            {
                                let _ = tx.send(StreamEvent::ThinkingDelta(t.to_string())).await;
                            }
                        }
                        Some("input_json_delta") => {
                            if let (BlockKind::Tool(tool_index), Some(partial)) = (
                                kind,
                                json.pointer("/delta/partial_json").and_then(|v| v.as_str()),
                            ) {
                                let _ = tx
                                    .send(StreamEvent::ToolCallDelta {
                                        index: tool_index,
                                        arguments_delta: partial.to_string(),
                                    })
                                    .await;
                            }
                        }
                        _ => {}
                    }
                }
                Some("message_delta") => {
                    if let Some(reason) = json.pointer("/delta/stop_reason").and_then(|v| v.as_str())
                    {
                        finish = match reason {
                            "tool_use" => FinishReason::ToolCalls,
                            "max_tokens" => FinishReason::Length,
                            _ => FinishReason::Stop,
                        };
                    }
                    if let Some(out) = json.pointer("/usage/output_tokens").and_then(|v| v.as_u64())
                    {
                        usage = Some(TokenUsage::new(input_tokens, out as u32));
                    }
                }
                Some("message_stop") => {
                    if finish == FinishReason::Stop && saw_tool_calls {
                        finish = FinishReason::ToolCalls;
                    }
                    let _ = tx.send(StreamEvent::Done { finish_reason: finish, usage }).await;
                    done_sent = true;
                }
                Some("error") => {
                    let message = json
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("provider reported failure");
                    let _ = tx.send(StreamEvent::Error(message.to_string())).await;
                    return;
                }
                _ => {}
            }
        }
    }

    if !done_sent {
        let _ = tx.send(StreamEvent::Done { finish_reason: finish, usage }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_becomes_top_level_param() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let body = AnthropicClient::build_body("claude-3-5-sonnet-20241022", &messages, &AnthropicParams::default(), false);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["system"], "be brief");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tool_result_rides_user_content_block() {
        let messages = vec![
            ChatMessage::user("check"),
            ChatMessage::assistant_with_tool_calls(
                Some("Checking.".into()),
                vec![ToolCall {
                    id: "toolu_1".into(),
                    name: "file_search".into(),
                    arguments: r#"{"q":"x"}"#.into(),
                }],
            ),
            ChatMessage::tool_result("toolu_1", "found 3 results"),
        ];
        let body = AnthropicClient::build_body("claude-3-5-sonnet-20241022", &messages, &AnthropicParams::default(), false);
        let json: Value = serde_json::from_str(&body).unwrap();
        let msgs = json["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["content"][1]["type"], "tool_use");
        assert_eq!(msgs[1]["content"][1]["input"]["q"], "x");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"][0]["type"], "tool_result");
        assert_eq!(msgs[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_thinking_budget_adaptive_scales_and_clamps() {
        let params = ThinkingParams {
            max_budget_tokens: 16384,
            adaptive: true,
        };
        // Tiny input clamps up to the floor
        assert_eq!(AnthropicClient::thinking_budget(&params, 100), MIN_THINKING_BUDGET);
        // Large input clamps down to the configured maximum
        assert_eq!(AnthropicClient::thinking_budget(&params, 1_000_000), 16384);
        // Mid-size input scales with size: 40_000 chars -> 10_000 tokens -> 20_000 budget,
        // above max 16384
        assert_eq!(AnthropicClient::thinking_budget(&params, 40_000), 16384);
        assert_eq!(AnthropicClient::thinking_budget(&params, 10_000), 5000);
    }

    #[test]
    fn test_thinking_budget_fixed_when_not_adaptive() {
        let params = ThinkingParams {
            max_budget_tokens: 32000,
            adaptive: false,
        };
        assert_eq!(AnthropicClient::thinking_budget(&params, 10), 32000);
    }

    #[test]
    fn test_thinking_attached_to_body() {
        let messages = vec![ChatMessage::user("hard problem")];
        let params = AnthropicParams {
            thinking: Some(ThinkingParams {
                max_budget_tokens: 8192,
                adaptive: false,
            }),
            ..Default::default()
        };
        let body = AnthropicClient::build_body("claude-opus-4-20250514", &messages, &params, true);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["thinking"]["type"], "enabled");
        assert_eq!(json["thinking"]["budget_tokens"], 8192);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_parse_text_and_tool_use() {
        let body = r#"{
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Using a tool."},
                {"type": "tool_use", "id": "toolu_2", "name": "git_blame", "input": {"file": "a.rs", "line": 3}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 9, "output_tokens": 4}
        }"#;
        let completion = parse_response(body, "req", "claude-opus-4-20250514", 1).unwrap();
        assert_eq!(completion.text, "Using a tool.");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "git_blame");
        let args: Value = serde_json::from_str(&completion.tool_calls[0].arguments).unwrap();
        assert_eq!(args["line"], 3);
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}"#;
        assert!(parse_response(body, "req", "m", 0).is_err());
    }
}
