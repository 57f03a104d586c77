// src/llm/responses.rs
// Responses API client (Azure OpenAI preview surface, also served by
// api.openai.com/v1/responses). System text rides the top-level
// `instructions` field and streaming is a typed event stream.

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorKind};
use crate::llm::http::{AuthScheme, LlmHttpClient};
use crate::llm::types::{
    ChatMessage, Completion, FinishReason, ReasoningOptions, Role, StreamEvent, TokenUsage,
    ToolCall, ToolDef,
};

const OPENAI_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// Input item for the Responses API
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum InputItem {
    Message {
        role: String,
        content: String,
    },
    /// Echo of a prior model call; must precede its output item
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<&'a ReasoningOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// Responses API client
#[derive(Clone)]
pub struct ResponsesClient {
    http: LlmHttpClient,
    auth: AuthScheme,
    /// None ⇒ api.openai.com; Some ⇒ Azure endpoint (preview api-version)
    azure: Option<AzureTarget>,
}

#[derive(Debug, Clone)]
struct AzureTarget {
    endpoint: String,
    api_version: String,
}

/// Generation parameters for a Responses call
#[derive(Debug, Clone, Default)]
pub struct ResponsesParams {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub reasoning: Option<ReasoningOptions>,
    pub tools: Option<Vec<ToolDef>>,
    pub tool_choice: Option<String>,
    /// Reasoning models take system text as `developer` input items
    pub developer_role_for_system: bool,
}

impl ResponsesClient {
    pub fn openai(api_key: String) -> Self {
        Self {
            http: LlmHttpClient::new(),
            auth: AuthScheme::Bearer(api_key),
            azure: None,
        }
    }

    pub fn azure(api_key: String, endpoint: String, api_version: String) -> Self {
        Self {
            http: LlmHttpClient::new(),
            auth: AuthScheme::AzureApiKey(api_key),
            azure: Some(AzureTarget {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_version,
            }),
        }
    }

    fn url(&self) -> String {
        match &self.azure {
            Some(t) => format!("{}/openai/v1/responses?api-version={}", t.endpoint, t.api_version),
            None => OPENAI_RESPONSES_URL.to_string(),
        }
    }

    /// Split chat messages into (instructions, input items). System messages
    /// merge into `instructions`, unless the reasoning surface wants them as
    /// `developer` items instead.
    fn convert_messages(
        messages: &[ChatMessage],
        developer_role_for_system: bool,
    ) -> (Option<String>, Vec<InputItem>) {
        let mut instructions: Vec<String> = Vec::new();
        let mut items = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System | Role::Developer => {
                    if developer_role_for_system {
                        items.push(InputItem::Message {
                            role: "developer".into(),
                            content: msg.text().to_string(),
                        });
                    } else {
                        instructions.push(msg.text().to_string());
                    }
                }
                Role::Tool => {
                    items.push(InputItem::FunctionCallOutput {
                        call_id: msg.tool_call_id.clone().unwrap_or_default(),
                        output: msg.text().to_string(),
                    });
                }
                Role::Assistant => {
                    // Prior tool calls must be replayed before their outputs
                    if let Some(calls) = &msg.tool_calls {
                        for call in calls {
                            items.push(InputItem::FunctionCall {
                                call_id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            });
                        }
                    }
                    if msg.content.is_some() {
                        items.push(InputItem::Message {
                            role: "assistant".into(),
                            content: msg.text().to_string(),
                        });
                    }
                }
                Role::User => {
                    items.push(InputItem::Message {
                        role: "user".into(),
                        content: msg.text().to_string(),
                    });
                }
            }
        }

        let instructions = if instructions.is_empty() {
            None
        } else {
            Some(instructions.join("\n\n"))
        };
        (instructions, items)
    }

    fn build_body(
        model: &str,
        messages: &[ChatMessage],
        params: &ResponsesParams,
        stream: bool,
        request_id: &str,
    ) -> Result<String, ProviderError> {
        let (instructions, input) =
            Self::convert_messages(messages, params.developer_role_for_system);
        let request = ResponsesRequest {
            model,
            input,
            instructions,
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
            reasoning: params.reasoning.as_ref(),
            tools: params
                .tools
                .as_ref()
                .map(|ts| ts.iter().map(ToolDef::to_responses).collect()),
            tool_choice: params.tool_choice.as_deref(),
            stream,
        };
        serde_json::to_string(&request)
            .map_err(|e| ProviderError::new(ProviderErrorKind::BadRequest, e.to_string(), request_id))
    }

    /// Non-streaming completion
    pub async fn complete(
        &self,
        request_id: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &ResponsesParams,
    ) -> Result<Completion, ProviderError> {
        let start = Instant::now();
        let body = Self::build_body(model, messages, params, false, request_id)?;
        debug!(request_id = %request_id, model = %model, "Responses API request");

        let response_body = self
            .http
            .post_with_retry(request_id, &self.url(), &self.auth, body)
            .await?;

        parse_response(&response_body, request_id, model, start.elapsed().as_millis() as u64)
    }

    /// Streaming completion over the typed event stream
    pub async fn stream(
        &self,
        request_id: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &ResponsesParams,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let body = Self::build_body(model, messages, params, true, request_id)?;
        let response = self
            .http
            .post_streaming(request_id, &self.url(), &self.auth, body)
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
            format!("failed to parse responses body: {}", e),
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

    if let Some(output) = json["output"].as_array() {
        for item in output {
            match item["type"].as_str() {
                Some("message") => {
                    if let Some(parts) = item["content"].as_array() {
                        for part in parts {
                            if matches!(part["type"].as_str(), Some("output_text") | Some("text")) {
                                if let Some(t) = part["text"].as_str() {
                                    text.push_str(t);
                                }
                            }
                        }
                    }
                }
                Some("function_call") => {
                    tool_calls.push(ToolCall {
                        id: item["call_id"]
                            .as_str()
                            .or_else(|| item["id"].as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: item["name"].as_str().unwrap_or_default().to_string(),
                        arguments: item["arguments"].as_str().unwrap_or("{}").to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    // Convenience field some deployments return
    if text.is_empty() {
        if let Some(t) = json["output_text"].as_str() {
            text = t.to_string();
        }
    }

    let usage = json.get("usage").filter(|u| !u.is_null()).map(|u| {
        TokenUsage::new(
            u["input_tokens"].as_u64().unwrap_or(0) as u32,
            u["output_tokens"].as_u64().unwrap_or(0) as u32,
        )
    });

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
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

/// Translate the typed Responses event stream into StreamEvents. Call ids
/// map onto dense indexes so downstream accumulation is uniform.
async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>, request_id: String) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut call_indexes: HashMap<String, u32> = HashMap::new();
    let mut saw_tool_calls = false;
    let mut usage: Option<TokenUsage> = None;
    let mut done_sent = false;

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                warn!(request_id = %request_id, "Responses stream read failed: {}", e);
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
            if data == "[DONE]" {
                continue;
            }
            let Ok(json) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            match json["type"].as_str() {
                Some("response.output_text.delta") => {
                    if let Some(delta) = json["delta"].as_str() {
                        let _ = tx.send(StreamEvent::TextDelta(delta.to_string())).await;
                    }
                }
                Some("response.function_call.start") => {
                    saw_tool_calls = true;
                    let call_id = json["call_id"].as_str().unwrap_or_default().to_string();
                    let index = next_index(&mut call_indexes, &call_id);
                    let _ = tx
                        .send(StreamEvent::ToolCallStart {
                            index,
                            id: call_id,
                            name: json["name"].as_str().unwrap_or("unknown").to_string(),
                        })
                        .await;
                }
                Some("response.function_call.arguments.delta") => {
                    let call_id = json["call_id"].as_str().unwrap_or_default().to_string();
                    let index = next_index(&mut call_indexes, &call_id);
                    if let Some(delta) = json["delta"].as_str() {
                        let _ = tx
                            .send(StreamEvent::ToolCallDelta {
                                index,
                                arguments_delta: delta.to_string(),
                            })
                            .await;
                    }
                }
                Some("response.function_call.done") => {
                    // Accumulator finalizes on Done; nothing to emit per-call
                }
                Some("response.completed") => {
                    if let Some(u) = json.pointer("/response/usage").filter(|u| !u.is_null()) {
                        usage = Some(TokenUsage::new(
                            u["input_tokens"].as_u64().unwrap_or(0) as u32,
                            u["output_tokens"].as_u64().unwrap_or(0) as u32,
                        ));
                    }
                    let finish_reason = if saw_tool_calls {
                        FinishReason::ToolCalls
                    } else {
                        FinishReason::Stop
                    };
                    let _ = tx.send(StreamEvent::Done { finish_reason, usage }).await;
                    done_sent = true;
                }
                Some("response.failed") | Some("error") => {
                    let message = json
                        .pointer("/response/error/message")
                        .or_else(|| json.pointer("/error/message"))
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
        let finish_reason = if saw_tool_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        let _ = tx.send(StreamEvent::Done { finish_reason, usage }).await;
    }
}

fn next_index(indexes: &mut HashMap<String, u32>, call_id: &str) -> u32 {
    let next = indexes.len() as u32;
    *indexes.entry(call_id.to_string()).or_insert(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_merges_into_instructions() {
        let messages = vec![
            ChatMessage::system("You are concise."),
            ChatMessage::system("Answer in English."),
            ChatMessage::user("hi"),
        ];
        let (instructions, items) = ResponsesClient::convert_messages(&messages, false);
        assert_eq!(
            instructions.as_deref(),
            Some("You are concise.\n\nAnswer in English.")
        );
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_reasoning_surface_uses_developer_items() {
        let messages = vec![ChatMessage::system("rules"), ChatMessage::user("hi")];
        let (instructions, items) = ResponsesClient::convert_messages(&messages, true);
        assert!(instructions.is_none());
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[0]["type"], "message");
        assert_eq!(json[0]["role"], "developer");
    }

    #[test]
    fn test_tool_round_trip_items() {
        let messages = vec![
            ChatMessage::user("search something"),
            ChatMessage::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "call_9".into(),
                    name: "file_search".into(),
                    arguments: r#"{"q":"x"}"#.into(),
                }],
            ),
            ChatMessage::tool_result("call_9", "{\"success\":true}"),
        ];
        let (_, items) = ResponsesClient::convert_messages(&messages, false);
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[1]["type"], "function_call");
        assert_eq!(json[1]["call_id"], "call_9");
        assert_eq!(json[2]["type"], "function_call_output");
        assert_eq!(json[2]["call_id"], "call_9");
    }

    #[test]
    fn test_parse_message_and_function_call() {
        let body = r#"{
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "id": "r1"},
                {"type": "message", "content": [{"type": "output_text", "text": "Looking."}], "role": "assistant"},
                {"type": "function_call", "call_id": "c1", "name": "file_search", "arguments": "{\"q\":\"x\"}"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }"#;
        let completion = parse_response(body, "req", "o3", 5).unwrap();
        assert_eq!(completion.text, "Looking.");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
        assert_eq!(completion.usage.unwrap().input_tokens, 12);
    }

    #[test]
    fn test_parse_output_text_fallback() {
        let body = r#"{"output": [], "output_text": "direct"}"#;
        let completion = parse_response(body, "req", "gpt-4o", 0).unwrap();
        assert_eq!(completion.text, "direct");
        assert_eq!(completion.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_parse_inline_error() {
        let body = r#"{"error": {"message": "model_not_found: o9"}}"#;
        let err = parse_response(body, "req", "o9", 0).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ModelNotFound);
    }

    #[test]
    fn test_azure_url_layout() {
        let client =
            ResponsesClient::azure("k".into(), "https://res.openai.azure.com".into(), "preview".into());
        assert_eq!(
            client.url(),
            "https://res.openai.azure.com/openai/v1/responses?api-version=preview"
        );
    }

    #[test]
    fn test_call_id_index_mapping_is_stable() {
        let mut indexes = HashMap::new();
        assert_eq!(next_index(&mut indexes, "a"), 0);
        assert_eq!(next_index(&mut indexes, "b"), 1);
        assert_eq!(next_index(&mut indexes, "a"), 0);
    }
}
