// src/llm/openai.rs
// Chat Completions client, shared by OpenAI and Azure OpenAI (identical wire
// shape; Azure differs only in URL layout and auth header).

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::llm::http::{AuthScheme, LlmHttpClient};
use crate::llm::types::{
    ChatMessage, Completion, FinishReason, StreamEvent, TokenUsage, ToolCall, ToolDef,
};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Wire request (OpenAI-compatible)
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

/// Non-streaming response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Chat Completions client
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: LlmHttpClient,
    auth: AuthScheme,
    /// None ⇒ api.openai.com; Some ⇒ Azure endpoint + api-version
    azure: Option<AzureTarget>,
}

#[derive(Debug, Clone)]
struct AzureTarget {
    endpoint: String,
    api_version: String,
}

impl ChatCompletionsClient {
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

    fn url_for(&self, model: &str) -> String {
        match &self.azure {
            Some(t) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                t.endpoint, model, t.api_version
            ),
            None => OPENAI_CHAT_URL.to_string(),
        }
    }

    fn build_request<'a>(
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &'a ChatParams,
        stream: bool,
    ) -> ChatRequest<'a> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                // The Chat Completions surface has no developer role
                role: match m.role {
                    crate::llm::Role::Developer => "system",
                    other => other.as_str(),
                },
                content: m.content.as_deref(),
                tool_calls: m.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "id": c.id,
                                "type": "function",
                                "function": {"name": c.name, "arguments": c.arguments},
                            })
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.as_deref(),
            })
            .collect();

        ChatRequest {
            model,
            messages: wire_messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            tools: params
                .tools
                .as_ref()
                .map(|ts| ts.iter().map(ToolDef::to_openai).collect()),
            tool_choice: params.tool_choice.as_deref(),
            parallel_tool_calls: params.parallel_tool_calls,
            stream,
        }
    }

    /// Non-streaming completion
    pub async fn complete(
        &self,
        request_id: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<Completion, ProviderError> {
        let start = Instant::now();
        let request = Self::build_request(model, messages, params, false);
        let body = serde_json::to_string(&request).map_err(|e| {
            ProviderError::new(
                crate::error::ProviderErrorKind::BadRequest,
                e.to_string(),
                request_id,
            )
        })?;
        debug!(request_id = %request_id, model = %model, "Chat Completions request");

        let response_body = self
            .http
            .post_with_retry(request_id, &self.url_for(model), &self.auth, body)
            .await?;

        parse_completion(&response_body, request_id, model, start.elapsed().as_millis() as u64)
    }

    /// Streaming completion; deltas arrive on the returned channel.
    pub async fn stream(
        &self,
        request_id: &str,
        model: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let request = Self::build_request(model, messages, params, true);
        let body = serde_json::to_string(&request).map_err(|e| {
            ProviderError::new(
                crate::error::ProviderErrorKind::BadRequest,
                e.to_string(),
                request_id,
            )
        })?;

        let response = self
            .http
            .post_streaming(request_id, &self.url_for(model), &self.auth, body)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            pump_sse(response, tx, request_id).await;
        });
        Ok(rx)
    }
}

/// Generation parameters already shaped by the adapter (reasoning-model
/// restrictions applied upstream).
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub tools: Option<Vec<ToolDef>>,
    pub tool_choice: Option<String>,
    pub parallel_tool_calls: Option<bool>,
}

fn parse_completion(
    body: &str,
    request_id: &str,
    model: &str,
    duration_ms: u64,
) -> Result<Completion, ProviderError> {
    let data: ChatResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::new(
            crate::error::ProviderErrorKind::Transient,
            format!("failed to parse chat response: {}", e),
            request_id,
        )
    })?;

    let (text, tool_calls, finish) = match data.choices.into_iter().next() {
        Some(choice) => {
            let calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect();
            let finish = match choice.finish_reason.as_deref() {
                Some("tool_calls") => FinishReason::ToolCalls,
                Some("length") => FinishReason::Length,
                Some("content_filter") => FinishReason::ContentFilter,
                _ if !calls.is_empty() => FinishReason::ToolCalls,
                _ => FinishReason::Stop,
            };
            (choice.message.content.unwrap_or_default(), calls, finish)
        }
        None => (String::new(), Vec::new(), FinishReason::Stop),
    };

    Ok(Completion {
        request_id: request_id.to_string(),
        text,
        tool_calls,
        usage: data
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        finish_reason: finish,
        model: model.to_string(),
        duration_ms,
    })
}

/// Read the SSE byte stream, translating each `data:` chunk into StreamEvents.
async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>, request_id: String) {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    // Indexes for which a ToolCallStart was already emitted
    let mut started: HashMap<u32, ()> = HashMap::new();
    let mut finish = FinishReason::Stop;
    let mut usage: Option<TokenUsage> = None;
    let mut done_sent = false;

    while let Some(chunk_result) = stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                warn!(request_id = %request_id, "Stream read failed: {}", e);
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
                let _ = tx.send(StreamEvent::Done { finish_reason: finish, usage }).await;
                done_sent = true;
                continue;
            }

            let Ok(json) = serde_json::from_str::<Value>(data) else {
                continue;
            };

            if let Some(u) = json.get("usage").filter(|u| !u.is_null()) {
                usage = Some(TokenUsage::new(
                    u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                    u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                ));
            }

            let Some(choice) = json["choices"].get(0) else {
                continue;
            };

            if let Some(reason) = choice["finish_reason"].as_str() {
                finish = match reason {
                    "tool_calls" => FinishReason::ToolCalls,
                    "length" => FinishReason::Length,
                    "content_filter" => FinishReason::ContentFilter,
                    _ => FinishReason::Stop,
                };
            }

            let delta = &choice["delta"];
            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    let index = call["index"].as_u64().unwrap_or(0) as u32;
                    if let Some(name) = call["function"]["name"].as_str() {
                        if !started.contains_key(&index) {
                            started.insert(index, ());
                            let id = call["id"]
                                .as_str()
                                .map(String::from)
                                .unwrap_or_else(|| format!("call_{}", index));
                            let _ = tx
                                .send(StreamEvent::ToolCallStart {
                                    index,
                                    id,
                                    name: name.to_string(),
                                })
                                .await;
                        }
                    }
                    if let Some(args) = call["function"]["arguments"].as_str() {
                        if !args.is_empty() {
                            let _ = tx
                                .send(StreamEvent::ToolCallDelta {
                                    index,
                                    arguments_delta: args.to_string(),
                                })
                                .await;
                        }
                    }
                }
            } else if let Some(content) = delta["content"].as_str() {
                if !content.is_empty() {
                    let _ = tx.send(StreamEvent::TextDelta(content.to_string())).await;
                }
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
    use crate::llm::Role;

    #[test]
    fn test_parse_simple_response() {
        let json = r#"{
            "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;

        let result = parse_completion(json, "req-1", "gpt-4o-mini", 42).unwrap();
        assert_eq!(result.text, "Hello!");
        assert!(result.tool_calls.is_empty());
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.usage.unwrap().input_tokens, 10);
        assert_eq!(result.duration_ms, 42);
    }

    #[test]
    fn test_parse_tool_call_response() {
        let json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "file_search", "arguments": "{\"q\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": null
        }"#;

        let result = parse_completion(json, "req-2", "gpt-4o", 0).unwrap();
        assert!(result.text.is_empty());
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].name, "file_search");
        assert_eq!(result.tool_calls[0].arguments, r#"{"q":"x"}"#);
    }

    #[test]
    fn test_parse_empty_choices() {
        let result = parse_completion(r#"{"choices": [], "usage": null}"#, "req", "m", 0).unwrap();
        assert!(result.text.is_empty());
        assert!(result.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_invalid_json_errors() {
        assert!(parse_completion("not json", "req", "m", 0).is_err());
    }

    #[test]
    fn test_azure_url_layout() {
        let client = ChatCompletionsClient::azure(
            "key".into(),
            "https://res.openai.azure.com/".into(),
            "2024-10-21".into(),
        );
        assert_eq!(
            client.url_for("gpt-4.1"),
            "https://res.openai.azure.com/openai/deployments/gpt-4.1/chat/completions?api-version=2024-10-21"
        );

        let client = ChatCompletionsClient::openai("key".into());
        assert_eq!(client.url_for("gpt-4o"), OPENAI_CHAT_URL);
    }

    #[test]
    fn test_developer_role_downgrades_to_system() {
        let messages = vec![ChatMessage::developer("rules")];
        let params = ChatParams::default();
        let request = ChatCompletionsClient::build_request("gpt-4o", &messages, &params, false);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn test_tool_result_serialization() {
        let messages = vec![
            ChatMessage::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "c1".into(),
                    name: "file_search".into(),
                    arguments: "{}".into(),
                }],
            ),
            ChatMessage::tool_result("c1", "{\"success\":true}"),
        ];
        let params = ChatParams::default();
        let request = ChatCompletionsClient::build_request("gpt-4o", &messages, &params, false);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["tool_calls"][0]["function"]["name"], "file_search");
        assert_eq!(json["messages"][1]["role"], "tool");
        assert_eq!(json["messages"][1]["tool_call_id"], "c1");
        assert_eq!(messages[0].role, Role::Assistant);
    }

    #[test]
    fn test_stream_flag_omitted_when_false() {
        let messages = vec![ChatMessage::user("hi")];
        let params = ChatParams::default();
        let request = ChatCompletionsClient::build_request("gpt-4o", &messages, &params, false);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stream").is_none());

        let request = ChatCompletionsClient::build_request("gpt-4o", &messages, &params, true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
    }
}
