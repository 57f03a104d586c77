// src/llm/adapter.rs
// One call surface over the three providers. Parameter shaping (reasoning
// restrictions, thinking budgets, surface selection) happens here so the
// chat loop never branches on provider.

use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ApiKeys;
use crate::db::{
    ModelCatalog, UsageEvent, UsageRecorder, requires_responses_api_static,
    supports_thinking_static,
};
use crate::error::{LoupeError, ProviderErrorKind, Result};
use crate::llm::anthropic::{AnthropicClient, AnthropicParams, ThinkingParams};
use crate::llm::openai::{ChatCompletionsClient, ChatParams};
use crate::llm::responses::{ResponsesClient, ResponsesParams};
use crate::llm::types::{Completion, CompletionRequest, ReasoningOptions, StreamEvent};
use crate::llm::Provider;

/// Model used when the active one turns out to be missing or inaccessible
const FALLBACK_MODEL: &str = "gpt-4o-mini";
/// Azure api-version for the Chat Completions surface
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";
/// Azure api-version selecting the Responses API preview surface
const RESPONSES_API_VERSION: &str = "preview";

/// Runtime-mutable adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub provider: Provider,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub use_responses_api: bool,
    pub reasoning_effort: String,
    pub claude_extended_thinking: bool,
    pub claude_thinking_mode: String,
    pub claude_thinking_budget_tokens: u32,
    pub claude_adaptive_thinking_budget: bool,
}

impl AdapterSettings {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: Some(0.7),
            max_tokens: None,
            top_p: Some(1.0),
            frequency_penalty: None,
            presence_penalty: None,
            use_responses_api: false,
            reasoning_effort: "medium".into(),
            claude_extended_thinking: true,
            claude_thinking_mode: "enabled".into(),
            claude_thinking_budget_tokens: 16_384,
            claude_adaptive_thinking_budget: true,
        }
    }
}

/// Restorable view of the adapter state, returned by `reconfigure`
#[derive(Debug, Clone)]
pub struct AdapterSnapshot {
    settings: AdapterSettings,
}

impl AdapterSnapshot {
    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }
}

/// Per-provider client set. OpenAI-compatible providers keep both surfaces
/// alive because eligibility is per-model.
#[derive(Clone)]
enum ClientSet {
    OpenAiLike {
        chat: ChatCompletionsClient,
        responses: ResponsesClient,
    },
    Anthropic(AnthropicClient),
}

struct AdapterState {
    settings: AdapterSettings,
    clients: ClientSet,
}

pub struct ProviderAdapter {
    catalog: Arc<ModelCatalog>,
    keys: ApiKeys,
    state: RwLock<AdapterState>,
    usage: Option<UsageRecorder>,
}

impl ProviderAdapter {
    pub fn new(
        settings: AdapterSettings,
        keys: ApiKeys,
        catalog: Arc<ModelCatalog>,
        usage: Option<UsageRecorder>,
    ) -> Result<Self> {
        let clients = build_clients(&settings, &keys)?;
        Ok(Self {
            catalog,
            keys,
            state: RwLock::new(AdapterState { settings, clients }),
            usage,
        })
    }

    /// Active provider and model
    pub async fn active(&self) -> (Provider, String) {
        let state = self.state.read().await;
        (state.settings.provider, state.settings.model.clone())
    }

    pub async fn settings(&self) -> AdapterSettings {
        self.state.read().await.settings.clone()
    }

    /// Swap the adapter configuration atomically. Returns a snapshot the
    /// caller can `restore()` after a temporary probe.
    pub async fn reconfigure(&self, settings: AdapterSettings) -> Result<AdapterSnapshot> {
        let clients = build_clients(&settings, &self.keys)?;
        let mut state = self.state.write().await;
        let snapshot = AdapterSnapshot {
            settings: state.settings.clone(),
        };
        info!(provider = %settings.provider, model = %settings.model, "Adapter reconfigured");
        *state = AdapterState { settings, clients };
        Ok(snapshot)
    }

    pub async fn restore(&self, snapshot: AdapterSnapshot) -> Result<()> {
        self.reconfigure(snapshot.settings).await.map(|_| ())
    }

    /// Non-streaming completion with model fallback on not-found.
    pub async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let request_id = Uuid::new_v4().to_string();
        let (clients, settings) = self.current().await;
        let model = request.model.clone().unwrap_or_else(|| settings.model.clone());

        match self
            .dispatch_complete(&clients, &settings, &model, &request, &request_id)
            .await
        {
            Ok(completion) => {
                self.record_usage(&settings, &completion, true);
                Ok(completion)
            }
            Err(err) if is_model_not_found(&err) && model != FALLBACK_MODEL => {
                warn!(
                    request_id = %request_id,
                    model = %model,
                    "Model unavailable, falling back to '{}'",
                    FALLBACK_MODEL
                );
                self.switch_model(FALLBACK_MODEL).await;
                let completion = self
                    .dispatch_complete(&clients, &settings, FALLBACK_MODEL, &request, &request_id)
                    .await?;
                self.record_usage(&settings, &completion, true);
                Ok(completion)
            }
            Err(err) => {
                let mut event = UsageEvent::chat(&model, &settings.provider.to_string());
                event.success = false;
                if let Some(usage) = &self.usage {
                    usage.record_detached(event);
                }
                Err(err)
            }
        }
    }

    /// Streaming completion. Delta events arrive on the returned channel;
    /// ModelNotFound before the first byte triggers the one-shot fallback.
    pub async fn stream(&self, request: CompletionRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let request_id = Uuid::new_v4().to_string();
        let (clients, settings) = self.current().await;
        let model = request.model.clone().unwrap_or_else(|| settings.model.clone());

        match self
            .dispatch_stream(&clients, &settings, &model, &request, &request_id)
            .await
        {
            Ok(rx) => Ok(rx),
            Err(err) if is_model_not_found(&err) && model != FALLBACK_MODEL => {
                warn!(
                    request_id = %request_id,
                    model = %model,
                    "Model unavailable, falling back to '{}'",
                    FALLBACK_MODEL
                );
                self.switch_model(FALLBACK_MODEL).await;
                self.dispatch_stream(&clients, &settings, FALLBACK_MODEL, &request, &request_id)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn current(&self) -> (ClientSet, AdapterSettings) {
        let state = self.state.read().await;
        (state.clients.clone(), state.settings.clone())
    }

    async fn switch_model(&self, model: &str) {
        let mut state = self.state.write().await;
        state.settings.model = model.to_string();
    }

    fn record_usage(&self, settings: &AdapterSettings, completion: &Completion, success: bool) {
        let Some(recorder) = &self.usage else { return };
        let mut event = UsageEvent::chat(&completion.model, &settings.provider.to_string());
        event.success = success;
        event.response_time_ms = completion.duration_ms as i64;
        if let Some(usage) = completion.usage {
            event.input_tokens = usage.input_tokens as i64;
            event.output_tokens = usage.output_tokens as i64;
        }
        recorder.record_detached(event);
    }

    async fn dispatch_complete(
        &self,
        clients: &ClientSet,
        settings: &AdapterSettings,
        model: &str,
        request: &CompletionRequest,
        request_id: &str,
    ) -> Result<Completion> {
        let reasoning = self.catalog.is_reasoning_model(model).await;
        match clients {
            ClientSet::Anthropic(client) => {
                let params = shape_anthropic(settings, request, model, reasoning);
                Ok(client.complete(request_id, model, &request.messages, &params).await?)
            }
            ClientSet::OpenAiLike { chat, responses } => {
                if use_responses_surface(settings, model) {
                    let params = shape_responses(settings, request, reasoning);
                    Ok(responses
                        .complete(request_id, model, &request.messages, &params)
                        .await?)
                } else {
                    let params = shape_chat(settings, request, reasoning);
                    Ok(chat.complete(request_id, model, &request.messages, &params).await?)
                }
            }
        }
    }

    async fn dispatch_stream(
        &self,
        clients: &ClientSet,
        settings: &AdapterSettings,
        model: &str,
        request: &CompletionRequest,
        request_id: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let reasoning = self.catalog.is_reasoning_model(model).await;
        match clients {
            ClientSet::Anthropic(client) => {
                let params = shape_anthropic(settings, request, model, reasoning);
                Ok(client.stream(request_id, model, &request.messages, &params).await?)
            }
            ClientSet::OpenAiLike { chat, responses } => {
                if use_responses_surface(settings, model) {
                    let params = shape_responses(settings, request, reasoning);
                    Ok(responses
                        .stream(request_id, model, &request.messages, &params)
                        .await?)
                } else {
                    let params = shape_chat(settings, request, reasoning);
                    Ok(chat.stream(request_id, model, &request.messages, &params).await?)
                }
            }
        }
    }
}

fn build_clients(settings: &AdapterSettings, keys: &ApiKeys) -> Result<ClientSet> {
    match settings.provider {
        Provider::OpenAi => {
            let key = keys
                .openai
                .clone()
                .ok_or_else(|| LoupeError::Config("OPENAI_API_KEY is not set".into()))?;
            Ok(ClientSet::OpenAiLike {
                chat: ChatCompletionsClient::openai(key.clone()),
                responses: ResponsesClient::openai(key),
            })
        }
        Provider::Azure => {
            let key = keys
                .azure
                .clone()
                .ok_or_else(|| LoupeError::Config("AZURE_OPENAI_API_KEY is not set".into()))?;
            let endpoint = keys
                .azure_endpoint
                .clone()
                .ok_or_else(|| LoupeError::Config("AZURE_OPENAI_ENDPOINT is not set".into()))?;
            let chat_version = keys
                .azure_api_version
                .clone()
                .filter(|v| v != RESPONSES_API_VERSION)
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
            Ok(ClientSet::OpenAiLike {
                chat: ChatCompletionsClient::azure(key.clone(), endpoint.clone(), chat_version),
                responses: ResponsesClient::azure(
                    key,
                    endpoint,
                    RESPONSES_API_VERSION.to_string(),
                ),
            })
        }
        Provider::Anthropic => {
            let key = keys
                .anthropic
                .clone()
                .ok_or_else(|| LoupeError::Config("ANTHROPIC_API_KEY is not set".into()))?;
            Ok(ClientSet::Anthropic(AnthropicClient::new(key)))
        }
    }
}

/// The Responses surface is selected only when enabled AND the model is in
/// the eligible set.
fn use_responses_surface(settings: &AdapterSettings, model: &str) -> bool {
    settings.use_responses_api && requires_responses_api_static(model)
}

/// Reasoning models take temperature=1.0 and none of the sampling knobs.
fn effective_temperature(
    settings: &AdapterSettings,
    request: &CompletionRequest,
    reasoning: bool,
) -> Option<f32> {
    if reasoning {
        Some(1.0)
    } else {
        request.temperature.or(settings.temperature)
    }
}

fn shape_chat(settings: &AdapterSettings, request: &CompletionRequest, reasoning: bool) -> ChatParams {
    ChatParams {
        temperature: effective_temperature(settings, request, reasoning),
        max_tokens: request.max_tokens.or(settings.max_tokens),
        top_p: if reasoning { None } else { request.top_p.or(settings.top_p) },
        frequency_penalty: if reasoning {
            None
        } else {
            request.frequency_penalty.or(settings.frequency_penalty)
        },
        presence_penalty: if reasoning {
            None
        } else {
            request.presence_penalty.or(settings.presence_penalty)
        },
        tools: request.tools.clone(),
        tool_choice: request.tool_choice.clone(),
        parallel_tool_calls: request.parallel_tool_calls,
    }
}

fn shape_responses(
    settings: &AdapterSettings,
    request: &CompletionRequest,
    reasoning: bool,
) -> ResponsesParams {
    ResponsesParams {
        // The Responses surface rejects sampling params on reasoning models
        temperature: if reasoning {
            None
        } else {
            request.temperature.or(settings.temperature)
        },
        max_output_tokens: request.max_tokens.or(settings.max_tokens),
        reasoning: if reasoning {
            Some(request.reasoning.clone().unwrap_or(ReasoningOptions {
                effort: settings.reasoning_effort.clone(),
                summary: Some("auto".into()),
            }))
        } else {
            None
        },
        tools: request.tools.clone(),
        tool_choice: request.tool_choice.clone(),
        developer_role_for_system: reasoning,
    }
}

fn shape_anthropic(
    settings: &AdapterSettings,
    request: &CompletionRequest,
    model: &str,
    reasoning: bool,
) -> AnthropicParams {
    let thinking = if settings.claude_extended_thinking
        && settings.claude_thinking_mode != "off"
        && supports_thinking_static(model)
    {
        Some(ThinkingParams {
            max_budget_tokens: settings.claude_thinking_budget_tokens,
            // Aggressive mode always spends the full budget
            adaptive: settings.claude_adaptive_thinking_budget
                && settings.claude_thinking_mode != "aggressive",
        })
    } else {
        None
    };

    // Thinking requires temperature 1.0
    let temperature = if thinking.is_some() {
        Some(1.0)
    } else {
        effective_temperature(settings, request, reasoning)
    };

    AnthropicParams {
        temperature,
        max_tokens: request.max_tokens.or(settings.max_tokens),
        top_p: if thinking.is_some() { None } else { request.top_p.or(settings.top_p) },
        tools: request.tools.clone(),
        thinking,
    }
}

fn is_model_not_found(err: &LoupeError) -> bool {
    matches!(
        err,
        LoupeError::Provider(p) if p.kind == ProviderErrorKind::ModelNotFound
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anthropic_settings() -> AdapterSettings {
        AdapterSettings::new(Provider::Anthropic, "claude-opus-4-20250514")
    }

    #[test]
    fn test_use_responses_surface_needs_both_conditions() {
        let mut settings = AdapterSettings::new(Provider::Azure, "o3");
        assert!(!use_responses_surface(&settings, "o3"));
        settings.use_responses_api = true;
        assert!(use_responses_surface(&settings, "o3"));
        assert!(use_responses_surface(&settings, "gpt-4o"));
        assert!(!use_responses_surface(&settings, "gpt-35-turbo"));
    }

    #[test]
    fn test_reasoning_shaping_forces_temperature() {
        let settings = AdapterSettings::new(Provider::Azure, "o3");
        let request = CompletionRequest::new(vec![]).with_temperature(0.2);

        let chat = shape_chat(&settings, &request, true);
        assert_eq!(chat.temperature, Some(1.0));
        assert!(chat.top_p.is_none());
        assert!(chat.frequency_penalty.is_none());

        let chat = shape_chat(&settings, &request, false);
        assert_eq!(chat.temperature, Some(0.2));
        assert_eq!(chat.top_p, Some(1.0));
    }

    #[test]
    fn test_responses_shaping_reasoning_params() {
        let mut settings = AdapterSettings::new(Provider::Azure, "o3");
        settings.reasoning_effort = "high".into();
        let request = CompletionRequest::new(vec![]);

        let params = shape_responses(&settings, &request, true);
        assert!(params.temperature.is_none());
        assert_eq!(params.reasoning.as_ref().map(|r| r.effort.as_str()), Some("high"));
        assert!(params.developer_role_for_system);

        let params = shape_responses(&settings, &request, false);
        assert!(params.reasoning.is_none());
        assert!(!params.developer_role_for_system);
    }

    #[test]
    fn test_anthropic_thinking_attached_for_capable_model() {
        let settings = anthropic_settings();
        let request = CompletionRequest::new(vec![]);
        let params = shape_anthropic(&settings, &request, "claude-opus-4-20250514", false);
        assert!(params.thinking.is_some());
        assert_eq!(params.temperature, Some(1.0));
        assert!(params.top_p.is_none());
    }

    #[test]
    fn test_anthropic_thinking_skipped_for_haiku() {
        let settings = anthropic_settings();
        let request = CompletionRequest::new(vec![]);
        let params = shape_anthropic(&settings, &request, "claude-3-5-haiku-20241022", false);
        assert!(params.thinking.is_none());
        assert_eq!(params.temperature, Some(0.7));
    }

    #[test]
    fn test_aggressive_mode_disables_adaptive_budget() {
        let mut settings = anthropic_settings();
        settings.claude_thinking_mode = "aggressive".into();
        let request = CompletionRequest::new(vec![]);
        let params = shape_anthropic(&settings, &request, "claude-opus-4-20250514", false);
        assert!(!params.thinking.unwrap().adaptive);
    }

    #[test]
    fn test_thinking_mode_off_disables_thinking() {
        let mut settings = anthropic_settings();
        settings.claude_thinking_mode = "off".into();
        let request = CompletionRequest::new(vec![]);
        let params = shape_anthropic(&settings, &request, "claude-opus-4-20250514", false);
        assert!(params.thinking.is_none());
    }

    #[test]
    fn test_build_clients_requires_keys() {
        let settings = AdapterSettings::new(Provider::OpenAi, "gpt-4o");
        assert!(build_clients(&settings, &ApiKeys::default()).is_err());

        let keys = ApiKeys {
            openai: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(build_clients(&settings, &keys).is_ok());
    }

    #[test]
    fn test_build_clients_azure_needs_endpoint() {
        let settings = AdapterSettings::new(Provider::Azure, "gpt-4.1");
        let keys = ApiKeys {
            azure: Some("key".into()),
            ..Default::default()
        };
        assert!(build_clients(&settings, &keys).is_err());
    }
}
