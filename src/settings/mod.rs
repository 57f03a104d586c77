// src/settings/mod.rs
// Unified runtime configuration: one validated record over the config store,
// capability-gated against the model catalog, with preset application and
// live probing through the adapter.

mod presets;

pub use presets::{Preset, adapt_preset_config, available_presets, find_preset};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::db::{ConfigStore, ModelCatalog};
use crate::error::{LoupeError, Result};
use crate::llm::{
    AdapterSettings, ChatMessage, CompletionRequest, Provider, ProviderAdapter,
};

/// Probe timeout for live configuration tests
const TEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Fixed probe prompt
const TEST_PROMPT: &str = "Say 'test successful' and nothing else.";

/// The complete model configuration record. Provider-foreign fields stay
/// None/absent; cross-provider adaptation is a pure function over this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UnifiedConfig {
    pub provider: Provider,
    pub model_id: String,

    // Generation parameters
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    pub seed: Option<i64>,
    pub stream: bool,

    // Reasoning (OpenAI/Azure)
    pub enable_reasoning: bool,
    pub reasoning_effort: String,

    // Claude thinking
    pub claude_extended_thinking: Option<bool>,
    pub claude_thinking_mode: Option<String>,
    pub claude_thinking_budget_tokens: Option<u32>,
    pub claude_adaptive_thinking_budget: Option<bool>,

    // Provider surface
    pub use_responses_api: bool,

    // Overrides
    pub system_prompt: Option<String>,
    pub config_name: Option<String>,
}

impl Default for UnifiedConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model_id: "gpt-4o-mini".into(),
            temperature: Some(0.7),
            max_tokens: None,
            top_p: Some(1.0),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
            stop_sequences: None,
            seed: None,
            stream: false,
            enable_reasoning: false,
            reasoning_effort: "medium".into(),
            claude_extended_thinking: Some(true),
            claude_thinking_mode: Some("enabled".into()),
            claude_thinking_budget_tokens: Some(16_384),
            claude_adaptive_thinking_budget: Some(true),
            use_responses_api: false,
            system_prompt: None,
            config_name: None,
        }
    }
}

impl UnifiedConfig {
    /// Flatten to the runtime_config key space. The model id is stored under
    /// `chat_model`; None fields are omitted.
    pub fn to_runtime_config(&self) -> HashMap<String, Value> {
        let mut flat = HashMap::new();
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return flat;
        };
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            let key = if key == "model_id" { "chat_model".to_string() } else { key };
            flat.insert(key, value);
        }
        flat
    }

    /// Rebuild from the runtime key space; missing keys take defaults.
    pub fn from_runtime_config(config: &HashMap<String, Value>) -> Self {
        let mut map = Map::new();
        for (key, value) in config {
            let key = if key == "chat_model" { "model_id".to_string() } else { key.clone() };
            map.insert(key, value.clone());
        }
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }

    /// Adapter view of this configuration
    pub fn adapter_settings(&self) -> AdapterSettings {
        let mut settings = AdapterSettings::new(self.provider, self.model_id.clone());
        settings.temperature = self.temperature;
        settings.max_tokens = self.max_tokens;
        settings.top_p = self.top_p;
        settings.frequency_penalty = self.frequency_penalty;
        settings.presence_penalty = self.presence_penalty;
        settings.use_responses_api = self.use_responses_api;
        settings.reasoning_effort = self.reasoning_effort.clone();
        settings.claude_extended_thinking = self.claude_extended_thinking.unwrap_or(true);
        settings.claude_thinking_mode = self
            .claude_thinking_mode
            .clone()
            .unwrap_or_else(|| "enabled".into());
        settings.claude_thinking_budget_tokens =
            self.claude_thinking_budget_tokens.unwrap_or(16_384);
        settings.claude_adaptive_thinking_budget =
            self.claude_adaptive_thinking_budget.unwrap_or(true);
        settings
    }
}

/// Result of a configuration test
#[derive(Debug, Clone, Serialize)]
pub struct ConfigTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dry_run: bool,
}

pub struct SettingsService {
    store: Arc<ConfigStore>,
    catalog: Arc<ModelCatalog>,
    adapter: Arc<ProviderAdapter>,
    /// Env-derived provider requirements (endpoint/key presence)
    azure_configured: bool,
}

impl SettingsService {
    pub fn new(
        store: Arc<ConfigStore>,
        catalog: Arc<ModelCatalog>,
        adapter: Arc<ProviderAdapter>,
        azure_configured: bool,
    ) -> Self {
        Self {
            store,
            catalog,
            adapter,
            azure_configured,
        }
    }

    /// Current configuration from the store; defaults when unreadable.
    pub async fn get_current(&self) -> UnifiedConfig {
        match self.store.get_all().await {
            Ok(values) => UnifiedConfig::from_runtime_config(&values),
            Err(e) => {
                warn!("Failed to load config, using defaults: {}", e);
                UnifiedConfig::default()
            }
        }
    }

    /// Seed the store with defaults when empty.
    pub async fn initialize_defaults(&self) -> Result<()> {
        let existing = self.store.get_all().await?;
        if !existing.is_empty() {
            return Ok(());
        }
        let defaults = UnifiedConfig::default();
        self.store
            .set_many(defaults.to_runtime_config(), "system_init")
            .await?;
        info!("Initialized default model configuration");
        Ok(())
    }

    /// Apply a patch, validate the merged result and persist it. The adapter
    /// follows the stored configuration.
    pub async fn update(&self, patch: HashMap<String, Value>, actor: &str) -> Result<UnifiedConfig> {
        let mut merged = self.get_current().await.to_runtime_config();
        for (key, value) in patch {
            let key = if key == "model_id" { "chat_model".to_string() } else { key };
            merged.insert(key, value);
        }

        let mut config = UnifiedConfig::from_runtime_config(&merged);
        self.clamp_max_tokens(&mut config).await;
        let (valid, error) = self.validate(&config).await;
        if !valid {
            return Err(LoupeError::Validation(
                error.unwrap_or_else(|| "invalid configuration".into()),
            ));
        }

        self.store.set_many(config.to_runtime_config(), actor).await?;
        self.adapter.reconfigure(config.adapter_settings()).await?;
        Ok(config)
    }

    /// Validation pipeline: numeric ranges, provider requirements, then the
    /// model-capability gate.
    pub async fn validate(&self, config: &UnifiedConfig) -> (bool, Option<String>) {
        validate_config(config, &self.catalog, self.azure_configured).await
    }

    /// Clamp max_tokens to the model maximum (applied on update paths where
    /// rejection would be hostile).
    pub async fn clamp_max_tokens(&self, config: &mut UnifiedConfig) {
        let max = self.catalog.max_output_tokens(&config.model_id).await;
        if let Some(requested) = config.max_tokens {
            if requested > max {
                warn!(
                    requested,
                    max, "Clamping max_tokens to the model maximum"
                );
                config.max_tokens = Some(max);
            }
        }
    }

    /// Apply a named preset, adapting it across providers, then persist.
    pub async fn apply_preset(
        &self,
        preset_id: &str,
        target_provider: Option<Provider>,
        actor: &str,
    ) -> Result<UnifiedConfig> {
        let current = self.get_current().await;
        let provider = target_provider.unwrap_or(current.provider);

        let preset = find_preset(preset_id)
            .ok_or_else(|| LoupeError::Validation(format!("Preset '{}' not found", preset_id)))?;
        let adapted = adapt_preset_config(preset, provider);

        let mut patch: HashMap<String, Value> = adapted
            .as_object()
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        patch.insert("config_name".into(), Value::String(preset.id.to_string()));

        self.update(patch, actor).await
    }

    /// Test a configuration. Dry-run validates only; live mode briefly
    /// reconfigures the adapter, probes, and restores the snapshot.
    pub async fn test(&self, config: &UnifiedConfig, dry_run: bool) -> ConfigTestResult {
        let started = Instant::now();

        let (valid, error) = self.validate(config).await;
        if dry_run || !valid {
            return ConfigTestResult {
                success: valid,
                message: if valid {
                    "Configuration validation successful (dry-run)".into()
                } else {
                    "Configuration validation failed".into()
                },
                response_time_ms: Some(started.elapsed().as_millis() as u64),
                provider: config.provider.to_string(),
                model: config.model_id.clone(),
                error,
                dry_run: true,
            };
        }

        let snapshot = match self.adapter.reconfigure(config.adapter_settings()).await {
            Ok(s) => s,
            Err(e) => {
                return ConfigTestResult {
                    success: false,
                    message: "Adapter reconfiguration failed".into(),
                    response_time_ms: None,
                    provider: config.provider.to_string(),
                    model: config.model_id.clone(),
                    error: Some(e.to_string()),
                    dry_run: false,
                };
            }
        };

        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are a test assistant."),
            ChatMessage::user(TEST_PROMPT),
        ])
        .with_max_tokens(10);

        let probe = tokio::time::timeout(TEST_TIMEOUT, self.adapter.complete(request)).await;

        if let Err(e) = self.adapter.restore(snapshot).await {
            warn!("Failed to restore adapter after test: {}", e);
        }

        match probe {
            Ok(Ok(_)) => ConfigTestResult {
                success: true,
                message: "Configuration test successful".into(),
                response_time_ms: Some(started.elapsed().as_millis() as u64),
                provider: config.provider.to_string(),
                model: config.model_id.clone(),
                error: None,
                dry_run: false,
            },
            Ok(Err(e)) => ConfigTestResult {
                success: false,
                message: "Configuration test failed".into(),
                response_time_ms: Some(started.elapsed().as_millis() as u64),
                provider: config.provider.to_string(),
                model: config.model_id.clone(),
                error: Some(e.to_string()),
                dry_run: false,
            },
            Err(_) => ConfigTestResult {
                success: false,
                message: format!("Test timed out after {} seconds", TEST_TIMEOUT.as_secs()),
                response_time_ms: None,
                provider: config.provider.to_string(),
                model: config.model_id.clone(),
                error: Some("timeout".into()),
                dry_run: false,
            },
        }
    }
}

/// The validation pipeline behind `SettingsService::validate`: (1) numeric
/// ranges, (2) provider requirements, (3) model-capability gate.
pub async fn validate_config(
    config: &UnifiedConfig,
    catalog: &ModelCatalog,
    azure_configured: bool,
) -> (bool, Option<String>) {
    // (1) schema ranges
    if let Some(t) = config.temperature {
        if !(0.0..=2.0).contains(&t) {
            return (false, Some(format!("temperature {} out of range [0, 2]", t)));
        }
    }
    if let Some(p) = config.top_p {
        if !(0.0..=1.0).contains(&p) {
            return (false, Some(format!("top_p {} out of range [0, 1]", p)));
        }
    }
    for (name, value) in [
        ("frequency_penalty", config.frequency_penalty),
        ("presence_penalty", config.presence_penalty),
    ] {
        if let Some(v) = value {
            if !(-2.0..=2.0).contains(&v) {
                return (false, Some(format!("{} {} out of range [-2, 2]", name, v)));
            }
        }
    }
    if let Some(m) = config.max_tokens {
        if m == 0 || m > 128_000 {
            return (false, Some(format!("max_tokens {} out of range [1, 128000]", m)));
        }
    }
    if let Some(b) = config.claude_thinking_budget_tokens {
        if !(1024..=65_536).contains(&b) {
            return (
                false,
                Some(format!(
                    "claude_thinking_budget_tokens {} out of range [1024, 65536]",
                    b
                )),
            );
        }
    }
    if config.model_id.is_empty() {
        return (false, Some("model_id must not be empty".into()));
    }

    // (2) provider requirements
    if config.provider == Provider::Azure && !azure_configured {
        return (
            false,
            Some("Azure provider selected; ensure AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_API_KEY are configured".into()),
        );
    }
    if config.provider == Provider::Anthropic && config.enable_reasoning {
        return (
            false,
            Some("Claude models use extended thinking, not standard reasoning".into()),
        );
    }
    if config.use_responses_api && config.provider != Provider::Azure {
        return (false, Some("Responses API is only available for Azure provider".into()));
    }

    // (3) model-capability gate
    let capabilities = catalog.capabilities(&config.model_id).await;
    if capabilities.supports_reasoning {
        if let Some(t) = config.temperature {
            if (t - 1.0).abs() > f32::EPSILON {
                return (
                    false,
                    Some(format!(
                        "Reasoning model {} does not support temperature control",
                        config.model_id
                    )),
                );
            }
        }
    }
    if config.stream && !capabilities.supports_streaming {
        return (
            false,
            Some(format!("Model {} does not support streaming", config.model_id)),
        );
    }

    (true, None)
}
