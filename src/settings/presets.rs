// src/settings/presets.rs
// Named parameter bundles with per-provider sub-configurations, and the pure
// cross-provider adaptation applied when a preset lands on a different
// provider than it was authored for.

use once_cell::sync::Lazy;
use serde_json::{Map, Value, json};

use crate::llm::Provider;

/// A preset: per-provider sub-configurations keyed by provider name.
#[derive(Debug, Clone)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub provider_configs: Value,
}

/// Capability tiers used to map models across providers
const MODEL_EQUIVALENCE: &[(&str, &[(&str, &str)])] = &[
    (
        "small",
        &[
            ("openai", "gpt-4o-mini"),
            ("azure", "o4-mini"),
            ("anthropic", "claude-3-5-haiku-20241022"),
        ],
    ),
    (
        "medium",
        &[
            ("openai", "gpt-4o"),
            ("azure", "gpt-4.1"),
            ("anthropic", "claude-3-5-sonnet-20241022"),
        ],
    ),
    (
        "large",
        &[
            ("openai", "gpt-4o"),
            ("azure", "o3"),
            ("anthropic", "claude-opus-4-20250514"),
        ],
    ),
    (
        "latest",
        &[
            ("openai", "gpt-4o"),
            ("azure", "o3"),
            ("anthropic", "claude-sonnet-4-20250522"),
        ],
    ),
];

/// Known model → tier assignments
const MODEL_TIERS: &[(&str, &str)] = &[
    ("gpt-4o-mini", "small"),
    ("o4-mini", "small"),
    ("claude-3-5-haiku-20241022", "small"),
    ("gpt-4.1", "medium"),
    ("claude-3-5-sonnet-20241022", "medium"),
    ("o3-mini", "medium"),
    ("gpt-4o", "large"),
    ("o3", "large"),
    ("claude-opus-4-20250514", "large"),
    ("claude-sonnet-4-20250522", "latest"),
];

/// Azure models that force reasoning parameters
const AZURE_REASONING_MODELS: &[&str] = &["o3", "o3-mini", "o1", "o1-mini", "o4-mini"];

/// Anthropic thinking-capable models and their output ceilings
const ANTHROPIC_THINKING_MODELS: &[&str] =
    &["claude-opus-4-20250514", "claude-sonnet-4-20250522"];
const ANTHROPIC_MAX_OUTPUT: &[(&str, u64)] = &[
    ("claude-opus-4-20250514", 32_000),
    ("claude-sonnet-4-20250522", 64_000),
    ("claude-3-5-haiku-20241022", 8_000),
];

/// Fields each provider understands; foreign ones are stripped on adaptation
const AZURE_ONLY_FIELDS: &[&str] = &["use_responses_api"];
const ANTHROPIC_ONLY_FIELDS: &[&str] = &[
    "claude_extended_thinking",
    "claude_thinking_mode",
    "claude_thinking_budget_tokens",
];
const REASONING_FIELDS: &[&str] = &["enable_reasoning", "reasoning_effort"];

static PRESETS: Lazy<Vec<Preset>> = Lazy::new(|| {
    vec![
        Preset {
            id: "balanced",
            name: "Balanced",
            description: "Good balance of quality and speed",
            provider_configs: json!({
                "openai": {
                    "model_id": "gpt-4o-mini",
                    "temperature": 0.7,
                    "max_tokens": 2048,
                    "top_p": 0.95,
                },
                "azure": {
                    "model_id": "gpt-4.1",
                    "temperature": 0.7,
                    "max_tokens": 2048,
                    "top_p": 0.95,
                    "use_responses_api": true,
                },
                "anthropic": {
                    "model_id": "claude-3-5-sonnet-20241022",
                    "temperature": 0.7,
                    "max_tokens": 2048,
                    "top_p": 0.95,
                    "claude_extended_thinking": true,
                    "claude_thinking_mode": "enabled",
                }
            }),
        },
        Preset {
            id: "creative",
            name: "Creative",
            description: "More creative and varied responses",
            provider_configs: json!({
                "openai": {
                    "model_id": "gpt-4o",
                    "temperature": 1.2,
                    "max_tokens": 3000,
                    "top_p": 0.95,
                    "frequency_penalty": 0.2,
                    "presence_penalty": 0.2,
                },
                "azure": {
                    "model_id": "gpt-4.1",
                    "temperature": 1.2,
                    "max_tokens": 3000,
                    "top_p": 0.95,
                    "frequency_penalty": 0.2,
                    "presence_penalty": 0.2,
                    "use_responses_api": true,
                },
                "anthropic": {
                    "model_id": "claude-sonnet-4-20250522",
                    "temperature": 1.2,
                    "max_tokens": 3000,
                    "top_p": 0.95,
                    "frequency_penalty": 0.2,
                    "presence_penalty": 0.2,
                    "claude_extended_thinking": true,
                    "claude_thinking_mode": "enabled",
                }
            }),
        },
        Preset {
            id: "fast",
            name: "Fast",
            description: "Optimized for quick responses",
            provider_configs: json!({
                "openai": {
                    "model_id": "gpt-4o-mini",
                    "temperature": 0.7,
                    "max_tokens": 1024,
                },
                "azure": {
                    "model_id": "o4-mini",
                    "temperature": 0.7,
                    "max_tokens": 1024,
                    "enable_reasoning": true,
                    "reasoning_effort": "low",
                    "use_responses_api": true,
                },
                "anthropic": {
                    "model_id": "claude-3-5-haiku-20241022",
                    "temperature": 0.7,
                    "max_tokens": 1024,
                    "claude_extended_thinking": false,
                }
            }),
        },
        Preset {
            id: "powerful",
            name: "Powerful",
            description: "Maximum capability for complex tasks",
            provider_configs: json!({
                "openai": {
                    "model_id": "gpt-4o",
                    "temperature": 0.7,
                    "max_tokens": 4096,
                    "enable_reasoning": true,
                    "reasoning_effort": "high",
                },
                "azure": {
                    "model_id": "o3",
                    "temperature": 1.0,
                    "max_tokens": 100_000,
                    "enable_reasoning": true,
                    "reasoning_effort": "high",
                    "use_responses_api": true,
                },
                "anthropic": {
                    "model_id": "claude-opus-4-20250514",
                    "temperature": 0.7,
                    "max_tokens": 32_000,
                    "claude_extended_thinking": true,
                    "claude_thinking_mode": "aggressive",
                    "claude_thinking_budget_tokens": 65_536,
                }
            }),
        },
        Preset {
            id: "coding",
            name: "Coding Specialist",
            description: "Optimized for software development tasks",
            provider_configs: json!({
                "openai": {
                    "model_id": "gpt-4o",
                    "temperature": 0.2,
                    "max_tokens": 4096,
                    "top_p": 0.95,
                },
                "azure": {
                    "model_id": "o3",
                    "temperature": 1.0,
                    "max_tokens": 32_000,
                    "enable_reasoning": true,
                    "reasoning_effort": "medium",
                    "use_responses_api": true,
                },
                "anthropic": {
                    "model_id": "claude-opus-4-20250514",
                    "temperature": 0.2,
                    "max_tokens": 32_000,
                    "claude_extended_thinking": true,
                    "claude_thinking_mode": "enabled",
                    "claude_thinking_budget_tokens": 32_768,
                }
            }),
        },
    ]
});

pub fn available_presets() -> &'static [Preset] {
    &PRESETS
}

pub fn find_preset(id: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.id == id)
}

fn provider_key(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "openai",
        Provider::Azure => "azure",
        Provider::Anthropic => "anthropic",
    }
}

/// Providers to borrow a base config from when the preset lacks one
fn similarity_order(provider: Provider) -> [&'static str; 2] {
    match provider {
        Provider::Azure => ["openai", "anthropic"],
        Provider::OpenAi => ["azure", "anthropic"],
        Provider::Anthropic => ["openai", "azure"],
    }
}

fn model_tier(model_id: &str) -> Option<&'static str> {
    MODEL_TIERS
        .iter()
        .find(|(m, _)| *m == model_id)
        .map(|(_, tier)| *tier)
}

fn equivalent_model(tier: &str, provider: Provider) -> Option<&'static str> {
    MODEL_EQUIVALENCE
        .iter()
        .find(|(t, _)| *t == tier)
        .and_then(|(_, models)| {
            models
                .iter()
                .find(|(p, _)| *p == provider_key(provider))
                .map(|(_, m)| *m)
        })
}

/// Resolve a preset for a target provider: pick its sub-config (or adapt a
/// similar provider's one via the tier table), apply provider adjustments,
/// and strip provider-foreign fields. Pure; same inputs give same output.
pub fn adapt_preset_config(preset: &Preset, provider: Provider) -> Value {
    let key = provider_key(provider);
    let mut config: Map<String, Value> = match preset.provider_configs.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => adapt_from_similar(preset, provider),
    };

    apply_provider_adjustments(&mut config, provider);
    config.insert("provider".into(), Value::String(key.to_string()));
    clean_provider_fields(&mut config, provider);
    Value::Object(config)
}

fn adapt_from_similar(preset: &Preset, provider: Provider) -> Map<String, Value> {
    let mut base: Option<Map<String, Value>> = None;
    for similar in similarity_order(provider) {
        if let Some(Value::Object(map)) = preset.provider_configs.get(similar) {
            base = Some(map.clone());
            break;
        }
    }
    let mut config = base.unwrap_or_default();

    // Map the borrowed model onto the target provider via its tier
    if let Some(model_id) = config.get("model_id").and_then(|v| v.as_str()) {
        if let Some(replacement) = model_tier(model_id)
            .and_then(|tier| equivalent_model(tier, provider))
        {
            config.insert("model_id".into(), Value::String(replacement.to_string()));
        }
    }
    config
}

fn apply_provider_adjustments(config: &mut Map<String, Value>, provider: Provider) {
    let model_id = config
        .get("model_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match provider {
        Provider::Azure => {
            if AZURE_REASONING_MODELS.iter().any(|m| model_id.contains(m)) {
                // Azure reasoning models pin temperature and require reasoning
                config.insert("temperature".into(), json!(1.0));
                config.insert("enable_reasoning".into(), json!(true));
                config
                    .entry("reasoning_effort")
                    .or_insert_with(|| json!("medium"));
            }
            config.insert("use_responses_api".into(), json!(true));
        }
        Provider::Anthropic => {
            if ANTHROPIC_THINKING_MODELS.contains(&model_id.as_str()) {
                config.insert("claude_extended_thinking".into(), json!(true));
                config
                    .entry("claude_thinking_mode")
                    .or_insert_with(|| json!("enabled"));
                config
                    .entry("claude_thinking_budget_tokens")
                    .or_insert_with(|| json!(16_384));
            }
            if let Some((_, ceiling)) = ANTHROPIC_MAX_OUTPUT
                .iter()
                .find(|(m, _)| *m == model_id.as_str())
            {
                let requested = config.get("max_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                if requested > *ceiling {
                    config.insert("max_tokens".into(), json!(*ceiling));
                }
            }
        }
        Provider::OpenAi => {
            if config.get("enable_reasoning").and_then(|v| v.as_bool()) == Some(true) {
                config
                    .entry("reasoning_effort")
                    .or_insert_with(|| json!("medium"));
            }
        }
    }
}

fn clean_provider_fields(config: &mut Map<String, Value>, provider: Provider) {
    let to_remove: Vec<&str> = match provider {
        Provider::Azure => ANTHROPIC_ONLY_FIELDS.to_vec(),
        Provider::Anthropic => AZURE_ONLY_FIELDS
            .iter()
            .chain(REASONING_FIELDS.iter())
            .copied()
            .collect(),
        Provider::OpenAi => AZURE_ONLY_FIELDS
            .iter()
            .chain(ANTHROPIC_ONLY_FIELDS.iter())
            .copied()
            .collect(),
    };
    for field in to_remove {
        config.remove(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_present() {
        let ids: Vec<&str> = available_presets().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["balanced", "creative", "fast", "powerful", "coding"]);
        assert!(find_preset("powerful").is_some());
        assert!(find_preset("bogus").is_none());
    }

    #[test]
    fn test_powerful_on_anthropic() {
        let preset = find_preset("powerful").unwrap();
        let config = adapt_preset_config(preset, Provider::Anthropic);

        assert_eq!(config["model_id"], "claude-opus-4-20250514");
        assert_eq!(config["claude_extended_thinking"], true);
        assert_eq!(config["claude_thinking_mode"], "aggressive");
        assert_eq!(config["max_tokens"], 32_000);
        assert_eq!(config["provider"], "anthropic");
        assert!(config.get("use_responses_api").is_none());
        assert!(config.get("enable_reasoning").is_none());
        assert!(config.get("reasoning_effort").is_none());
    }

    #[test]
    fn test_powerful_on_azure_forces_reasoning_params() {
        let preset = find_preset("powerful").unwrap();
        let config = adapt_preset_config(preset, Provider::Azure);
        assert_eq!(config["model_id"], "o3");
        assert_eq!(config["temperature"], 1.0);
        assert_eq!(config["enable_reasoning"], true);
        assert_eq!(config["use_responses_api"], true);
        assert!(config.get("claude_extended_thinking").is_none());
    }

    #[test]
    fn test_openai_strips_foreign_fields() {
        let preset = find_preset("balanced").unwrap();
        let config = adapt_preset_config(preset, Provider::OpenAi);
        assert_eq!(config["model_id"], "gpt-4o-mini");
        assert!(config.get("use_responses_api").is_none());
        assert!(config.get("claude_thinking_mode").is_none());
    }

    #[test]
    fn test_idempotent_application() {
        let preset = find_preset("coding").unwrap();
        let first = adapt_preset_config(preset, Provider::Anthropic);
        let second = adapt_preset_config(preset, Provider::Anthropic);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tier_mapping() {
        assert_eq!(model_tier("gpt-4o"), Some("large"));
        assert_eq!(equivalent_model("large", Provider::Anthropic), Some("claude-opus-4-20250514"));
        assert_eq!(equivalent_model("small", Provider::Azure), Some("o4-mini"));
        assert_eq!(model_tier("unknown-model"), None);
    }

    #[test]
    fn test_anthropic_max_tokens_clamped() {
        // Borrow the azure powerful config (max_tokens 100k) and adapt it
        let preset = Preset {
            id: "custom",
            name: "Custom",
            description: "",
            provider_configs: json!({
                "azure": {
                    "model_id": "o3",
                    "max_tokens": 100_000,
                    "use_responses_api": true,
                }
            }),
        };
        let config = adapt_preset_config(&preset, Provider::Anthropic);
        // Tier mapping o3 (large) -> opus, then the opus ceiling applies
        assert_eq!(config["model_id"], "claude-opus-4-20250514");
        assert_eq!(config["max_tokens"], 32_000);
        assert!(config.get("use_responses_api").is_none());
    }
}
