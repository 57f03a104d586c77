// tests/config_roundtrip.rs
// Runtime-config round-trips and preset application semantics.

use loupe::llm::Provider;
use loupe::settings::{UnifiedConfig, adapt_preset_config, find_preset};

#[test]
fn roundtrip_is_identity_modulo_defaults() {
    let config = UnifiedConfig {
        provider: Provider::Azure,
        model_id: "o3".into(),
        temperature: Some(1.0),
        max_tokens: Some(32_000),
        use_responses_api: true,
        enable_reasoning: true,
        reasoning_effort: "high".into(),
        ..Default::default()
    };

    let flat = config.to_runtime_config();
    let restored = UnifiedConfig::from_runtime_config(&flat);
    assert_eq!(restored, config);

    // A second trip through the key space changes nothing
    let twice = UnifiedConfig::from_runtime_config(&restored.to_runtime_config());
    assert_eq!(twice, config);
}

#[test]
fn model_id_is_stored_under_chat_model() {
    let config = UnifiedConfig::default();
    let flat = config.to_runtime_config();
    assert!(flat.contains_key("chat_model"));
    assert!(!flat.contains_key("model_id"));
    // Keys obey the runtime_config key grammar
    for key in flat.keys() {
        assert!(
            key.chars().next().unwrap().is_ascii_lowercase(),
            "bad key {}",
            key
        );
        assert!(
            key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
            "bad key {}",
            key
        );
    }
}

#[test]
fn preset_application_is_idempotent() {
    for preset_id in ["balanced", "creative", "fast", "powerful", "coding"] {
        let preset = find_preset(preset_id).unwrap();
        for provider in [Provider::OpenAi, Provider::Azure, Provider::Anthropic] {
            let once = adapt_preset_config(preset, provider);
            let twice = adapt_preset_config(preset, provider);
            assert_eq!(once, twice, "{} on {} not stable", preset_id, provider);
        }
    }
}

#[test]
fn powerful_preset_adapts_to_anthropic() {
    let preset = find_preset("powerful").unwrap();
    let config = adapt_preset_config(preset, Provider::Anthropic);

    assert_eq!(config["model_id"], "claude-opus-4-20250514");
    assert_eq!(config["claude_extended_thinking"], true);
    assert_eq!(config["claude_thinking_mode"], "aggressive");
    assert_eq!(config["max_tokens"], 32_000);
    for foreign in ["use_responses_api", "enable_reasoning", "reasoning_effort"] {
        assert!(
            config.get(foreign).is_none(),
            "field {} should be stripped for anthropic",
            foreign
        );
    }
}

#[test]
fn preset_payload_merges_into_valid_config() {
    let preset = find_preset("powerful").unwrap();
    let adapted = adapt_preset_config(preset, Provider::Anthropic);

    // Merge the way the settings service does: over the current flat config
    let mut flat = UnifiedConfig {
        provider: Provider::Anthropic,
        model_id: "claude-3-opus".into(),
        ..Default::default()
    }
    .to_runtime_config();
    for (key, value) in adapted.as_object().unwrap() {
        let key = if key == "model_id" { "chat_model".to_string() } else { key.clone() };
        flat.insert(key, value.clone());
    }

    let merged = UnifiedConfig::from_runtime_config(&flat);
    assert_eq!(merged.provider, Provider::Anthropic);
    assert_eq!(merged.model_id, "claude-opus-4-20250514");
    assert_eq!(merged.max_tokens, Some(32_000));
    assert_eq!(merged.claude_thinking_mode.as_deref(), Some("aggressive"));
    assert!(!merged.enable_reasoning);
    assert!(!merged.use_responses_api);
}
