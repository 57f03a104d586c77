// src/llm/mod.rs
// LLM provider adapter: one call surface over OpenAI, Azure OpenAI and Anthropic

mod adapter;
mod anthropic;
mod http;
mod openai;
mod responses;
mod types;

pub use adapter::{AdapterSnapshot, AdapterSettings, ProviderAdapter};
pub use anthropic::AnthropicClient;
pub use http::{AuthScheme, LlmHttpClient};
pub use openai::ChatCompletionsClient;
pub use responses::ResponsesClient;
pub use types::{
    ChatMessage, Completion, CompletionRequest, FinishReason, ReasoningOptions, Role, StreamEvent,
    TokenUsage, ToolCall, ToolDef,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Azure,
    Anthropic,
}

impl Provider {
    /// Parse provider from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "azure" => Some(Self::Azure),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Azure => "AZURE_OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Default model for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Azure => "gpt-4.1",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Azure => write!(f, "azure"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(Provider::from_str("openai"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_str("Azure"), Some(Provider::Azure));
        assert_eq!(Provider::from_str("ANTHROPIC"), Some(Provider::Anthropic));
        assert_eq!(Provider::from_str("gemini"), None);
        assert_eq!(Provider::from_str(""), None);
    }

    #[test]
    fn test_provider_display_roundtrip() {
        for p in [Provider::OpenAi, Provider::Azure, Provider::Anthropic] {
            assert_eq!(Provider::from_str(&p.to_string()), Some(p));
        }
    }

    #[test]
    fn test_provider_api_key_env_var() {
        assert_eq!(Provider::OpenAi.api_key_env_var(), "OPENAI_API_KEY");
        assert_eq!(Provider::Azure.api_key_env_var(), "AZURE_OPENAI_API_KEY");
        assert_eq!(Provider::Anthropic.api_key_env_var(), "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_provider_default_model() {
        assert_eq!(Provider::OpenAi.default_model(), "gpt-4o-mini");
        assert_eq!(Provider::Azure.default_model(), "gpt-4.1");
        assert_eq!(
            Provider::Anthropic.default_model(),
            "claude-3-5-sonnet-20241022"
        );
    }
}
