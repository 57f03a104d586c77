// src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

use tracing::{debug, info, warn};

use crate::llm::Provider;

/// API keys and provider endpoints loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// OpenAI API key (OPENAI_API_KEY)
    pub openai: Option<String>,
    /// Azure OpenAI API key (AZURE_OPENAI_API_KEY)
    pub azure: Option<String>,
    /// Azure OpenAI endpoint (AZURE_OPENAI_ENDPOINT)
    pub azure_endpoint: Option<String>,
    /// Azure OpenAI API version (AZURE_OPENAI_API_VERSION), "preview" selects the Responses API
    pub azure_api_version: Option<String>,
    /// Anthropic API key (ANTHROPIC_API_KEY)
    pub anthropic: Option<String>,
}

impl ApiKeys {
    /// Load API keys from environment variables (single source of truth)
    pub fn from_env() -> Self {
        let keys = Self {
            openai: read_var("OPENAI_API_KEY"),
            azure: read_var("AZURE_OPENAI_API_KEY"),
            azure_endpoint: read_var("AZURE_OPENAI_ENDPOINT"),
            azure_api_version: read_var("AZURE_OPENAI_API_VERSION"),
            anthropic: read_var("ANTHROPIC_API_KEY"),
        };
        keys.log_status();
        keys
    }

    /// Check if any chat provider is usable
    pub fn has_llm_provider(&self) -> bool {
        self.openai.is_some() || self.has_azure() || self.anthropic.is_some()
    }

    /// Azure needs both a key and an endpoint
    pub fn has_azure(&self) -> bool {
        self.azure.is_some() && self.azure_endpoint.is_some()
    }

    /// Embeddings ride the OpenAI key
    pub fn has_embeddings(&self) -> bool {
        self.openai.is_some()
    }

    pub fn key_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Azure => self.azure.as_deref(),
            Provider::Anthropic => self.anthropic.as_deref(),
        }
    }

    fn log_status(&self) {
        let mut available = Vec::new();
        if self.openai.is_some() {
            available.push("OpenAI");
        }
        if self.has_azure() {
            available.push("Azure OpenAI");
        }
        if self.anthropic.is_some() {
            available.push("Anthropic");
        }

        if available.is_empty() {
            warn!("No API keys configured - LLM features will be unavailable");
        } else {
            debug!(keys = ?available, "API keys loaded");
        }
    }

    /// Get a summary of available providers
    pub fn summary(&self) -> String {
        let mut providers = Vec::new();
        if self.openai.is_some() {
            providers.push("OpenAI");
        }
        if self.has_azure() {
            providers.push("Azure OpenAI");
        }
        if self.anthropic.is_some() {
            providers.push("Anthropic");
        }
        if providers.is_empty() {
            "None".to_string()
        } else {
            providers.join(", ")
        }
    }
}

/// Which vector backend to run (VECTOR_STORE_TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorStoreKind {
    #[default]
    PgVector,
    Qdrant,
}

/// Vector store configuration from environment variables
#[derive(Debug, Clone, Default)]
pub struct VectorConfig {
    pub kind: VectorStoreKind,
    /// Qdrant endpoint (QDRANT_URL)
    pub qdrant_url: Option<String>,
    /// Qdrant API key (QDRANT_API_KEY)
    pub qdrant_api_key: Option<String>,
    /// Embedding dimensions; fixed by the embedding model
    pub dimensions: usize,
}

impl VectorConfig {
    pub fn from_env() -> Self {
        let kind = match read_var("VECTOR_STORE_TYPE").as_deref() {
            Some("qdrant") => VectorStoreKind::Qdrant,
            Some("pgvector") | None => VectorStoreKind::PgVector,
            Some(other) => {
                warn!(value = other, "Unknown VECTOR_STORE_TYPE, using pgvector");
                VectorStoreKind::PgVector
            }
        };

        Self {
            kind,
            qdrant_url: read_var("QDRANT_URL"),
            qdrant_api_key: read_var("QDRANT_API_KEY"),
            dimensions: crate::embeddings::EMBEDDING_DIM,
        }
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for w in &self.warnings {
                lines.push(format!("  - {}", w));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub api_keys: ApiKeys,
    pub vector: VectorConfig,
    /// Active provider override (LLM_PROVIDER)
    pub default_provider: Option<Provider>,
    /// Default chat model (LLM_DEFAULT_MODEL)
    pub default_model: Option<String>,
    /// Relational store (DATABASE_URL)
    pub database_url: Option<String>,
    /// External cache endpoint (REDIS_URL); recognized, L1 stays authoritative
    pub redis_url: Option<String>,
    /// Bearer token the chat channel accepts (LOUPE_AUTH_TOKEN)
    pub auth_token: Option<String>,
    /// External static analyzer command for lint: queries (LOUPE_ANALYZER_CMD)
    pub analyzer_cmd: Option<String>,
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");

        let default_provider = read_var("LLM_PROVIDER").and_then(|s| {
            let parsed = Provider::from_str(&s);
            if parsed.is_none() {
                warn!(value = %s, "Unknown LLM_PROVIDER, valid options: openai, azure, anthropic");
            }
            parsed
        });

        Self {
            api_keys: ApiKeys::from_env(),
            vector: VectorConfig::from_env(),
            default_provider,
            default_model: read_var("LLM_DEFAULT_MODEL"),
            database_url: read_var("DATABASE_URL"),
            redis_url: read_var("REDIS_URL"),
            auth_token: read_var("LOUPE_AUTH_TOKEN"),
            analyzer_cmd: read_var("LOUPE_ANALYZER_CMD"),
        }
    }

    /// Validate the configuration, producing actionable suggestions
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if !self.api_keys.has_llm_provider() {
            validation.add_warning(
                "No LLM API keys configured. Set OPENAI_API_KEY, AZURE_OPENAI_API_KEY or ANTHROPIC_API_KEY.",
            );
        }

        if self.database_url.is_none() {
            validation.add_error("DATABASE_URL is not set; the relational store is required.");
        }

        if let Some(endpoint) = &self.api_keys.azure_endpoint {
            if url::Url::parse(endpoint).is_err() {
                validation.add_error(format!(
                    "AZURE_OPENAI_ENDPOINT '{}' is not a valid URL",
                    endpoint
                ));
            }
        }

        match self.default_provider {
            Some(Provider::Azure) => {
                if self.api_keys.azure_endpoint.is_none() {
                    validation
                        .add_error("ensure AZURE_OPENAI_ENDPOINT is configured when LLM_PROVIDER=azure");
                }
                if self.api_keys.azure.is_none() {
                    validation
                        .add_error("ensure AZURE_OPENAI_API_KEY is configured when LLM_PROVIDER=azure");
                }
            }
            Some(Provider::OpenAi) if self.api_keys.openai.is_none() => {
                validation.add_error("ensure OPENAI_API_KEY is configured when LLM_PROVIDER=openai");
            }
            Some(Provider::Anthropic) if self.api_keys.anthropic.is_none() => {
                validation
                    .add_error("ensure ANTHROPIC_API_KEY is configured when LLM_PROVIDER=anthropic");
            }
            _ => {}
        }

        if self.vector.kind == VectorStoreKind::Qdrant && self.vector.qdrant_url.is_none() {
            validation.add_error("ensure QDRANT_URL is configured when VECTOR_STORE_TYPE=qdrant");
        }

        if !self.api_keys.has_embeddings() {
            validation.add_warning(
                "No embeddings API key configured. Set OPENAI_API_KEY for semantic search.",
            );
        }

        if self.redis_url.is_some() {
            validation.add_warning(
                "REDIS_URL is set but no external cache backend is compiled in; the in-process cache stays authoritative.",
            );
        }

        validation
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_keys_summary_empty() {
        let keys = ApiKeys::default();
        assert!(!keys.has_llm_provider());
        assert!(!keys.has_embeddings());
        assert_eq!(keys.summary(), "None");
    }

    #[test]
    fn test_azure_needs_endpoint() {
        let keys = ApiKeys {
            azure: Some("key".into()),
            ..Default::default()
        };
        assert!(!keys.has_azure());
        assert!(!keys.has_llm_provider());

        let keys = ApiKeys {
            azure: Some("key".into()),
            azure_endpoint: Some("https://example.openai.azure.com".into()),
            ..Default::default()
        };
        assert!(keys.has_azure());
        assert!(keys.has_llm_provider());
        assert_eq!(keys.summary(), "Azure OpenAI");
    }

    #[test]
    fn test_validation_reports_missing_endpoint() {
        let config = EnvConfig {
            api_keys: ApiKeys {
                azure: Some("key".into()),
                ..Default::default()
            },
            vector: VectorConfig::default(),
            default_provider: Some(Provider::Azure),
            default_model: None,
            database_url: Some("postgres://localhost/loupe".into()),
            redis_url: None,
            auth_token: None,
            analyzer_cmd: None,
        };

        let validation = config.validate();
        assert!(!validation.is_valid());
        assert!(
            validation
                .errors
                .iter()
                .any(|e| e.contains("AZURE_OPENAI_ENDPOINT"))
        );
    }

    #[test]
    fn test_validation_report_format() {
        let mut v = ConfigValidation::new();
        assert_eq!(v.report(), "Configuration OK");
        v.add_warning("something minor");
        assert!(v.is_valid());
        assert!(v.report().contains("Warnings:"));
        v.add_error("something fatal");
        assert!(!v.is_valid());
        assert!(v.report().contains("Errors:"));
    }
}
