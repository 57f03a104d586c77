// src/db/catalog.rs
// Model capability registry. The database is authoritative; a pattern-based
// fallback answers capability questions when the row is missing so startup
// paths never block on the catalog being seeded.

use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::models::{ModelCapabilities, ModelConfiguration};
use crate::error::Result;

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Models whose generation includes internal deliberation tokens
const REASONING_MODEL_PATTERNS: &[&str] = &[
    "o1", "o1-mini", "o1-preview", "o1-pro", "o3", "o3-mini", "o3-pro", "o4-mini",
];

/// Models eligible for the Responses API surface
const RESPONSES_API_MODEL_PATTERNS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "gpt-4.5",
    "computer-use-preview",
    "o3",
    "o3-mini",
    "o3-pro",
    "o4-mini",
    "o1",
    "o1-mini",
    "o1-preview",
    "o1-pro",
];

/// Models with Anthropic extended thinking
const THINKING_MODEL_PATTERNS: &[&str] =
    &["claude-opus-4", "claude-sonnet-4", "claude-3-5-sonnet"];

struct CatalogCache {
    models: HashMap<String, ModelConfiguration>,
    loaded_at: Instant,
}

pub struct ModelCatalog {
    pool: Option<PgPool>,
    cache: Mutex<Option<CatalogCache>>,
}

impl ModelCatalog {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self {
            pool: Some(pool),
            cache: Mutex::new(None),
        })
    }

    /// Catalog with no backing store; every lookup falls through to the
    /// pattern heuristics. Used by tests and early startup.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self {
            pool: None,
            cache: Mutex::new(None),
        })
    }

    async fn snapshot(&self) -> Result<HashMap<String, ModelConfiguration>> {
        let Some(pool) = &self.pool else {
            return Ok(HashMap::new());
        };

        {
            let cache = self.cache.lock().await;
            if let Some(c) = cache.as_ref() {
                if c.loaded_at.elapsed() < CACHE_TTL {
                    return Ok(c.models.clone());
                }
            }
        }

        let rows: Vec<ModelConfiguration> =
            sqlx::query_as("SELECT * FROM model_configurations")
                .fetch_all(pool)
                .await?;
        let models: HashMap<String, ModelConfiguration> =
            rows.into_iter().map(|m| (m.model_id.clone(), m)).collect();

        let mut cache = self.cache.lock().await;
        *cache = Some(CatalogCache {
            models: models.clone(),
            loaded_at: Instant::now(),
        });
        Ok(models)
    }

    pub async fn get(&self, model_id: &str) -> Result<Option<ModelConfiguration>> {
        Ok(self.snapshot().await?.get(model_id).cloned())
    }

    pub async fn list(
        &self,
        provider: Option<&str>,
        include_deprecated: bool,
    ) -> Result<Vec<ModelConfiguration>> {
        let snapshot = self.snapshot().await?;
        let mut models: Vec<ModelConfiguration> = snapshot
            .into_values()
            .filter(|m| provider.is_none_or(|p| m.provider == p))
            .filter(|m| include_deprecated || !m.is_deprecated)
            .collect();
        models.sort_by(|a, b| (&a.provider, &a.name).cmp(&(&b.provider, &b.name)));
        Ok(models)
    }

    /// Models whose capability blob has `cap` set true
    pub async fn by_capability(
        &self,
        cap: &str,
        provider: Option<&str>,
    ) -> Result<Vec<String>> {
        let snapshot = self.snapshot().await?;
        let mut ids: Vec<String> = snapshot
            .values()
            .filter(|m| provider.is_none_or(|p| m.provider == p))
            .filter(|m| m.capabilities.get(cap).and_then(|v| v.as_bool()) == Some(true))
            .map(|m| m.model_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Upsert a catalog row; the registry cache is invalidated on write.
    pub async fn upsert(&self, model: &ModelConfiguration) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        sqlx::query(
            r#"INSERT INTO model_configurations
               (model_id, name, provider, model_family, capabilities,
                cost_input_per_1k, cost_output_per_1k, is_available, is_deprecated)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (model_id) DO UPDATE SET
                 name = $2, provider = $3, model_family = $4, capabilities = $5,
                 cost_input_per_1k = $6, cost_output_per_1k = $7,
                 is_available = $8, is_deprecated = $9"#,
        )
        .bind(&model.model_id)
        .bind(&model.name)
        .bind(&model.provider)
        .bind(&model.model_family)
        .bind(&model.capabilities)
        .bind(model.cost_input_per_1k)
        .bind(model.cost_output_per_1k)
        .bind(model.is_available)
        .bind(model.is_deprecated)
        .execute(pool)
        .await?;
        self.invalidate().await;
        Ok(())
    }

    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        *cache = None;
        debug!("Model catalog cache invalidated");
    }

    /// Effective capabilities: DB row when present, else pattern fallback.
    pub async fn capabilities(&self, model_id: &str) -> ModelCapabilities {
        if let Ok(Some(model)) = self.get(model_id).await {
            if model.capabilities.as_object().is_some_and(|o| !o.is_empty()) {
                return model.capabilities();
            }
        }
        fallback_capabilities(model_id)
    }

    pub async fn is_reasoning_model(&self, model_id: &str) -> bool {
        if let Ok(Some(model)) = self.get(model_id).await {
            if let Some(v) = model.capabilities.get("supports_reasoning").and_then(|v| v.as_bool()) {
                return v;
            }
        }
        is_reasoning_model_static(model_id)
    }

    pub async fn requires_responses_api(&self, model_id: &str) -> bool {
        requires_responses_api_static(model_id)
    }

    pub async fn supports_streaming(&self, model_id: &str) -> bool {
        self.capabilities(model_id).await.supports_streaming
    }

    pub async fn supports_functions(&self, model_id: &str) -> bool {
        self.capabilities(model_id).await.supports_functions
    }

    pub async fn max_output_tokens(&self, model_id: &str) -> u32 {
        self.capabilities(model_id).await.max_output_tokens
    }

    pub async fn context_window(&self, model_id: &str) -> u32 {
        self.capabilities(model_id).await.max_context_window
    }
}

/// Fast pattern-based check that works without DB access
pub fn is_reasoning_model_static(model_id: &str) -> bool {
    if model_id.is_empty() {
        return false;
    }
    REASONING_MODEL_PATTERNS.contains(&model_id.to_lowercase().as_str())
}

/// Fast pattern-based check for Responses-API eligibility
pub fn requires_responses_api_static(model_id: &str) -> bool {
    if model_id.is_empty() {
        return false;
    }
    RESPONSES_API_MODEL_PATTERNS.contains(&model_id.to_lowercase().as_str())
}

/// Whether the model supports Anthropic extended thinking
pub fn supports_thinking_static(model_id: &str) -> bool {
    let lowered = model_id.to_lowercase();
    THINKING_MODEL_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Capability fallback used when the DB row is missing or empty
fn fallback_capabilities(model_id: &str) -> ModelCapabilities {
    let reasoning = is_reasoning_model_static(model_id);
    let lowered = model_id.to_lowercase();
    let claude = lowered.starts_with("claude");

    let (context_window, max_output) = if reasoning {
        (200_000, 65_536)
    } else if claude {
        (200_000, 8_192)
    } else if lowered.starts_with("gpt-4.1") {
        (1_000_000, 32_768)
    } else if lowered.starts_with("gpt-4o") {
        (128_000, 16_384)
    } else {
        (128_000, 4_096)
    };

    ModelCapabilities {
        supports_functions: !reasoning,
        supports_vision: ["gpt-4o", "gpt-4.1", "gpt-4.5", "claude", "o3", "o4"]
            .iter()
            .any(|p| lowered.contains(p)),
        supports_reasoning: reasoning,
        supports_streaming: !reasoning,
        max_context_window: context_window,
        max_output_tokens: max_output,
        supports_parallel_tools: !reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_patterns() {
        assert!(is_reasoning_model_static("o3"));
        assert!(is_reasoning_model_static("O4-MINI"));
        assert!(is_reasoning_model_static("o1-preview"));
        assert!(!is_reasoning_model_static("gpt-4o"));
        assert!(!is_reasoning_model_static("claude-opus-4-20250514"));
        assert!(!is_reasoning_model_static(""));
    }

    #[test]
    fn test_responses_api_patterns() {
        assert!(requires_responses_api_static("gpt-4o"));
        assert!(requires_responses_api_static("gpt-4.1-mini"));
        assert!(requires_responses_api_static("o3"));
        assert!(!requires_responses_api_static("gpt-3.5-turbo"));
        assert!(!requires_responses_api_static("claude-3-5-sonnet-20241022"));
    }

    #[test]
    fn test_thinking_patterns() {
        assert!(supports_thinking_static("claude-opus-4-20250514"));
        assert!(supports_thinking_static("claude-sonnet-4-20250522"));
        assert!(supports_thinking_static("claude-3-5-sonnet-20241022"));
        assert!(!supports_thinking_static("claude-3-5-haiku-20241022"));
        assert!(!supports_thinking_static("gpt-4o"));
    }

    #[test]
    fn test_fallback_capabilities_reasoning() {
        let caps = fallback_capabilities("o3");
        assert!(caps.supports_reasoning);
        assert!(!caps.supports_streaming);
        assert!(!caps.supports_functions);
        assert_eq!(caps.max_output_tokens, 65_536);
    }

    #[test]
    fn test_fallback_capabilities_chat() {
        let caps = fallback_capabilities("gpt-4o-mini");
        assert!(!caps.supports_reasoning);
        assert!(caps.supports_streaming);
        assert!(caps.supports_functions);
        assert_eq!(caps.max_context_window, 128_000);
    }

    #[tokio::test]
    async fn test_detached_catalog_uses_fallback() {
        let catalog = ModelCatalog::detached();
        assert!(catalog.is_reasoning_model("o3").await);
        assert!(!catalog.supports_streaming("o3").await);
        assert!(catalog.supports_streaming("gpt-4o").await);
        assert!(catalog.get("gpt-4o").await.unwrap().is_none());
    }
}
