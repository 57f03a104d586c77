// src/tools/mod.rs
// Tool surface for the chat loop: trait, registry, timeout wrapping. Tool
// failures are data returned to the model, never errors that abort the turn.

mod builtin;

pub use builtin::register_builtin_tools;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ToolErrorKind;
use crate::llm::{ProviderAdapter, ToolDef};
use crate::search::HybridSearch;

/// Default per-call execution timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Dependencies tools may use
pub struct ToolRuntime {
    pub pool: PgPool,
    pub search: Arc<HybridSearch>,
    pub adapter: Arc<ProviderAdapter>,
    pub repo_root: PathBuf,
    pub project_ids: Vec<i64>,
}

/// Outcome returned to the model as the tool message body
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_type: None,
        }
    }

    pub fn fail(kind: ToolErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            error_type: Some(kind.as_str().to_string()),
        }
    }

    /// Serialized form handed back to the model
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"serialization failed","error_type":"execution_exception"}"#
                .to_string()
        })
    }
}

/// One executable chat tool
#[async_trait]
pub trait ChatTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for the arguments object
    fn schema(&self) -> Value;
    async fn call(&self, args: Value, runtime: &ToolRuntime) -> ToolOutcome;
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ChatTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ChatTool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Provider-agnostic definitions for the adapter
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|tool| ToolDef::new(tool.name(), tool.description(), tool.schema()))
            .collect()
    }

    /// Execute one call with argument parsing and a timeout. Every failure
    /// mode collapses into a ToolOutcome.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &str,
        runtime: &ToolRuntime,
        timeout: Duration,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "Unknown tool requested");
            return ToolOutcome::fail(ToolErrorKind::UnknownTool, format!("unknown tool '{}'", name));
        };

        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => {
                return ToolOutcome::fail(
                    ToolErrorKind::InvalidArguments,
                    format!("invalid arguments: {}", e),
                );
            }
        };

        info!(tool = name, "Executing tool");
        match tokio::time::timeout(timeout, tool.call(args, runtime)).await {
            Ok(outcome) => outcome,
            Err(_) => ToolOutcome::fail(
                ToolErrorKind::Timeout,
                format!("tool '{}' timed out after {:?}", name, timeout),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowTool;

    #[async_trait]
    impl ChatTool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "sleeps"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn call(&self, _args: Value, _runtime: &ToolRuntime) -> ToolOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutcome::ok(Value::Null)
        }
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = ToolOutcome::ok(serde_json::json!({"count": 3}));
        let body = ok.to_message_content();
        assert!(body.contains("\"success\":true"));
        assert!(!body.contains("error_type"));

        let fail = ToolOutcome::fail(ToolErrorKind::Timeout, "too slow");
        let body = fail.to_message_content();
        assert!(body.contains("\"success\":false"));
        assert!(body.contains("\"error_type\":\"timeout\""));
    }

    #[test]
    fn test_registry_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        assert_eq!(registry.len(), 1);
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "slow");
    }
}
