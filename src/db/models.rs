// src/db/models.rs
// Entity rows. Relationships are id-based; no object-graph traversal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Replaces empty assistant output so the non-empty content constraint holds.
pub const APOLOGY_SENTINEL: &str =
    "I apologize, but I wasn't able to generate a response. Please try again.";

#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Document {
    pub id: i64,
    pub project_id: i64,
    pub file_path: String,
    pub language: Option<String>,
    pub content_hash: String,
    pub is_indexed: bool,
}

/// Chunk row without its embedding (the vector column is only materialized
/// where a modality needs it).
#[derive(Debug, Clone, FromRow)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub content: String,
    pub symbol_name: Option<String>,
    pub symbol_type: Option<String>,
    pub start_line: i32,
    pub end_line: i32,
    pub tokens: i32,
}

/// Denormalized chunk metadata carried on search hits and vector payloads
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_filtered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_secrets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redaction_summary: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Coarse retrieval-quality label attached to assistant messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RagStatus {
    Active,
    Degraded,
    Poor,
    Error,
    #[default]
    Standard,
}

impl RagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RagStatus::Active => "active",
            RagStatus::Degraded => "degraded",
            RagStatus::Poor => "poor",
            RagStatus::Error => "error",
            RagStatus::Standard => "standard",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub rag_used: bool,
    pub rag_confidence: Option<f64>,
    pub knowledge_sources_count: i32,
    pub rag_status: String,
    pub tool_calls: serde_json::Value,
    pub referenced_chunks: serde_json::Value,
}

/// Capability blob stored as JSONB on model_configurations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelCapabilities {
    pub supports_functions: bool,
    pub supports_vision: bool,
    pub supports_reasoning: bool,
    pub supports_streaming: bool,
    pub max_context_window: u32,
    pub max_output_tokens: u32,
    pub supports_parallel_tools: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            supports_functions: true,
            supports_vision: false,
            supports_reasoning: false,
            supports_streaming: true,
            max_context_window: 4096,
            max_output_tokens: 4096,
            supports_parallel_tools: true,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ModelConfiguration {
    pub model_id: String,
    pub name: String,
    pub provider: String,
    pub model_family: Option<String>,
    pub capabilities: serde_json::Value,
    pub cost_input_per_1k: f64,
    pub cost_output_per_1k: f64,
    pub is_available: bool,
    pub is_deprecated: bool,
}

impl ModelConfiguration {
    pub fn capabilities(&self) -> ModelCapabilities {
        serde_json::from_value(self.capabilities.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Feedback {
    pub id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub rating: i32,
    pub helpful: Option<bool>,
    pub accuracy: Option<i32>,
    pub clarity: Option<i32>,
    pub completeness: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Tool,
        ] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("bot"), None);
    }

    #[test]
    fn test_capabilities_default_matches_missing_fields() {
        let caps: ModelCapabilities =
            serde_json::from_value(serde_json::json!({"supports_reasoning": true})).unwrap();
        assert!(caps.supports_reasoning);
        assert!(caps.supports_streaming);
        assert_eq!(caps.max_output_tokens, 4096);
    }

    #[test]
    fn test_rag_status_default_is_standard() {
        assert_eq!(RagStatus::default(), RagStatus::Standard);
        assert_eq!(RagStatus::Degraded.as_str(), "degraded");
    }
}
