// src/db/mod.rs
// Relational store (PostgreSQL via sqlx): pool setup and schema bootstrap.

mod catalog;
mod config_store;
mod messages;
mod models;
mod usage;

pub use catalog::{
    ModelCatalog, is_reasoning_model_static, requires_responses_api_static,
    supports_thinking_static,
};
pub use config_store::{ConfigChange, ConfigStore, HistoryRow};
pub use messages::{MessageStore, NewMessage, RagMetadata};
pub use models::{
    Chunk, ChunkMetadata, Document, Feedback, Message, MessageRole, ModelCapabilities,
    ModelConfiguration, Project, RagStatus, Session, APOLOGY_SENTINEL,
};
pub use usage::{UsageEvent, UsageRecorder};

use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Open a connection pool against DATABASE_URL
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    info!("Connected to database");
    Ok(pool)
}

/// Idempotent schema bootstrap. The pgvector extension backs the embedding
/// column (and the pending-embedding marker) on every deployment, including
/// Qdrant-backed ones.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
        .map_err(|e| {
            crate::error::LoupeError::Config(format!(
                "pgvector extension unavailable ({}); install postgresql-pgvector on the server",
                e
            ))
        })?;

    let statements = [
        r#"CREATE TABLE IF NOT EXISTS projects (
            id BIGSERIAL PRIMARY KEY,
            owner_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS documents (
            id BIGSERIAL PRIMARY KEY,
            project_id BIGINT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL,
            language TEXT,
            content_hash TEXT NOT NULL,
            is_indexed BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (project_id, file_path)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS chunks (
            id BIGSERIAL PRIMARY KEY,
            document_id BIGINT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            symbol_name TEXT,
            symbol_type TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            tokens INTEGER NOT NULL DEFAULT 0,
            embedding vector(1536)
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_chunks_fts
            ON chunks USING GIN (to_tsvector('english', content))"#,
        r#"CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)"#,
        r#"CREATE TABLE IF NOT EXISTS sessions (
            id BIGSERIAL PRIMARY KEY,
            project_id BIGINT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            title TEXT NOT NULL DEFAULT '',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS messages (
            id BIGSERIAL PRIMARY KEY,
            session_id BIGINT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL CHECK (content <> ''),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            rag_used BOOLEAN NOT NULL DEFAULT FALSE,
            rag_confidence DOUBLE PRECISION,
            knowledge_sources_count INTEGER NOT NULL DEFAULT 0,
            rag_status TEXT NOT NULL DEFAULT 'standard',
            code_snippets JSONB NOT NULL DEFAULT '[]',
            referenced_chunks JSONB NOT NULL DEFAULT '[]',
            tool_calls JSONB NOT NULL DEFAULT '[]'
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)"#,
        r#"CREATE TABLE IF NOT EXISTS runtime_config (
            key TEXT PRIMARY KEY,
            value JSONB NOT NULL,
            value_type TEXT NOT NULL,
            updated_by TEXT NOT NULL DEFAULT 'system',
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS config_history (
            id BIGSERIAL PRIMARY KEY,
            config_key TEXT NOT NULL,
            old_value JSONB,
            new_value JSONB,
            changed_by TEXT NOT NULL,
            changed_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS model_configurations (
            model_id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            provider TEXT NOT NULL,
            model_family TEXT,
            capabilities JSONB NOT NULL DEFAULT '{}',
            cost_input_per_1k DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (cost_input_per_1k >= 0),
            cost_output_per_1k DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (cost_output_per_1k >= 0),
            is_available BOOLEAN NOT NULL DEFAULT TRUE,
            is_deprecated BOOLEAN NOT NULL DEFAULT FALSE
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_model_capabilities
            ON model_configurations USING GIN (capabilities)"#,
        r#"CREATE TABLE IF NOT EXISTS usage_events (
            id BIGSERIAL PRIMARY KEY,
            model_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            input_tokens BIGINT NOT NULL DEFAULT 0,
            output_tokens BIGINT NOT NULL DEFAULT 0,
            success BOOLEAN NOT NULL DEFAULT TRUE,
            response_time_ms BIGINT NOT NULL DEFAULT 0,
            feature TEXT NOT NULL DEFAULT 'chat',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS usage_metrics (
            model_id TEXT NOT NULL,
            hour_bucket TIMESTAMPTZ NOT NULL,
            request_count BIGINT NOT NULL DEFAULT 0,
            error_count BIGINT NOT NULL DEFAULT 0,
            input_tokens BIGINT NOT NULL DEFAULT 0,
            output_tokens BIGINT NOT NULL DEFAULT 0,
            total_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
            PRIMARY KEY (model_id, hour_bucket)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS feedback (
            id BIGSERIAL PRIMARY KEY,
            message_id BIGINT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id BIGINT NOT NULL,
            rating INTEGER NOT NULL CHECK (rating >= -1 AND rating <= 5),
            helpful BOOLEAN,
            accuracy INTEGER CHECK (accuracy BETWEEN 1 AND 5),
            clarity INTEGER CHECK (clarity BETWEEN 1 AND 5),
            completeness INTEGER CHECK (completeness BETWEEN 1 AND 5),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Database schema ready");
    Ok(())
}
