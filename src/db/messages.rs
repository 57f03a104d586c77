// src/db/messages.rs
// Session and message persistence. Messages are soft-deleted and assistant
// rows carry the retrieval-quality metadata.

use sqlx::PgPool;

use super::models::{APOLOGY_SENTINEL, Message, MessageRole, RagStatus, Session};
use crate::error::Result;
use crate::llm::ToolCall;

/// Retrieval metadata attached to an assistant message
#[derive(Debug, Clone, Default)]
pub struct RagMetadata {
    pub rag_used: bool,
    pub rag_confidence: Option<f64>,
    pub knowledge_sources_count: i32,
    pub rag_status: RagStatus,
    pub referenced_chunks: Vec<i64>,
}

/// A message about to be persisted
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub rag: RagMetadata,
    pub tool_calls: Vec<ToolCall>,
}

impl NewMessage {
    pub fn user(session_id: i64, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role: MessageRole::User,
            content: content.into(),
            rag: RagMetadata::default(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(session_id: i64, content: impl Into<String>) -> Self {
        Self {
            session_id,
            role: MessageRole::Assistant,
            content: content.into(),
            rag: RagMetadata::default(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct MessageStore {
    pool: PgPool,
}

impl MessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_session(&self, project_id: i64, title: &str) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(
            "INSERT INTO sessions (project_id, title) VALUES ($1, $2) RETURNING *",
        )
        .bind(project_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    /// Insert a message. Empty content is replaced with the apology sentinel
    /// so the DB constraint never fires.
    pub async fn append(&self, message: NewMessage) -> Result<Message> {
        let content = if message.content.trim().is_empty() {
            APOLOGY_SENTINEL.to_string()
        } else {
            message.content
        };

        let tool_calls = serde_json::to_value(&message.tool_calls)?;
        let referenced = serde_json::to_value(&message.rag.referenced_chunks)?;

        let row = sqlx::query_as::<_, Message>(
            r#"INSERT INTO messages
               (session_id, role, content, rag_used, rag_confidence,
                knowledge_sources_count, rag_status, tool_calls, referenced_chunks)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id, session_id, role, content, created_at, is_deleted,
                         rag_used, rag_confidence, knowledge_sources_count,
                         rag_status, tool_calls, referenced_chunks"#,
        )
        .bind(message.session_id)
        .bind(message.role.as_str())
        .bind(&content)
        .bind(message.rag.rag_used)
        .bind(message.rag.rag_confidence)
        .bind(message.rag.knowledge_sources_count)
        .bind(message.rag.rag_status.as_str())
        .bind(tool_calls)
        .bind(referenced)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Most recent non-deleted messages, oldest first.
    pub async fn recent(&self, session_id: i64, limit: i64) -> Result<Vec<Message>> {
        let mut rows = sqlx::query_as::<_, Message>(
            r#"SELECT id, session_id, role, content, created_at, is_deleted,
                      rag_used, rag_confidence, knowledge_sources_count,
                      rag_status, tool_calls, referenced_chunks
               FROM messages
               WHERE session_id = $1 AND NOT is_deleted
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// User deletions never physically remove rows.
    pub async fn soft_delete(&self, message_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET is_deleted = TRUE WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_feedback(
        &self,
        message_id: i64,
        user_id: i64,
        rating: i32,
        helpful: Option<bool>,
        accuracy: Option<i32>,
        clarity: Option<i32>,
        completeness: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO feedback
               (message_id, user_id, rating, helpful, accuracy, clarity, completeness)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(rating)
        .bind(helpful)
        .bind(accuracy)
        .bind(clarity)
        .bind(completeness)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_constructors() {
        let msg = NewMessage::user(7, "hello");
        assert_eq!(msg.role, MessageRole::User);
        assert!(!msg.rag.rag_used);

        let msg = NewMessage::assistant(7, "answer");
        assert_eq!(msg.role, MessageRole::Assistant);
        assert!(msg.tool_calls.is_empty());
    }
}
