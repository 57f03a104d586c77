// src/db/config_store.rs
// Key-value runtime configuration with typed JSON values, an append-only
// history log, a TTL snapshot cache and change events.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::error::{LoupeError, Result};

/// Snapshot cache lifetime
const CACHE_TTL: Duration = Duration::from_secs(300);

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z][a-z0-9_]*$").unwrap()
});

/// Change event emitted for every mutated key
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
    pub old: Option<Value>,
    pub new: Value,
    pub actor: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub config_key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

struct CachedSnapshot {
    values: HashMap<String, Value>,
    loaded_at: Instant,
}

pub struct ConfigStore {
    pool: PgPool,
    cache: Mutex<Option<CachedSnapshot>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            pool,
            cache: Mutex::new(None),
            changes,
        }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Full configuration snapshot, served from cache within the TTL.
    pub async fn get_all(&self) -> Result<HashMap<String, Value>> {
        {
            let cache = self.cache.lock().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.loaded_at.elapsed() < CACHE_TTL {
                    return Ok(snapshot.values.clone());
                }
            }
        }

        let rows = sqlx::query("SELECT key, value, value_type FROM runtime_config")
            .fetch_all(&self.pool)
            .await?;

        let mut values = HashMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: Value = row.try_get("value")?;
            let value_type: String = row.try_get("value_type")?;
            if declared_type(&value) != value_type {
                return Err(LoupeError::Validation(format!(
                    "stored type for '{}' diverged from declared '{}'",
                    key, value_type
                )));
            }
            values.insert(key, value);
        }

        let mut cache = self.cache.lock().await;
        *cache = Some(CachedSnapshot {
            values: values.clone(),
            loaded_at: Instant::now(),
        });
        Ok(values)
    }

    /// Apply a batch of updates in one transaction. Each mutated key gets a
    /// history row and a change event; the snapshot cache is cleared.
    pub async fn set_many(&self, updates: HashMap<String, Value>, actor: &str) -> Result<()> {
        for key in updates.keys() {
            if !KEY_PATTERN.is_match(key) {
                return Err(LoupeError::Validation(format!("invalid config key: '{}'", key)));
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut emitted = Vec::new();

        for (key, value) in updates {
            if value.is_null() {
                continue;
            }
            let value_type = declared_type(&value);

            let old: Option<Value> =
                sqlx::query("SELECT value FROM runtime_config WHERE key = $1")
                    .bind(&key)
                    .fetch_optional(&mut *tx)
                    .await?
                    .map(|row| row.try_get("value"))
                    .transpose()?;

            if old.as_ref() == Some(&value) {
                continue;
            }

            sqlx::query(
                r#"INSERT INTO runtime_config (key, value, value_type, updated_by, updated_at)
                   VALUES ($1, $2, $3, $4, now())
                   ON CONFLICT (key) DO UPDATE
                   SET value = $2, value_type = $3, updated_by = $4, updated_at = now()"#,
            )
            .bind(&key)
            .bind(&value)
            .bind(value_type)
            .bind(actor)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"INSERT INTO config_history (config_key, old_value, new_value, changed_by)
                   VALUES ($1, $2, $3, $4)"#,
            )
            .bind(&key)
            .bind(&old)
            .bind(&value)
            .bind(actor)
            .execute(&mut *tx)
            .await?;

            emitted.push(ConfigChange {
                key,
                old,
                new: value,
                actor: actor.to_string(),
                ts: Utc::now(),
            });
        }

        tx.commit().await?;

        {
            let mut cache = self.cache.lock().await;
            *cache = None;
        }

        for change in emitted {
            debug!(key = %change.key, actor = %change.actor, "Runtime config changed");
            let _ = self.changes.send(change);
        }
        Ok(())
    }

    /// Most recent history rows for a key, newest first.
    pub async fn get_history(&self, key: &str, limit: i64) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query(
            r#"SELECT config_key, old_value, new_value, changed_by, changed_at
               FROM config_history WHERE config_key = $1
               ORDER BY changed_at DESC LIMIT $2"#,
        )
        .bind(key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryRow {
                    config_key: row.try_get("config_key")?,
                    old_value: row.try_get("old_value")?,
                    new_value: row.try_get("new_value")?,
                    changed_by: row.try_get("changed_by")?,
                    changed_at: row.try_get("changed_at")?,
                })
            })
            .collect()
    }

    /// Drop the snapshot cache (event-driven invalidation hook).
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        *cache = None;
    }
}

/// The declared value_type column for a JSON value
pub(crate) fn declared_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        _ => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pattern() {
        assert!(KEY_PATTERN.is_match("provider"));
        assert!(KEY_PATTERN.is_match("claude_thinking_budget_tokens"));
        assert!(KEY_PATTERN.is_match("a1"));
        assert!(!KEY_PATTERN.is_match("Provider"));
        assert!(!KEY_PATTERN.is_match("1abc"));
        assert!(!KEY_PATTERN.is_match("with-dash"));
        assert!(!KEY_PATTERN.is_match(""));
    }

    #[test]
    fn test_declared_type() {
        assert_eq!(declared_type(&serde_json::json!(true)), "boolean");
        assert_eq!(declared_type(&serde_json::json!(1.5)), "number");
        assert_eq!(declared_type(&serde_json::json!("x")), "string");
        assert_eq!(declared_type(&serde_json::json!({"a": 1})), "object");
        assert_eq!(declared_type(&serde_json::json!([1, 2])), "array");
    }
}
