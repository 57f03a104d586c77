// src/db/usage.rs
// Usage event recording with hourly aggregation. Recording is fire-and-forget
// from the hot path; aggregation costs come from the catalog.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

use super::catalog::ModelCatalog;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub model_id: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub success: bool,
    pub response_time_ms: i64,
    pub feature: String,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    pub fn chat(model_id: &str, provider: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            provider: provider.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            success: true,
            response_time_ms: 0,
            feature: "chat".to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct UsageRecorder {
    pool: PgPool,
    catalog: Arc<ModelCatalog>,
}

impl UsageRecorder {
    pub fn new(pool: PgPool, catalog: Arc<ModelCatalog>) -> Self {
        Self { pool, catalog }
    }

    /// Insert the raw event and fold it into its hourly bucket.
    pub async fn record(&self, event: UsageEvent) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO usage_events
               (model_id, provider, input_tokens, output_tokens, success,
                response_time_ms, feature, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&event.model_id)
        .bind(&event.provider)
        .bind(event.input_tokens)
        .bind(event.output_tokens)
        .bind(event.success)
        .bind(event.response_time_ms)
        .bind(&event.feature)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;

        let cost = self.cost_of(&event).await;
        let bucket = hour_bucket(event.timestamp);

        sqlx::query(
            r#"INSERT INTO usage_metrics
               (model_id, hour_bucket, request_count, error_count,
                input_tokens, output_tokens, total_cost)
               VALUES ($1, $2, 1, $3, $4, $5, $6)
               ON CONFLICT (model_id, hour_bucket) DO UPDATE SET
                 request_count = usage_metrics.request_count + 1,
                 error_count = usage_metrics.error_count + $3,
                 input_tokens = usage_metrics.input_tokens + $4,
                 output_tokens = usage_metrics.output_tokens + $5,
                 total_cost = usage_metrics.total_cost + $6"#,
        )
        .bind(&event.model_id)
        .bind(bucket)
        .bind(if event.success { 0i64 } else { 1i64 })
        .bind(event.input_tokens)
        .bind(event.output_tokens)
        .bind(cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Spawn recording off the hot path; failures only log.
    pub fn record_detached(&self, event: UsageEvent) {
        let recorder = self.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.record(event).await {
                warn!("Failed to record usage event: {}", e);
            }
        });
    }

    async fn cost_of(&self, event: &UsageEvent) -> f64 {
        match self.catalog.get(&event.model_id).await {
            Ok(Some(model)) => {
                (event.input_tokens as f64 / 1000.0) * model.cost_input_per_1k
                    + (event.output_tokens as f64 / 1000.0) * model.cost_output_per_1k
            }
            _ => 0.0,
        }
    }
}

fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_bucket_truncates() {
        let ts = "2026-07-01T13:45:59Z".parse::<DateTime<Utc>>().unwrap();
        let bucket = hour_bucket(ts);
        assert_eq!(bucket.to_rfc3339(), "2026-07-01T13:00:00+00:00");
    }

    #[test]
    fn test_chat_event_defaults() {
        let event = UsageEvent::chat("gpt-4o", "openai");
        assert_eq!(event.feature, "chat");
        assert!(event.success);
        assert_eq!(event.input_tokens, 0);
    }
}
