// src/embeddings/openai.rs
// OpenAI embeddings API client

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{LoupeError, Result};

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const MODEL: &str = "text-embedding-3-small";
/// Provider request cap
pub const MAX_BATCH_SIZE: usize = 256;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'static str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbeddings {
    client: Client,
    api_key: String,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, api_key }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| LoupeError::Embedding("empty embedding response".into()))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                debug!("Retrying embedding request (attempt {})", attempt + 1);
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let result = self
                .client
                .post(EMBEDDINGS_URL)
                .bearer_auth(&self.api_key)
                .json(&EmbeddingRequest {
                    model: MODEL,
                    input: texts,
                })
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LoupeError::Embedding(format!("request failed: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                // Auth and bad-request failures don't improve on retry
                if status.as_u16() == 401 || status.as_u16() == 400 {
                    return Err(LoupeError::Embedding(format!("{}: {}", status, body)));
                }
                last_error = Some(LoupeError::Embedding(format!("{}: {}", status, body)));
                continue;
            }

            let parsed: EmbeddingResponse = match response.json().await {
                Ok(p) => p,
                Err(e) => {
                    last_error = Some(LoupeError::Embedding(format!("bad response: {}", e)));
                    continue;
                }
            };

            let mut data = parsed.data;
            data.sort_by_key(|d| d.index);
            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }

        Err(last_error.unwrap_or_else(|| LoupeError::Embedding("embedding failed".into())))
    }
}
