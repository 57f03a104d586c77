// src/llm/http.rs
// Shared HTTP client for all LLM providers: status classification and the
// retry policy (Retry-After honored, exponential backoff otherwise).

use rand::Rng;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::warn;

use crate::error::{ProviderError, ProviderErrorKind};

/// Maximum retry attempts on retryable failures
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff between retries (doubles each attempt)
const BASE_BACKOFF: Duration = Duration::from_secs(4);
/// Backoff ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Default connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a provider authenticates requests
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// Authorization: Bearer <key>  (OpenAI)
    Bearer(String),
    /// api-key: <key>  (Azure OpenAI)
    AzureApiKey(String),
    /// x-api-key + anthropic-version  (Anthropic)
    AnthropicApiKey(String),
}

impl AuthScheme {
    fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthScheme::Bearer(key) => builder.bearer_auth(key),
            AuthScheme::AzureApiKey(key) => builder.header("api-key", key),
            AuthScheme::AnthropicApiKey(key) => builder
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01"),
        }
    }
}

/// Shared HTTP client configuration for all LLM providers
#[derive(Clone)]
pub struct LlmHttpClient {
    client: Client,
}

impl LlmHttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// POST a JSON body with retry on RateLimit/Timeout/Transient failures.
    /// Returns the response body text on success.
    pub async fn post_with_retry(
        &self,
        request_id: &str,
        url: &str,
        auth: &AuthScheme,
        body: String,
    ) -> Result<String, ProviderError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.post_once(request_id, url, auth, body.clone()).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS || !err.kind.is_retryable() {
                        return Err(err);
                    }
                    let delay = retry_delay(&err, attempt);
                    warn!(
                        request_id = %request_id,
                        kind = err.kind.as_str(),
                        attempt,
                        "Provider call failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// POST a JSON body expecting an SSE stream back. Retries apply only
    /// before the first byte; a successful response is handed to the caller.
    pub async fn post_streaming(
        &self,
        request_id: &str,
        url: &str,
        auth: &AuthScheme,
        body: String,
    ) -> Result<Response, ProviderError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = auth
                .apply(self.client.post(url))
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            let err = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => classify_response(request_id, response).await,
                Err(e) => classify_transport(request_id, e),
            };

            if attempt >= MAX_ATTEMPTS || !err.kind.is_retryable() {
                return Err(err);
            }
            let delay = retry_delay(&err, attempt);
            warn!(
                request_id = %request_id,
                kind = err.kind.as_str(),
                attempt,
                "Streaming request failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn post_once(
        &self,
        request_id: &str,
        url: &str,
        auth: &AuthScheme,
        body: String,
    ) -> Result<String, ProviderError> {
        let result = auth
            .apply(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                response.text().await.map_err(|e| {
                    ProviderError::new(ProviderErrorKind::Transient, e.to_string(), request_id)
                })
            }
            Ok(response) => Err(classify_response(request_id, response).await),
            Err(e) => Err(classify_transport(request_id, e)),
        }
    }
}

impl Default for LlmHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an HTTP error response into the provider error taxonomy
async fn classify_response(request_id: &str, response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    let kind = classify_status(status, &body);
    let mut err = ProviderError::new(kind, format!("{}: {}", status, truncate(&body, 500)), request_id);
    err.retry_after = retry_after;
    err
}

/// Map status + body to an error kind. Model-missing conditions surface as
/// different statuses and message strings per provider, so the body is
/// inspected too.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderErrorKind {
    let lowered = body.to_lowercase();
    if lowered.contains("model_not_found")
        || lowered.contains("model not found")
        || lowered.contains("does not have access to model")
        || lowered.contains("deploymentnotfound")
    {
        return ProviderErrorKind::ModelNotFound;
    }

    match status.as_u16() {
        401 | 403 => ProviderErrorKind::Authentication,
        404 => ProviderErrorKind::ModelNotFound,
        408 => ProviderErrorKind::Timeout,
        413 => ProviderErrorKind::PayloadTooLarge,
        429 => ProviderErrorKind::RateLimit,
        400 | 422 => ProviderErrorKind::BadRequest,
        s if s >= 500 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::BadRequest,
    }
}

fn classify_transport(request_id: &str, err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Transient
    };
    ProviderError::new(kind, err.to_string(), request_id)
}

/// Retry-After wins; otherwise exponential backoff with jitter, capped.
fn retry_delay(err: &ProviderError, attempt: u32) -> Duration {
    if let Some(after) = err.retry_after {
        return after.min(MAX_BACKOFF);
    }
    let exp = BASE_BACKOFF.saturating_mul(2u32.saturating_pow(attempt - 1));
    let jitter_ms = rand::rng().random_range(0..500);
    (exp + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_basic() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ProviderErrorKind::Authentication
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderErrorKind::RateLimit
        );
        assert_eq!(
            classify_status(StatusCode::PAYLOAD_TOO_LARGE, ""),
            ProviderErrorKind::PayloadTooLarge
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            ProviderErrorKind::BadRequest
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            ProviderErrorKind::Transient
        );
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            ProviderErrorKind::Timeout
        );
    }

    #[test]
    fn test_classify_model_not_found_from_body() {
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, r#"{"error":{"code":"model_not_found"}}"#),
            ProviderErrorKind::ModelNotFound
        );
        assert_eq!(
            classify_status(
                StatusCode::FORBIDDEN,
                "Principal does not have access to model gpt-4"
            ),
            ProviderErrorKind::ModelNotFound
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, "DeploymentNotFound"),
            ProviderErrorKind::ModelNotFound
        );
    }

    #[test]
    fn test_retry_delay_honors_retry_after() {
        let mut err = ProviderError::new(ProviderErrorKind::RateLimit, "429", "req");
        err.retry_after = Some(Duration::from_secs(7));
        assert_eq!(retry_delay(&err, 1), Duration::from_secs(7));

        err.retry_after = Some(Duration::from_secs(600));
        assert_eq!(retry_delay(&err, 1), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_delay_backoff_grows_and_caps() {
        let err = ProviderError::new(ProviderErrorKind::Transient, "500", "req");
        let d1 = retry_delay(&err, 1);
        let d2 = retry_delay(&err, 2);
        assert!(d1 >= Duration::from_secs(4));
        assert!(d2 >= Duration::from_secs(8));
        assert!(retry_delay(&err, 10) <= MAX_BACKOFF);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 500), "ok");
    }
}
