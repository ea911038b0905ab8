//! OAuth2 client-credentials embedding client (§4.4).
//!
//! Tokens are obtained via HTTP Basic auth against a token endpoint with a
//! fresh `RqUID` header and a form-urlencoded `scope` body (no
//! `grant_type` field — the upstream token endpoint this models doesn't
//! expect one despite what its own docs say), cached for the token's
//! 30-minute wall-clock lifetime, and refreshed once on a 401 before
//! giving up.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use futures::future::join_all;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::EmbeddingError;
use crate::retry::{retry_with_backoff_conditional, RetryConfig};

const TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_CONCURRENT_REQUESTS: usize = 5;

struct CachedToken {
    value: String,
    obtained_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.obtained_at.elapsed() < TOKEN_TTL
    }
}

/// OAuth2-backed embedding client for one `(token_url, embed_url, scope)`
/// credential set.
pub struct EmbeddingClient {
    http: reqwest::Client,
    token_url: String,
    embed_url: String,
    authorization_key: String,
    scope: String,
    model: String,
    batch_size: usize,
    retry_config: RetryConfig,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl EmbeddingClient {
    /// `client_id`/`client_secret` are combined into the Basic-auth
    /// "authorization key" the token endpoint expects.
    pub fn new(
        token_url: impl Into<String>,
        embed_url: impl Into<String>,
        client_id: &str,
        client_secret: &str,
        scope: impl Into<String>,
        model: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        let authorization_key = base64::engine::general_purpose::STANDARD
            .encode(format!("{client_id}:{client_secret}"));

        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to build HTTP client"),
            token_url: token_url.into(),
            embed_url: embed_url.into(),
            authorization_key,
            scope: scope.into(),
            model: model.into(),
            batch_size: batch_size.max(1),
            retry_config: RetryConfig::new(),
            token: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.lock().expect("token cache lock poisoned");
        guard.as_ref().filter(|t| t.is_fresh()).map(|t| t.value.clone())
    }

    fn store_token(&self, value: String) {
        let mut guard = self.token.lock().expect("token cache lock poisoned");
        *guard = Some(CachedToken { value, obtained_at: Instant::now() });
    }

    fn invalidate_token(&self) {
        let mut guard = self.token.lock().expect("token cache lock poisoned");
        *guard = None;
    }

    async fn fetch_token(&self) -> Result<String, EmbeddingError> {
        let rq_uid = Uuid::new_v4().to_string();
        let response = self
            .http
            .post(&self.token_url)
            .header("RqUID", rq_uid)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .basic_auth("", Some(&self.authorization_key))
            .body(format!("scope={}", self.scope))
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::TokenAuth(format!("{status}: {body}")));
        }

        let parsed: TokenResponse = response.json().await?;
        Ok(parsed.access_token)
    }

    async fn token(&self) -> Result<String, EmbeddingError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }
        let token = self.fetch_token().await?;
        self.store_token(token.clone());
        Ok(token)
    }

    /// Embed `texts` in batches of `batch_size`, all-or-nothing per batch,
    /// refreshing the token once if the embedding endpoint returns 401.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embed_batch(batch).await?;
            out.extend(embedded);
        }

        Ok(out)
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        retry_with_backoff_conditional(self.retry_config.clone(), EmbeddingError::is_retryable, || async {
            self.embed_batch_once(batch).await
        })
        .await
    }

    /// Fans each text in the batch out as its own request (bounded
    /// concurrency), joins before returning so the whole batch succeeds or
    /// fails together.
    async fn embed_batch_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let token = self.token().await?;

        let mut results = Vec::with_capacity(batch.len());
        for chunk in batch.chunks(MAX_CONCURRENT_REQUESTS) {
            let futures = chunk.iter().map(|text| self.request_embedding(text, &token));
            let chunk_results = join_all(futures).await;

            let mut needs_refresh = false;
            for result in &chunk_results {
                if let Err(EmbeddingError::TokenAuth(_)) = result {
                    needs_refresh = true;
                }
            }

            if needs_refresh {
                self.invalidate_token();
                let fresh_token = self.token().await?;
                let retried = join_all(chunk.iter().map(|text| self.request_embedding(text, &fresh_token))).await;
                for r in retried {
                    results.push(r?);
                }
            } else {
                for r in chunk_results {
                    results.push(r?);
                }
            }
        }

        Ok(results)
    }

    async fn request_embedding(&self, text: &str, token: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .http
            .post(&self.embed_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        if response.status().as_u16() == 401 {
            return Err(EmbeddingError::TokenAuth("embedding endpoint returned 401".into()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400..=499 => EmbeddingError::BadRequest(format!("{status}: {text_body}")),
                _ => EmbeddingError::ServerError(format!("{status}: {text_body}")),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("embedding response had no data entries".into()))
    }
}

fn classify(err: reqwest::Error) -> EmbeddingError {
    if err.is_timeout() {
        EmbeddingError::Timeout
    } else if err.is_connect() {
        EmbeddingError::Connection(err.to_string())
    } else {
        EmbeddingError::Http(err)
    }
}
