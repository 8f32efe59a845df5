//! Common utilities for provider implementations

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tessera_core::{Result, TesseraError};

/// HTTP client wrapper with retry logic
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    provider: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl HttpClient {
    pub fn new(provider: impl Into<String>, max_retries: u32, retry_delay_ms: u64) -> Result<Self> {
        let provider = provider.into();
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                TesseraError::provider_error(&provider, format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            provider,
            max_retries,
            retry_delay_ms,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Display name used in error messages
    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn error(&self, message: impl Into<String>) -> TesseraError {
        TesseraError::provider_error(&self.provider, message)
    }

    /// Execute a request with retries.
    ///
    /// Client errors other than 429 fail immediately. Use [`Self::send`] when
    /// the caller needs to inspect a 4xx status itself.
    pub async fn execute_with_retry(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = self.send(request_builder).await?;
        if response.status().is_success() || response.status().is_redirection() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(self.error(format!("HTTP {} - {}", status, body)))
    }

    /// Send with retries on 5xx, 429 and transport errors, returning the
    /// final response whatever its status
    pub async fn send(&self, request_builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay_ms * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let Some(rb) = request_builder.try_clone() else {
                return Err(self.error("Request cannot be cloned for retry"));
            };

            match rb.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_server_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Ok(response);
                    }

                    warn!(provider = %self.provider, attempt, "Retryable HTTP {}", status);
                    last_error = Some(format!("HTTP {}", status));
                }
                Err(e) => {
                    warn!(provider = %self.provider, attempt, "Request failed: {}", e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(self.error(format!(
            "Request failed after {} retries: {}",
            self.max_retries,
            last_error.unwrap_or_default()
        )))
    }

    /// Decode a JSON body
    pub async fn json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse response: {}", e)))
    }
}

// =============================================================================
// Client Credentials Tokens
// =============================================================================

/// OAuth token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Caches a client-credentials access token until shortly before it expires
pub struct TokenCache {
    token: RwLock<Option<CachedToken>>,
    skew: Duration,
}

impl TokenCache {
    /// Lifetime assumed when the token endpoint omits `expires_in`
    const DEFAULT_LIFETIME_SECS: i64 = 3600;

    pub fn new() -> Self {
        Self {
            token: RwLock::new(None),
            skew: Duration::seconds(60),
        }
    }

    /// Return the cached token, or run `fetch` and cache its result
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse>>,
    {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if Utc::now() + self.skew < token.expires_at {
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Fetching management access token");
        let response = fetch().await?;
        let lifetime = response.expires_in.unwrap_or(Self::DEFAULT_LIFETIME_SECS);

        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        });

        Ok(response.access_token)
    }

    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = HttpClient::new("test", 3, 1).unwrap();
        let response = client
            .execute_with_retry(client.inner().get(format!("{}/flaky", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new("test", 3, 1).unwrap();
        let err = client
            .execute_with_retry(client.inner().get(format!("{}/missing", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provider error (test): HTTP 403 Forbidden - forbidden"
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpClient::new("test", 2, 1).unwrap();
        let err = client
            .execute_with_retry(client.inner().get(server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 2 retries"));
    }

    #[tokio::test]
    async fn test_token_cache_reuses_token() {
        let cache = TokenCache::new();
        let fetches = AtomicU32::new(0);

        for _ in 0..3 {
            let token = cache
                .get_or_fetch(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(TokenResponse {
                        access_token: "tok".to_string(),
                        expires_in: Some(3600),
                        token_type: None,
                    })
                })
                .await
                .unwrap();
            assert_eq!(token, "tok");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        cache.invalidate().await;
        cache
            .get_or_fetch(|| async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(TokenResponse {
                    access_token: "fresh".to_string(),
                    expires_in: None,
                    token_type: None,
                })
            })
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_cache_refetches_nearly_expired_token() {
        let cache = TokenCache::new();
        let fetches = AtomicU32::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(TokenResponse {
                        access_token: "short".to_string(),
                        expires_in: Some(30),
                        token_type: None,
                    })
                })
                .await
                .unwrap();
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
