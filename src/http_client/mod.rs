//! HTTP fetch primitive with an explicit retry policy.

mod retry;

pub use retry::{parse_retry_after, RetryPolicy};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, RETRY_AFTER};
use reqwest::{Client, Response};
use tracing::{debug, warn};

/// Default user agent (a mobile browser; the source serves its mobile layout).
pub const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Errors surfaced by the fetch primitive once retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid HTTP client configuration: {0}")]
    Config(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Text and JSON fetches against the remote source.
///
/// [`HttpClient`] is the network implementation; pipeline components only
/// see this trait.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch a page body as text.
    async fn fetch_page(&self, url: &str) -> Result<String, HttpError>;

    /// Fetch and decode a JSON document.
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, HttpError>;
}

/// Builder for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    user_agent: String,
    referer: Option<String>,
    accept_language: String,
    page_timeout: Duration,
    broker_timeout: Duration,
    retry: RetryPolicy,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            referer: None,
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            page_timeout: Duration::from_secs(5),
            broker_timeout: Duration::from_secs(3),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Referer sent with every request.
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Timeout for listing, detail and play pages.
    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Timeout for the JSON broker endpoint.
    pub fn broker_timeout(mut self, timeout: Duration) -> Self {
        self.broker_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<HttpClient, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.accept_language)
                .map_err(|e| HttpError::Config(e.to_string()))?,
        );
        if let Some(referer) = &self.referer {
            headers.insert(
                REFERER,
                HeaderValue::from_str(referer).map_err(|e| HttpError::Config(e.to_string()))?,
            );
        }

        let client = Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| HttpError::Config(e.to_string()))?;

        Ok(HttpClient {
            client,
            retry: self.retry,
            page_timeout: self.page_timeout,
            broker_timeout: self.broker_timeout,
        })
    }
}

/// reqwest-backed client applying the configured [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    page_timeout: Duration,
    broker_timeout: Duration,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// GET `url`, retrying transient failures, and return the successful response.
    async fn get_with_retry(&self, url: &str, timeout: Duration) -> Result<Response, HttpError> {
        let mut attempt = 0u32;

        loop {
            let retry_after = match self.client.get(url).timeout(timeout).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !self.retry.is_retryable_status(status) || !self.retry.can_retry(attempt) {
                        return Err(HttpError::Status {
                            url: url.to_string(),
                            status,
                        });
                    }
                    debug!("{} returned {}, retrying (attempt {})", url, status, attempt + 1);
                    parse_retry_after(
                        response
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|v| v.to_str().ok()),
                    )
                }
                Err(e) => {
                    if !is_transient(&e) || !self.retry.can_retry(attempt) {
                        return Err(HttpError::Transport {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                    warn!("Request to {} failed ({}), retrying", url, e);
                    None
                }
            };

            tokio::time::sleep(self.retry.delay_for(attempt, retry_after)).await;
            attempt += 1;
        }
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}

#[async_trait]
impl PageSource for HttpClient {
    async fn fetch_page(&self, url: &str) -> Result<String, HttpError> {
        let response = self.get_with_retry(url, self.page_timeout).await?;
        response.text().await.map_err(|e| HttpError::Decode {
            url: url.to_string(),
            source: e,
        })
    }

    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, HttpError> {
        let response = self.get_with_retry(url, self.broker_timeout).await?;
        response.json().await.map_err(|e| HttpError::Decode {
            url: url.to_string(),
            source: e,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(max_retries: u32) -> HttpClient {
        HttpClient::builder()
            .retry_policy(RetryPolicy {
                max_retries,
                backoff_base: Duration::from_millis(5),
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_retries_retryable_status_then_succeeds() {
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

        let client = fast_client(3);
        let body = client
            .fetch_page(&format!("{}/flaky", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = fast_client(2);
        let err = client
            .fetch_page(&format!("{}/down", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(3);
        let err = client
            .fetch_page(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 200, "url": "x"})),
            )
            .mount(&server)
            .await;

        let client = fast_client(0);
        let value = client
            .fetch_json(&format!("{}/api", server.uri()))
            .await
            .unwrap();
        assert_eq!(value["code"], 200);
    }
}
