//! Polyport Oracle - HTTP backend for the oracle adapter
//!
//! Speaks the OpenAI-compatible `POST {endpoint}/chat/completions` protocol.
//! Status codes map onto [`TransportError`] so the adapter can decide what to
//! retry:
//! - `429` is rate limiting (honours `Retry-After` in seconds)
//! - `408`, `5xx` and connection failures are transient
//! - any other non-success status is a rejection and is not retried
//!
//! # Example
//!
//! ```rust,ignore
//! use polyport_core::{OracleAdapter, OracleConfig};
//! use polyport_oracle::HttpBackend;
//!
//! let config = OracleConfig::default();
//! let backend = HttpBackend::from_config(&config)?;
//! let oracle = OracleAdapter::new(Arc::new(backend), config, "c", "python");
//! ```

use async_trait::async_trait;
use polyport_core::{OracleBackend, OracleConfig, OracleRequest, TransportError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body kept in a rejection message
const MAX_ERROR_BODY: usize = 512;

/// Backend construction errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Endpoint is not an http(s) URL
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("url", &self.url)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Client for `endpoint` (base URL, e.g. `https://api.openai.com/v1`)
    ///
    /// # Errors
    /// `BackendError` when the endpoint is not http(s) or the client fails to build.
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, BackendError> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(BackendError::Endpoint(endpoint.to_string()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("polyport/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            api_key,
        })
    }

    /// Client for `config.endpoint`, key read from `config.api_key_env`
    ///
    /// A missing key is allowed (local servers usually need none) but logged.
    ///
    /// # Errors
    /// See [`HttpBackend::new`].
    pub fn from_config(config: &OracleConfig) -> Result<Self, BackendError> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!(var = %config.api_key_env, "No API key in environment, sending unauthenticated requests");
        }
        Self::new(&config.endpoint, api_key)
    }

    /// Full request URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

/// Map a non-success status onto the transport taxonomy
fn classify(status: StatusCode, headers: &HeaderMap, body: String) -> TransportError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return TransportError::RateLimited {
            retry_after: retry_after(headers),
        };
    }
    let message = format!("HTTP {status}: {}", truncate(body));
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        TransportError::Transient(message)
    } else {
        TransportError::Rejected(message)
    }
}

#[async_trait]
impl OracleBackend for HttpBackend {
    async fn complete(&self, request: &OracleRequest) -> Result<String, TransportError> {
        let body = ChatRequest {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };
        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!(file = %request.file, url = %self.url, refinement = request.refinement, "Sending chat completion");

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status, &headers, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("malformed response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::Transient("response carried no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(matches!(
            HttpBackend::new("ftp://example.com", None),
            Err(BackendError::Endpoint(_))
        ));
    }

    #[test]
    fn builds_completions_url() {
        let backend = HttpBackend::new("http://localhost:8080/v1/", None).unwrap();
        assert_eq!(backend.url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn status_mapping() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, &headers, String::new()),
            TransportError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );
        assert!(classify(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "down".into()).is_retryable());
        assert!(classify(StatusCode::REQUEST_TIMEOUT, &HeaderMap::new(), String::new()).is_retryable());
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, &HeaderMap::new(), "bad key".into()),
            TransportError::Rejected("HTTP 401 Unauthorized: bad key".into())
        );
    }

    #[test]
    fn http_date_retry_after_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let text = truncate("é".repeat(400));
        assert!(text.len() <= MAX_ERROR_BODY + 3);
        assert!(text.ends_with("..."));
    }
}
