//! HTTP plumbing shared by the source handlers.
//!
//! Request URLs can carry credentials in their query strings, so nothing here
//! logs or reports a full URL.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tracing::debug;

use crate::config::RequestConfig;
use crate::error::{SourceError, SourceResult};

/// Shared HTTP client used by every handler.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(config: &RequestConfig) -> SourceResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(concat!("source-router/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::ConnectionFailed {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request and decode a JSON body.
    pub async fn json(&self, request: RequestBuilder, timeout: Duration) -> SourceResult<Value> {
        let response = self.send(request, timeout).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))
    }

    /// Send a request and return the raw body text.
    pub async fn text(&self, request: RequestBuilder, timeout: Duration) -> SourceResult<String> {
        let response = self.send(request, timeout).await?;
        response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))
    }

    /// Send a request, failing on any non-success status.
    pub async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> SourceResult<reqwest::Response> {
        let start = Instant::now();
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        debug!(
            location = %redacted_location(response.url()),
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis(),
            "Source responded"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::BadResponse {
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
            });
        }

        Ok(response)
    }
}

/// Run `fut` under a hard deadline.
///
/// The deadline covers the whole exchange, body decoding included.
pub async fn within<F, T>(timeout: Duration, fut: F) -> SourceResult<T>
where
    F: Future<Output = SourceResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> SourceError {
    let e = e.without_url();
    if e.is_timeout() {
        SourceError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() {
        SourceError::BadResponse {
            message: format!("Failed to decode response: {}", e),
        }
    } else {
        SourceError::ConnectionFailed {
            message: e.to_string(),
        }
    }
}

/// Host and path of `url`; query string and userinfo are dropped.
pub(crate) fn redacted_location(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}

/// `{endpoint}/{path}` without doubled slashes.
pub(crate) fn join(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Append percent-encoded path segments to an endpoint.
pub(crate) fn with_segments(endpoint: &str, segments: &[&str]) -> SourceResult<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| SourceError::Unsupported {
        message: format!("Invalid endpoint '{}': {}", endpoint, e),
    })?;
    url.path_segments_mut()
        .map_err(|_| SourceError::Unsupported {
            message: format!("Endpoint '{}' cannot carry a path", endpoint),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Truncate to at most `max` characters, appending "..." when cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Read a string at a JSON pointer, if present.
pub(crate) fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}
