//! HTTP transport used by the delivery client.
//!
//! A [`Transport`] performs exactly one HTTP exchange. It reports every
//! response it receives, whatever the status, and only fails when no response
//! arrived. Classifying statuses and retrying is the invoker's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use crate::error::TransportError;
use crate::{Error, Result};

/// A GET request against the delivery API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Absolute URL including the query string.
    pub url: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl DeliveryRequest {
    /// Request for `url` without extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response received from the server, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl RawResponse {
    /// Response with `status` and `body` and no retry hint.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Whether the status is 2xx.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Performs single HTTP exchanges.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` once.
    async fn send(&self, request: &DeliveryRequest) -> std::result::Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Transport with the default 30 second timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("delivery-rs/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &DeliveryRequest) -> std::result::Result<RawResponse, TransportError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response.text().await?;
        debug!(status, bytes = body.len(), url = %request.url, "Received response");

        Ok(RawResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Parse a `Retry-After` value given in seconds. HTTP dates are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_send_reports_status_body_and_hint() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .and(header("x-test", "yes"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new()?;
        let request = DeliveryRequest::get(format!("{}/busy", server.uri())).header("x-test", "yes");
        let response = transport.send(&request).await?;

        assert_eq!(response.status, 429);
        assert!(!response.is_success());
        assert_eq!(response.body, "slow down");
        assert_eq!(response.retry_after, Some(Duration::from_secs(7)));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_failure() -> anyhow::Result<()> {
        let transport = ReqwestTransport::with_timeout(Duration::from_secs(2))?;
        // Port 9 (discard) on localhost is expected to refuse connections.
        let err = transport
            .send(&DeliveryRequest::get("http://127.0.0.1:9/items"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::FailureKind::Network);
        Ok(())
    }
}
