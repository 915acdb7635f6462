//! Upstream email API client
//! Forwards prepared requests to the provider and buffers the full response

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default provider base URL
pub const RESEND_API_URL: &str = "https://api.resend.com";

/// Fixed provider endpoints reachable through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Emails,
    Domains,
}

impl Endpoint {
    pub fn method(self) -> Method {
        match self {
            Endpoint::Emails => Method::POST,
            Endpoint::Domains => Method::GET,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Emails => "/emails",
            Endpoint::Domains => "/domains",
        }
    }
}

/// Request prepared for the provider. Headers are built fresh, never copied wholesale.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub endpoint: Endpoint,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Provider response, captured in full before relaying
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_body() || e.is_decode() {
            UpstreamError::Body(e.without_url().to_string())
        } else {
            UpstreamError::Connect(e.without_url().to_string())
        }
    }
}

/// Anything able to carry a `ForwardRequest` to the provider
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// `Upstream` backed by a pooled reqwest client over rustls
pub struct ResendClient {
    client: reqwest::Client,
    base_url: String,
}

impl ResendClient {
    /// Create a client for `base_url` with a bound on each whole exchange
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).context("Invalid upstream URL")?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("Upstream URL cannot be a base: {}", base_url);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

#[async_trait]
impl Upstream for ResendClient {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.endpoint_url(request.endpoint);
        debug!("Forwarding {} {}", request.endpoint.method(), url);

        let mut builder = match request.endpoint {
            Endpoint::Emails => self.client.post(&url),
            Endpoint::Domains => self.client.get(&url),
        };

        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        // reqwest and hyper sit on different `http` majors, so headers are rebuilt by bytes
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers().iter() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        let body = response.bytes().await?;
        debug!("Upstream responded {} ({} bytes)", status, body.len());

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_routes() {
        assert_eq!(Endpoint::Emails.method(), Method::POST);
        assert_eq!(Endpoint::Emails.path(), "/emails");
        assert_eq!(Endpoint::Domains.method(), Method::GET);
        assert_eq!(Endpoint::Domains.path(), "/domains");
    }

    #[test]
    fn test_endpoint_url_strips_trailing_slash() {
        let client = ResendClient::new("https://api.resend.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint_url(Endpoint::Emails),
            "https://api.resend.com/emails"
        );
        assert_eq!(
            client.endpoint_url(Endpoint::Domains),
            "https://api.resend.com/domains"
        );
    }

    #[tokio::test]
    async fn test_forward_captures_status_headers_and_body() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/domains"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-request-id", "req_42")
                    .set_body_raw(r#"{"data":[]}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ResendClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let response = client
            .forward(ForwardRequest {
                endpoint: Endpoint::Domains,
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.headers["content-type"], "application/json");
        assert_eq!(response.headers["x-request-id"], "req_42");
        assert_eq!(&response.body[..], br#"{"data":[]}"#);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(ResendClient::new("not a url", Duration::from_secs(5)).is_err());
        assert!(ResendClient::new("mailto:ops@example.com", Duration::from_secs(5)).is_err());
    }
}
