//! Proxy server implementation
//! Routes browser requests to the email API, static assets, or CORS preflight

use crate::error::ProxyError;
use crate::routes::{Route, DOMAINS_PATH, SEND_PATH};
use crate::static_files::{Asset, StaticFiles, DEFAULT_DOCUMENT};
use crate::upstream::{Endpoint, ForwardRequest, ResendClient, Upstream, UpstreamResponse, RESEND_API_URL};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::IgnoredAny;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Response body type shared by every handler
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

const BEARER_PREFIX: &str = "Bearer ";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Proxy server configuration
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Informational only, shown in the startup banner
    pub public_url: String,
    pub static_dir: PathBuf,
    pub default_document: String,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub body_timeout: Duration,
    pub max_body_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            public_url: "http://localhost:3001".to_string(),
            static_dir: PathBuf::from("./public"),
            default_document: DEFAULT_DOCUMENT.to_string(),
            upstream_url: RESEND_API_URL.to_string(),
            upstream_timeout: Duration::from_secs(30),
            body_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Proxy server
pub struct ProxyServer {
    config: ProxyConfig,
    upstream: Arc<dyn Upstream>,
    static_files: StaticFiles,
}

impl ProxyServer {
    /// Create a new proxy server forwarding through `upstream`
    pub fn new(config: ProxyConfig, upstream: Arc<dyn Upstream>) -> Self {
        let static_files = StaticFiles::new(&config.static_dir, &config.default_document);
        Self {
            config,
            upstream,
            static_files,
        }
    }

    /// Create a proxy server talking to the configured Resend endpoint
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        let client = ResendClient::new(&config.upstream_url, config.upstream_timeout)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid listen address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("API proxy running on {}", self.config.public_url);
        info!("  - POST {} (with Bearer token)", SEND_PATH);
        info!("  - GET {} (with Bearer token)", DOMAINS_PATH);
        info!("  - static files from {}", self.static_files.root().display());

        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("HTTP server listening on {}", listener.local_addr()?);
        self.accept_loop(listener).await;
        Ok(())
    }

    /// Accept forever. Accept errors are logged and never end the loop.
    async fn accept_loop<A: Acceptor>(self: Arc<Self>, acceptor: A) {
        loop {
            let (stream, remote_addr) = match acceptor.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    if let Some(delay) = accept_backoff(&e) {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
            };
            let server = self.clone();
            let span = info_span!("conn", remote = %remote_addr);

            tokio::spawn(
                async move {
                    if let Err(e) = server.handle_connection(stream).await {
                        debug!("HTTP connection error: {}", e);
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Handle a single HTTP connection
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .serve_connection(
                io,
                service_fn(move |req| {
                    let server = self.clone();
                    async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    /// Route one request and turn every outcome into a response
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let route = Route::classify(&method, &path);
        let span = info_span!("request", id = %Uuid::new_v4(), %method, %path);

        async move {
            debug!("Dispatching to {:?}", route);

            let response = match self.dispatch(route, req).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("Request failed: {}", e);
                    e.into_response()
                }
            };

            info!("{} {} -> {}", method, path, response.status().as_u16());
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch<B>(&self, route: Route, req: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match route {
            Route::Preflight => Ok(empty_response(StatusCode::OK)),
            Route::SendEmail => self.send_email(req).await,
            Route::ListDomains => {
                let (parts, _) = req.into_parts();
                self.list_domains(&parts.headers).await
            }
            Route::StaticAsset => {
                let (parts, _) = req.into_parts();
                self.serve_static(parts.uri.path()).await
            }
        }
    }

    /// Validate and forward a send-email request
    async fn send_email<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let body = self.read_body(body).await?;
        let api_key = extract_api_key(&parts.headers);

        debug!(
            "Send email request: {} bytes, has_api_key={}",
            body.len(),
            api_key.is_some()
        );

        let api_key = api_key.ok_or(ProxyError::MissingCredential)?;

        if let Err(e) = serde_json::from_slice::<IgnoredAny>(&body) {
            debug!("Rejecting send request body: {}", e);
            return Err(ProxyError::MalformedRequest);
        }

        let request = build_send_request(api_key, body)?;
        self.forward(request).await
    }

    /// Forward a list-domains request
    async fn list_domains(&self, headers: &HeaderMap) -> Result<Response<ProxyBody>, ProxyError> {
        let api_key = extract_api_key(headers);
        debug!("List domains request: has_api_key={}", api_key.is_some());

        let api_key = api_key.ok_or(ProxyError::MissingCredential)?;
        let request = build_domains_request(api_key)?;
        self.forward(request).await
    }

    async fn forward(&self, request: ForwardRequest) -> Result<Response<ProxyBody>, ProxyError> {
        let endpoint = request.endpoint;
        match self.upstream.forward(request).await {
            Ok(response) => {
                let upstream_type = response
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none");
                debug!(
                    "Upstream {} responded {} (content-type {}, relayed as application/json)",
                    endpoint.path(),
                    response.status,
                    upstream_type
                );
                Ok(relay_response(response))
            }
            Err(e) => {
                error!("Resend API error on {}: {}", endpoint.path(), e);
                Err(e.into())
            }
        }
    }

    async fn serve_static(&self, path: &str) -> Result<Response<ProxyBody>, ProxyError> {
        let asset = self.static_files.load(path).await?;
        Ok(asset_response(asset))
    }

    /// Accumulate the whole inbound body, bounded in size and time
    async fn read_body<B>(&self, body: B) -> Result<Bytes, ProxyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let limit = self.config.max_body_size;
        let collected = tokio::time::timeout(self.config.body_timeout, Limited::new(body, limit).collect()).await;

        match collected {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                warn!("Request body exceeds {} bytes", limit);
                Err(ProxyError::PayloadTooLarge { limit })
            }
            Ok(Err(e)) => Err(ProxyError::BodyRead(e.to_string())),
            Err(_) => Err(ProxyError::BodyRead("timed out".to_string())),
        }
    }
}

/// Source of inbound connections for the accept loop
#[async_trait]
pub(crate) trait Acceptor: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Pause before the next accept when the process is out of file descriptors
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    // POSIX errno values for EMFILE and ENFILE
    match err.raw_os_error() {
        Some(24) | Some(23) => Some(ACCEPT_BACKOFF),
        _ => None,
    }
}

/// Extract the API key from `Authorization: Bearer <key>`.
///
/// The prefix match is case-sensitive. A missing header, a different scheme,
/// or a blank key all count as absent.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
        .filter(|key| !key.trim().is_empty())
}

fn bearer(api_key: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(&format!("{}{}", BEARER_PREFIX, api_key))
        .map_err(|_| ProxyError::MissingCredential)
}

/// Build the upstream send request: fresh headers, body bytes untouched
pub fn build_send_request(api_key: &str, body: Bytes) -> Result<ForwardRequest, ProxyError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(AUTHORIZATION, bearer(api_key)?);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(ForwardRequest {
        endpoint: Endpoint::Emails,
        headers,
        body: Some(body),
    })
}

pub fn build_domains_request(api_key: &str) -> Result<ForwardRequest, ProxyError> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer(api_key)?);

    Ok(ForwardRequest {
        endpoint: Endpoint::Domains,
        headers,
        body: None,
    })
}

/// Relay status and body verbatim; Content-Type is always JSON
fn relay_response(upstream: UpstreamResponse) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    json_response(status, upstream.body)
}

fn asset_response(asset: Asset) -> Response<ProxyBody> {
    let mut response = cors_response(StatusCode::OK, full_body(asset.content));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(asset.content_type));
    response
}

/// Start a response with the CORS headers already in place
fn cors_response(status: StatusCode, body: ProxyBody) -> Response<ProxyBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS, GET"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );

    response
}

/// Create JSON response
pub(crate) fn json_response(status: StatusCode, body: Bytes) -> Response<ProxyBody> {
    let mut response = cors_response(status, full_body(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create text response
pub(crate) fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    let mut response = cors_response(status, full_body(Bytes::from_static(body.as_bytes())));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    cors_response(status, empty_body())
}

/// Create full body
fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

/// Create empty body
fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}
