//! ResendProxy - A minimal reverse proxy for the Resend email API
//!
//! Lets browser pages send email without a server of their own:
//! - `POST /api/send` forwarded to the provider's `/emails`
//! - `GET /api/domains` forwarded to the provider's `/domains`
//! - Permissive CORS on every response, including preflight
//! - Static file serving for everything else

pub mod error;
pub mod proxy;
pub mod routes;
pub mod static_files;
pub mod upstream;

pub use error::ProxyError;
pub use proxy::{ProxyConfig, ProxyServer};
pub use routes::Route;
pub use static_files::StaticFiles;
pub use upstream::{Endpoint, ForwardRequest, ResendClient, Upstream, UpstreamError, UpstreamResponse};
