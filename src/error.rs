//! Error types for request handling
//! Every variant renders to a complete HTTP response; none escape the service

use crate::proxy::{self, ProxyBody};
use crate::upstream::UpstreamError;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Failures that terminate a single request
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing API key")]
    MissingCredential,

    #[error("request body is not valid JSON")]
    MalformedRequest,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[from] UpstreamError),

    #[error("asset not found")]
    AssetNotFound,

    #[error("path escapes static directory")]
    PathEscape,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingCredential => StatusCode::UNAUTHORIZED,
            ProxyError::MalformedRequest | ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::UpstreamUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::AssetNotFound => StatusCode::NOT_FOUND,
            ProxyError::PathEscape => StatusCode::FORBIDDEN,
        }
    }

    /// Client-facing message. Never carries upstream error detail.
    fn public_message(&self) -> &'static str {
        match self {
            ProxyError::MissingCredential => "Missing API key",
            ProxyError::MalformedRequest => "Invalid JSON",
            ProxyError::PayloadTooLarge { .. } => "Payload too large",
            ProxyError::BodyRead(_) => "Failed to read request body",
            ProxyError::UpstreamUnreachable(_) => "Failed to contact Resend API",
            ProxyError::AssetNotFound => "404 Not Found",
            ProxyError::PathEscape => "Forbidden",
        }
    }

    /// Static asset failures answer in plain text, API failures in JSON
    fn is_plain_text(&self) -> bool {
        matches!(self, ProxyError::AssetNotFound | ProxyError::PathEscape)
    }

    pub fn into_response(self) -> Response<ProxyBody> {
        let status = self.status();
        let message = self.public_message();

        if self.is_plain_text() {
            return proxy::text_response(status, message);
        }

        let body = serde_json::to_vec(&ErrorBody { error: message })
            .unwrap_or_else(|_| br#"{"error":"Internal Server Error"}"#.to_vec());
        proxy::json_response(status, body.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_credential_renders_json() {
        let response = ProxyError::MissingCredential.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body_of(response).await, r#"{"error":"Missing API key"}"#);
    }

    #[tokio::test]
    async fn test_malformed_request_renders_json() {
        let response = ProxyError::MalformedRequest.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await, r#"{"error":"Invalid JSON"}"#);
    }

    #[tokio::test]
    async fn test_upstream_unreachable_hides_details() {
        let err = ProxyError::from(UpstreamError::Connect("dns error: api.resend.com".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_of(response).await,
            r#"{"error":"Failed to contact Resend API"}"#
        );
    }

    #[tokio::test]
    async fn test_static_errors_are_plain_text() {
        let response = ProxyError::PathEscape.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(body_of(response).await, "Forbidden");

        let response = ProxyError::AssetNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, "404 Not Found");
    }

    #[tokio::test]
    async fn test_error_responses_carry_cors() {
        let response = ProxyError::PayloadTooLarge { limit: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
