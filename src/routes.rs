//! Route classification
//! Maps method + path onto exactly one handler, first match wins

use hyper::Method;

pub const SEND_PATH: &str = "/api/send";
pub const DOMAINS_PATH: &str = "/api/domains";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// CORS preflight, any path
    Preflight,
    SendEmail,
    ListDomains,
    /// Fallback for every other method and path
    StaticAsset,
}

impl Route {
    pub fn classify(method: &Method, path: &str) -> Self {
        if method == Method::OPTIONS {
            Route::Preflight
        } else if method == Method::POST && path == SEND_PATH {
            Route::SendEmail
        } else if method == Method::GET && path == DOMAINS_PATH {
            Route::ListDomains
        } else {
            Route::StaticAsset
        }
    }
}
