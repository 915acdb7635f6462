//! Static asset serving
//! Resolves request paths inside a base directory and reads files whole

use crate::error::ProxyError;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Document served for `/`
pub const DEFAULT_DOCUMENT: &str = "index.html";

/// A loaded asset ready to be written out
#[derive(Debug)]
pub struct Asset {
    pub content: Bytes,
    pub content_type: &'static str,
}

/// Static file server rooted at a single directory
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    default_document: String,
}

impl StaticFiles {
    pub fn new<P: AsRef<Path>>(root: P, default_document: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            default_document: default_document.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the asset for `request_path`
    pub async fn load(&self, request_path: &str) -> Result<Asset, ProxyError> {
        let request_path = if request_path == "/" {
            self.default_document.as_str()
        } else {
            request_path
        };

        let file_path = resolve_within(&self.root, request_path)?;

        let content = match fs::read(&file_path).await {
            Ok(c) => c,
            Err(e) => {
                debug!("Failed to read '{}': {}", file_path.display(), e);
                return Err(ProxyError::AssetNotFound);
            }
        };

        let content_type = content_type(file_path.extension().and_then(|e| e.to_str()));
        debug!("Serving {} ({} bytes, {})", file_path.display(), content.len(), content_type);

        Ok(Asset {
            content: Bytes::from(content),
            content_type,
        })
    }
}

/// Resolve `request_path` against `base` and refuse anything outside it.
///
/// Both sides are compared as canonical absolute paths. A target that does
/// not exist cannot be canonicalized, so it is normalized lexically against
/// the canonical base instead: escaping still yields `PathEscape`, staying
/// inside yields `AssetNotFound`.
pub fn resolve_within(base: &Path, request_path: &str) -> Result<PathBuf, ProxyError> {
    let base = match base.canonicalize() {
        Ok(b) => b,
        Err(e) => {
            warn!("Static directory '{}' is not accessible: {}", base.display(), e);
            return Err(ProxyError::AssetNotFound);
        }
    };

    let candidate = base.join(request_path.trim_start_matches('/'));

    match candidate.canonicalize() {
        Ok(resolved) if resolved.starts_with(&base) => Ok(resolved),
        Ok(resolved) => {
            warn!(
                "Path traversal attempt blocked: {} -> {}",
                request_path,
                resolved.display()
            );
            Err(ProxyError::PathEscape)
        }
        Err(_) => {
            if normalize(&candidate).starts_with(&base) {
                Err(ProxyError::AssetNotFound)
            } else {
                warn!("Path traversal attempt blocked: {}", request_path);
                Err(ProxyError::PathEscape)
            }
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Content-Type for a file extension; unknown types are served as plain text
pub fn content_type(extension: Option<&str>) -> &'static str {
    let extension = extension.map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        _ => "text/plain",
    }
}
