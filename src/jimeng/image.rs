//! Polymorphic image inputs and their normalization to raw bytes.
//!
//! Clients hand images over as remote URLs, local paths, base64 (bare or
//! data-URI) or raw bytes; the uploader only ever sees bytes.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ImageInput {
    Url(String),
    Path(PathBuf),
    Base64(String),
    Bytes(Vec<u8>),
}

impl ImageInput {
    /// Route a string form to its variant. Data-URIs win over the bare
    /// base64 heuristic; URL detection covers `http(s)://` and `//`.
    pub fn classify(value: &str) -> Self {
        let v = value.trim();
        if let Some(rest) = v.strip_prefix("data:") {
            if let Some((_, payload)) = rest.split_once("base64,") {
                return Self::Base64(payload.to_string());
            }
        }
        if v.starts_with("http://") || v.starts_with("https://") || v.starts_with("//") {
            return Self::Url(v.to_string());
        }
        if looks_like_base64(v) {
            return Self::Base64(v.to_string());
        }
        Self::Path(resolve_local_path(v))
    }

    /// Wrap a value already known to be base64, stripping any data-URI
    /// header first.
    pub fn from_base64(value: &str) -> Self {
        let payload = value
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once("base64,").map(|(_, p)| p))
            .unwrap_or(value);
        Self::Base64(payload.trim().to_string())
    }

    /// Normalize to raw bytes: URLs are fetched once, paths read, base64
    /// decoded, buffers passed through unchanged.
    pub async fn into_bytes(self, http: &reqwest::Client) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Base64(b64) => BASE64
                .decode(b64.trim())
                .map_err(|e| GatewayError::Validation(format!("invalid base64 image: {e}"))),
            Self::Path(path) => tokio::fs::read(&path).await.map_err(|e| {
                GatewayError::Validation(format!("unreadable image file {}: {e}", path.display()))
            }),
            Self::Url(url) => {
                let url = if let Some(rest) = url.strip_prefix("//") {
                    format!("https://{rest}")
                } else {
                    url
                };
                let resp = http
                    .get(&url)
                    .timeout(std::time::Duration::from_secs(60))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(GatewayError::Validation(format!(
                        "image fetch failed: HTTP {} for {url}",
                        resp.status()
                    )));
                }
                Ok(resp.bytes().await?.to_vec())
            }
        }
    }
}

/// Bare base64 heuristic: canonical alphabet, padded length, and an actual
/// successful decode.
fn looks_like_base64(v: &str) -> bool {
    v.len() >= 16
        && v.len() % 4 == 0
        && v.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
        && BASE64.decode(v).is_ok()
}

/// Resolve `file://`, `~`, relative and absolute path forms to one
/// canonical absolute path.
fn resolve_local_path(value: &str) -> PathBuf {
    let v = value.strip_prefix("file://").unwrap_or(value);
    if v == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = v.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    let path = PathBuf::from(v);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}
