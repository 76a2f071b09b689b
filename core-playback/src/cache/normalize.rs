//! Media URL normalization.
//!
//! The normalized URL is the identity of a cached resource. Object-storage
//! pseudo-schemes are rewritten to their public HTTPS form before any network
//! call is made.

use url::Url;

use crate::error::{PlaybackError, Result};

const GCS_SCHEME_PREFIX: &str = "gs://";
const GCS_PUBLIC_BASE: &str = "https://storage.googleapis.com/";

/// Rewrites `gs://bucket/path` to `https://storage.googleapis.com/bucket/path`
/// and validates everything else as an absolute http(s) URL.
pub fn normalize_media_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();

    let candidate = match trimmed.strip_prefix(GCS_SCHEME_PREFIX) {
        Some(rest) => {
            let bucket = rest.split('/').next().unwrap_or_default();
            if bucket.is_empty() {
                return Err(PlaybackError::InvalidUrl(format!(
                    "missing bucket in {}",
                    trimmed
                )));
            }
            format!("{}{}", GCS_PUBLIC_BASE, rest)
        }
        None => trimmed.to_string(),
    };

    let url = Url::parse(&candidate)
        .map_err(|e| PlaybackError::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(PlaybackError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            other, trimmed
        ))),
    }
}
