//! # Core Configuration Module
//!
//! Builder-based configuration for the storytelling core.
//!
//! ## Overview
//!
//! [`CoreConfig`] holds the host bridges and the timing knobs shared by the
//! cache, playback and download components. The builder validates everything
//! up front so that a misconfigured host fails at startup with an actionable
//! message instead of deep inside a fetch.
//!
//! ## Required settings
//!
//! - `api_base_url` - backend serving `/books` and chapter endpoints
//! - `cache_dir` - media cache directory (re-downloadable content)
//! - `data_dir` - JSON state files (progress, chapter snapshots, cache index)
//!
//! ## Bridges
//!
//! - `HttpClient` - desktop default: reqwest
//! - `FileSystemAccess` - desktop default: tokio fs rooted at the two directories
//! - `Clock` - defaults to the system clock
//!
//! Without the `desktop-shims` feature, missing bridges produce
//! [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .cache_dir("/path/to/cache")
//!     .data_dir("/path/to/data")
//!     .media_cache_ttl(Duration::from_secs(600))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default window during which a cached file without a revalidation token is
/// trusted.
pub const DEFAULT_MEDIA_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default freshness window for chapter list snapshots.
pub const DEFAULT_CHAPTER_LIST_TTL: Duration = Duration::from_secs(300);

/// Default playback sampling period (~30 Hz).
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(33);

/// Default minimum spacing between non-forced progress writes.
pub const DEFAULT_PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Core configuration.
///
/// Use [`CoreConfig::builder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Backend base URL, without trailing slash
    pub api_base_url: String,

    /// Directory owned by the media cache store
    pub cache_dir: PathBuf,

    /// Directory for persisted JSON state
    pub data_dir: PathBuf,

    pub http_client: Arc<dyn HttpClient>,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub clock: Arc<dyn Clock>,

    pub media_cache_ttl: Duration,

    pub chapter_list_ttl: Duration,

    pub sampling_interval: Duration,

    pub progress_save_interval: Duration,

    /// Capacity of the broadcast event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("cache_dir", &self.cache_dir)
            .field("data_dir", &self.data_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("media_cache_ttl", &self.media_cache_ttl)
            .field("chapter_list_ttl", &self.chapter_list_ttl)
            .field("sampling_interval", &self.sampling_interval)
            .field("progress_save_interval", &self.progress_save_interval)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The API base URL is an absolute http(s) URL
    /// - Directories are not empty
    /// - Sampling runs between 1 Hz and 1 kHz
    /// - Progress writes are not spaced tighter than the sampling tick
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.api_base_url).map_err(|e| {
            Error::Config(format!(
                "API base URL '{}' is not a valid URL: {}",
                self.api_base_url, e
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API base URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.sampling_interval < Duration::from_millis(1)
            || self.sampling_interval > Duration::from_secs(1)
        {
            return Err(Error::Config(format!(
                "Sampling interval must be between 1ms and 1s, got {:?}",
                self.sampling_interval
            )));
        }

        if self.progress_save_interval < self.sampling_interval {
            return Err(Error::Config(
                "Progress save interval cannot be shorter than the sampling interval".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                  Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                  Mobile: inject the platform-native adapter."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "No file system implementation provided. \
                  Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                  Mobile: inject sandboxed app-directory access."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(
    cache_dir: &std::path::Path,
    data_dir: &std::path::Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_directories(
        cache_dir.to_path_buf(),
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(
    _cache_dir: &std::path::Path,
    _data_dir: &std::path::Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    cache_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    clock: Option<Arc<dyn Clock>>,
    media_cache_ttl: Option<Duration>,
    chapter_list_ttl: Option<Duration>,
    sampling_interval: Option<Duration>,
    progress_save_interval: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the backend base URL. A trailing slash is trimmed.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, a tokio-based implementation rooted at the cache and
    /// data directories is used when the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Overrides the time source. Tests use this to drive TTL expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Default: 300 seconds
    pub fn media_cache_ttl(mut self, ttl: Duration) -> Self {
        self.media_cache_ttl = Some(ttl);
        self
    }

    /// Default: 300 seconds
    pub fn chapter_list_ttl(mut self, ttl: Duration) -> Self {
        self.chapter_list_ttl = Some(ttl);
        self
    }

    /// Default: 33 milliseconds
    pub fn sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = Some(interval);
        self
    }

    /// Default: 5 seconds
    pub fn progress_save_interval(mut self, interval: Duration) -> Self {
        self.progress_save_interval = Some(interval);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error with an actionable message if a required setting or
    /// bridge is missing, or if [`CoreConfig::validate`] rejects a value.
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = self
            .api_base_url
            .ok_or_else(|| {
                Error::Config(
                    "API base URL is required. Use .api_base_url() to set it.".to_string(),
                )
            })?
            .trim_end_matches('/')
            .to_string();

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir, &data_dir)?,
        };

        let config = CoreConfig {
            api_base_url,
            cache_dir,
            data_dir,
            http_client,
            file_system,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            media_cache_ttl: self.media_cache_ttl.unwrap_or(DEFAULT_MEDIA_CACHE_TTL),
            chapter_list_ttl: self.chapter_list_ttl.unwrap_or(DEFAULT_CHAPTER_LIST_TTL),
            sampling_interval: self.sampling_interval.unwrap_or(DEFAULT_SAMPLING_INTERVAL),
            progress_save_interval: self
                .progress_save_interval
                .unwrap_or(DEFAULT_PROGRESS_SAVE_INTERVAL),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
