//! Media cache configuration

use std::time::Duration;

/// Default window during which a cached file without a revalidation token is
/// trusted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Configuration for the media cache store.
#[derive(Debug, Clone)]
pub struct MediaCacheConfig {
    /// Directory name under the host cache directory (default: "media")
    pub directory_name: String,

    /// How long an unverifiable cached file stays trusted (default: 300s)
    pub ttl: Duration,

    /// Per-request timeout handed to the HTTP bridge. `None` keeps the
    /// platform default.
    pub request_timeout: Option<Duration>,

    /// Extension used when an audio URL has none (default: "mp3")
    pub default_audio_extension: String,

    /// Extension used when a subtitle URL has none (default: "srt")
    pub default_subtitle_extension: String,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            directory_name: "media".to_string(),
            ttl: DEFAULT_TTL,
            request_timeout: None,
            default_audio_extension: "mp3".to_string(),
            default_subtitle_extension: "srt".to_string(),
        }
    }
}

impl MediaCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_directory_name(mut self, name: impl Into<String>) -> Self {
        self.directory_name = name.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.directory_name.is_empty() {
            return Err("directory_name cannot be empty".to_string());
        }

        if self.directory_name.contains(['/', '\\']) {
            return Err("directory_name must be a single path component".to_string());
        }

        if self.default_audio_extension.is_empty() || self.default_subtitle_extension.is_empty() {
            return Err("default extensions cannot be empty".to_string());
        }

        if let Some(timeout) = self.request_timeout {
            if timeout.is_zero() {
                return Err("request_timeout must be greater than 0".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MediaCacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.directory_name, "media");
        assert!(config.request_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(MediaCacheConfig::new()
            .with_directory_name("")
            .validate()
            .is_err());
        assert!(MediaCacheConfig::new()
            .with_directory_name("a/b")
            .validate()
            .is_err());
        assert!(MediaCacheConfig::new()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(MediaCacheConfig::new()
            .with_ttl(Duration::from_secs(60))
            .with_request_timeout(Duration::from_secs(30))
            .validate()
            .is_ok());
    }
}
