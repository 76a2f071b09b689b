//! Bulk download configuration

/// Rules deciding which chapters a bulk download picks up.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Skip chapters whose subtitles are not available (default: true)
    pub require_subtitles: bool,

    /// Skip chapters the listener already finished (default: true)
    pub skip_completed: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            require_subtitles: true,
            skip_completed: true,
        }
    }
}

impl DownloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_require_subtitles(mut self, required: bool) -> Self {
        self.require_subtitles = required;
        self
    }

    pub fn with_skip_completed(mut self, skip: bool) -> Self {
        self.skip_completed = skip;
        self
    }
}
