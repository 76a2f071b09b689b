//! # Playback Error Types
//!
//! Errors raised by the media cache, subtitle parsing and the playback
//! session coordinator.

use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use thiserror::Error;

/// Errors that can occur during caching and playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Remote Resource Errors
    // ========================================================================
    /// URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),

    /// Server answered with something that is not usable media.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Server answered with a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    // ========================================================================
    // Local Storage Errors
    // ========================================================================
    /// Writing or replacing a cache file failed.
    #[error("Failed to write {path}: {message}")]
    FileWriteFailed { path: String, message: String },

    /// Cached text or subtitle content could not be decoded.
    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    // ========================================================================
    // Playback Errors
    // ========================================================================
    /// The chapter has no playable audio.
    #[error("Audio unavailable: {0}")]
    AudioUnavailable(String),

    /// A transport command arrived before any chapter was configured.
    #[error("No chapter loaded")]
    NoChapterLoaded,

    /// Cooperative cancellation. Never shown to the listener.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // Wrapped Errors
    // ========================================================================
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Bridge(e) => e.is_transport(),
            PlaybackError::HttpError(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `false` for errors that should never reach the listener.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, PlaybackError::Cancelled)
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_silent() {
        assert!(!PlaybackError::Cancelled.is_user_visible());
        assert!(PlaybackError::HttpError(404).is_user_visible());
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlaybackError::HttpError(503).is_transient());
        assert!(!PlaybackError::HttpError(404).is_transient());
        assert!(PlaybackError::Bridge(BridgeError::Network("reset".into())).is_transient());
        assert!(!PlaybackError::DecodingFailed("bad".into()).is_transient());
    }
}
