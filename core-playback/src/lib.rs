//! # Playback & Media Cache Module
//!
//! Everything between a chapter's remote media URLs and the host audio engine.
//!
//! ## Overview
//!
//! This module handles:
//! - Conditional fetching and atomic caching of audio and subtitle files
//! - Subtitle parsing (SRT and JSON word timings) and time alignment
//! - The playback session state machine with periodic position sampling
//!
//! Audio decoding and output stay on the host side behind
//! [`bridge_traits::PlaybackEngine`].

pub mod cache;
pub mod error;
pub mod session;
pub mod subtitles;

pub use cache::{CachedAudio, CachedText, MediaCacheConfig, MediaCacheStats, MediaCacheStore};
pub use error::{PlaybackError, Result};
pub use session::{PlaybackCoordinator, PlaybackSnapshot, PlaybackState, SessionConfig};
pub use subtitles::{SubtitleContext, SubtitleMode, SubtitleTrack};
