//! Storytelling core.
//!
//! Re-exports the workspace crates behind feature flags so host applications
//! can depend on `storytelling-core` alone:
//!
//! - `desktop-shims` (default): [`service`] with the desktop bridges
//! - `bulk-download`: [`service`] plus the [`download`] orchestrator types
//! - `subtitles`: [`playback`] (subtitle parsing, alignment, media cache)

#[cfg(any(feature = "desktop-shims", feature = "bulk-download"))]
pub use core_service as service;

#[cfg(feature = "bulk-download")]
pub use core_download as download;

#[cfg(feature = "subtitles")]
pub use core_playback as playback;
