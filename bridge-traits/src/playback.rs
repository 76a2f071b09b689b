//! Playback engine bridge.
//!
//! The core never decodes or renders audio. A host audio engine loads a local
//! file, reports its position, and tells the core when media ends by calling
//! into the session coordinator.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// Host audio engine driven by the playback session coordinator.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Load a local audio file, returning its duration in seconds when the
    /// engine can determine it.
    async fn load(&self, path: &Path) -> Result<Option<f64>>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Move the engine's playhead. `position_secs` is already clamped.
    async fn seek(&self, position_secs: f64) -> Result<()>;

    /// Authoritative playhead position, or `None` when the engine missed
    /// a report (the coordinator extrapolates in that case).
    fn current_position(&self) -> Option<f64>;
}
