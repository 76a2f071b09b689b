//! # Playback Session
//!
//! Transport state machine, position sampling and progress persistence for
//! the chapter currently loaded in the host audio engine.

pub mod config;
pub mod coordinator;

pub use config::SessionConfig;
pub use coordinator::{PlaybackCoordinator, PlaybackSnapshot, PlaybackState};
