//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every core crate:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! Higher-level crates (`core-library`, `core-playback`, `core-download`)
//! take their bridges and timing knobs from [`config::CoreConfig`] and report
//! activity through [`events::EventBus`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
