//! # Core Download
//!
//! Offline downloads of chapter audio and subtitles.
//!
//! [`BulkDownloadOrchestrator`] runs one batch per book at a time, plus
//! single-chapter downloads, and publishes per-chapter state and batch
//! progress through `watch` channels.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod progress;
pub mod task;

pub use config::DownloadConfig;
pub use error::{DownloadError, Result};
pub use fetcher::MediaFetcher;
pub use orchestrator::{eligible_chapters, BulkDownloadOrchestrator};
pub use progress::{BatchOutcome, BatchProgress, EtaEstimator};
pub use task::{DownloadBoard, DownloadTask, DownloadTaskState};
