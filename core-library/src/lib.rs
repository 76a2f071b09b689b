//! # Library Module
//!
//! Catalog access and the durable per-book / per-chapter state of the
//! listening app.
//!
//! ## Overview
//!
//! - [`catalog`]: backend client for books, chapter lists and chapter detail
//! - [`chapter_cache`]: TTL-bounded chapter list snapshots
//! - [`progress`]: listening progress records with change broadcasting
//! - [`media_index`]: which chapters are fully available offline
//!
//! All state is stored as JSON under the host data directory and replaced
//! atomically on every write.

pub mod catalog;
pub mod chapter_cache;
pub mod error;
pub mod json_store;
pub mod media_index;
pub mod models;
pub mod progress;

pub use catalog::{CatalogApi, HttpCatalogClient};
pub use chapter_cache::ChapterMetadataCache;
pub use error::{LibraryError, Result};
pub use media_index::ChapterMediaIndex;
pub use progress::{CompletionUpdate, ListeningProgressStore, ProgressMap};
