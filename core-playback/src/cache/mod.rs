//! # Media Cache Module
//!
//! Local copies of chapter audio and subtitle files with conditional
//! revalidation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     MediaCacheStore                    │
//! │  - fetch_audio() / fetch_subtitles()   │
//! │  - cached_audio() (offline)            │
//! │  - clear_all() / stats()               │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> normalize_media_url (cache key)
//!          ├──> RemoteMetadataResolver (HEAD / ranged GET)
//!          ├──> HttpClient (full body fetch)
//!          └──> FileSystemAccess (temp write + rename, token index)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let audio = store.fetch_audio("gs://bucket/book/ch1.mp3").await?;
//! engine.load(&audio.local_path).await?;
//! ```

pub mod config;
pub mod normalize;
pub mod resolver;
pub mod stats;
pub mod store;

pub use config::MediaCacheConfig;
pub use normalize::normalize_media_url;
pub use resolver::{RemoteMetadataResolver, ResolvedResource};
pub use stats::MediaCacheStats;
pub use store::{CachedAudio, CachedText, MediaCacheStore, MediaKind, TokenRecord};
