//! Domain models for books, chapters and per-chapter local state
//!
//! Catalog DTOs mirror the backend's snake_case JSON. Local state records are
//! persisted as JSON maps keyed by [`chapter_key`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Fraction of a chapter after which it counts as finished even if the
/// completion flag was never set.
pub const COMPLETION_THRESHOLD: f64 = 0.999;

// =============================================================================
// ID Types
// =============================================================================

/// Backend identifier for a book
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub String);

impl BookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Backend identifier for a chapter, unique within its book
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub String);

impl ChapterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChapterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Key used by the per-chapter JSON maps: `"{book_id}#{chapter_id}"`.
pub fn chapter_key(book_id: &BookId, chapter_id: &ChapterId) -> String {
    format!("{}#{}", book_id, chapter_id)
}

// =============================================================================
// Catalog DTOs
// =============================================================================

/// Entry of `GET /books`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// Reading metrics reported for a chapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterMetrics {
    #[serde(default)]
    pub word_count: Option<u64>,
    #[serde(default)]
    pub audio_duration_sec: Option<f64>,
    #[serde(default)]
    pub words_per_minute: Option<f64>,
    #[serde(default)]
    pub speaking_pace: Option<String>,
}

/// Entry of `GET /books/{id}/chapters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub id: ChapterId,
    pub title: String,
    #[serde(default)]
    pub chapter_number: Option<u32>,
    #[serde(default)]
    pub audio_available: bool,
    #[serde(default)]
    pub subtitles_available: bool,
    #[serde(flatten)]
    pub metrics: ChapterMetrics,
}

/// Body of `GET /books/{id}/chapters/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterDetail {
    pub id: ChapterId,
    pub title: String,
    #[serde(default)]
    pub chapter_number: Option<u32>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub subtitles_url: Option<String>,
    #[serde(flatten)]
    pub metrics: ChapterMetrics,
}

// =============================================================================
// Local state
// =============================================================================

/// Chapter row as captured in a chapter list snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSnapshot {
    pub chapter_id: ChapterId,
    pub title: String,
    pub chapter_number: Option<u32>,
    pub audio_available: bool,
    pub subtitles_available: bool,
    pub metrics: ChapterMetrics,
}

impl From<&ChapterSummary> for ChapterSnapshot {
    fn from(summary: &ChapterSummary) -> Self {
        Self {
            chapter_id: summary.id.clone(),
            title: summary.title.clone(),
            chapter_number: summary.chapter_number,
            audio_available: summary.audio_available,
            subtitles_available: summary.subtitles_available,
            metrics: summary.metrics.clone(),
        }
    }
}

/// Whole chapter list of one book, replaced wholesale on every refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookChapterSnapshot {
    pub book_id: BookId,
    pub chapters: Vec<ChapterSnapshot>,
    pub cached_at: DateTime<Utc>,
}

/// Durable playback position of one chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningProgressRecord {
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    pub last_position_sec: f64,
    pub total_duration_sec: Option<f64>,
    pub updated_at: DateTime<Utc>,
    pub is_completed: bool,
}

impl ListeningProgressRecord {
    pub fn key(&self) -> String {
        chapter_key(&self.book_id, &self.chapter_id)
    }

    /// Position as a fraction of the duration, when the duration is known.
    pub fn progress_fraction(&self) -> Option<f64> {
        match self.total_duration_sec {
            Some(duration) if duration > 0.0 => {
                Some((self.last_position_sec / duration).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }

    /// Completed, or close enough to the end to be treated as finished.
    pub fn is_effectively_completed(&self) -> bool {
        self.is_completed
            || self
                .progress_fraction()
                .is_some_and(|fraction| fraction >= COMPLETION_THRESHOLD - 1e-9)
    }
}

/// Local media files of one chapter, written by the downloaders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCacheEntry {
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub audio_path: PathBuf,
    pub subtitles_path: Option<PathBuf>,
    pub audio_url: String,
    /// Set when the chapter advertises subtitles, even if they are not on
    /// disk yet.
    pub subtitles_url: Option<String>,
    pub metrics: ChapterMetrics,
    pub cached_at: DateTime<Utc>,
}

impl ChapterCacheEntry {
    pub fn key(&self) -> String {
        chapter_key(&self.book_id, &self.chapter_id)
    }
}
