//! Playback preparation, progress backup and cache maintenance

use bridge_traits::time::Clock;
use core_library::models::{
    BookId, ChapterCacheEntry, ChapterDetail, ChapterId, ChapterMetrics, ListeningProgressRecord,
};
use core_playback::error::PlaybackError;
use core_playback::{MediaCacheStats, SubtitleContext, SubtitleTrack};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::CoreService;

/// Chapter loaded into the playback coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedChapter {
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub audio_path: PathBuf,
    pub has_subtitles: bool,
    pub metrics: ChapterMetrics,
    /// Served from local files because the backend or media host failed.
    pub is_offline: bool,
}

struct ChapterMedia {
    title: String,
    audio_path: PathBuf,
    subtitles: Option<String>,
    metrics: ChapterMetrics,
    is_offline: bool,
}

impl CoreService {
    /// Fetches the chapter's media and loads it into the playback coordinator.
    ///
    /// Falls back to the chapter's downloaded files when the detail request or
    /// the audio fetch fails. Subtitle failures never block playback; the
    /// chapter plays without alignment instead.
    ///
    /// # Errors
    ///
    /// The original fetch error when nothing usable is cached, or the engine's
    /// load error.
    #[instrument(skip(self), fields(book_id = %book_id, chapter_id = %chapter_id))]
    pub async fn prepare_playback(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
    ) -> Result<PreparedChapter> {
        let media = match self.catalog.chapter_detail(book_id, chapter_id).await {
            Ok(detail) => match self.fetch_chapter_media(book_id, detail).await {
                Ok(media) => media,
                Err(e) => self.offline_media(book_id, chapter_id, e).await?,
            },
            Err(e) => self.offline_media(book_id, chapter_id, e.into()).await?,
        };

        self.playback
            .configure_session(
                book_id.clone(),
                chapter_id.clone(),
                &media.audio_path,
                media.metrics.audio_duration_sec,
            )
            .await?;

        let track = match media.subtitles.as_deref() {
            Some(text) => SubtitleTrack::parse(text).unwrap_or_else(|e| {
                warn!(error = %e, "Subtitles could not be parsed");
                SubtitleTrack::empty()
            }),
            None => SubtitleTrack::empty(),
        };
        let has_subtitles = !track.is_empty();
        self.playback.attach_subtitles(track).await?;

        info!(offline = media.is_offline, "Chapter prepared");
        Ok(PreparedChapter {
            book_id: book_id.clone(),
            chapter_id: chapter_id.clone(),
            title: media.title,
            audio_path: media.audio_path,
            has_subtitles,
            metrics: media.metrics,
            is_offline: media.is_offline,
        })
    }

    async fn fetch_chapter_media(&self, book_id: &BookId, detail: ChapterDetail) -> Result<ChapterMedia> {
        let audio_url = detail
            .audio_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| PlaybackError::AudioUnavailable(detail.id.to_string()))?;

        let (audio, mut is_offline) = match self.media.fetch_audio(&audio_url).await {
            Ok(audio) => (audio, false),
            Err(e) => match self.media.cached_audio(&audio_url).await? {
                Some(audio) => {
                    warn!(error = %e, "Audio fetch failed, using cached copy");
                    (audio, true)
                }
                None => return Err(e.into()),
            },
        };

        let subtitles_url = detail.subtitles_url.filter(|url| !url.trim().is_empty());
        let subtitles = match &subtitles_url {
            Some(url) => match self.media.fetch_subtitles(url).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(error = %e, "Subtitle fetch failed, trying cached copy");
                    let cached = self.media.cached_subtitles(url).await.ok().flatten();
                    is_offline |= cached.is_some();
                    cached
                }
            },
            None => None,
        };

        let entry = ChapterCacheEntry {
            book_id: book_id.clone(),
            chapter_id: detail.id.clone(),
            title: detail.title.clone(),
            audio_path: audio.local_path.clone(),
            subtitles_path: subtitles.as_ref().map(|s| s.local_path.clone()),
            audio_url: audio.remote_url.clone(),
            subtitles_url: subtitles
                .as_ref()
                .map(|s| s.remote_url.clone())
                .or(subtitles_url),
            metrics: detail.metrics.clone(),
            cached_at: self.config.clock.now(),
        };
        if let Err(e) = self.media_index.upsert(entry).await {
            warn!(error = %e, "Could not record chapter media entry");
        }

        Ok(ChapterMedia {
            title: detail.title,
            audio_path: audio.local_path,
            subtitles: subtitles.map(|s| s.text),
            metrics: detail.metrics,
            is_offline,
        })
    }

    async fn offline_media(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
        cause: CoreError,
    ) -> Result<ChapterMedia> {
        let Some(entry) = self.media_index.get_playable(book_id, chapter_id).await? else {
            return Err(cause);
        };
        warn!(error = %cause, "Serving chapter from local files");

        let subtitles = match &entry.subtitles_path {
            Some(path) => match self.media.read_text(path).await {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!(error = %e, "Cached subtitles unreadable");
                    None
                }
            },
            None => None,
        };

        Ok(ChapterMedia {
            title: entry.title,
            audio_path: entry.audio_path,
            subtitles,
            metrics: entry.metrics,
            is_offline: true,
        })
    }

    /// Subtitle window around `time` in the current subtitle mode.
    pub fn subtitle_context_at(&self, time: f64) -> Option<SubtitleContext> {
        self.playback.subtitle_context_at(time)
    }

    // =========================================================================
    // Progress backup
    // =========================================================================

    pub async fn progress_for_book(&self, book_id: &BookId) -> Vec<ListeningProgressRecord> {
        self.progress.records_for_book(book_id).await
    }

    pub async fn export_progress(&self) -> Vec<ListeningProgressRecord> {
        self.progress.export_all().await
    }

    /// Replaces the whole progress set. Returns the number of records stored.
    pub async fn import_progress(&self, records: Vec<ListeningProgressRecord>) -> Result<usize> {
        Ok(self.progress.import_all(records).await?)
    }

    pub async fn clear_progress(&self, book_id: &BookId, chapter_id: &ChapterId) -> Result<bool> {
        Ok(self.progress.clear(book_id, chapter_id).await?)
    }

    pub async fn clear_all_progress(&self) -> Result<()> {
        Ok(self.progress.clear_all().await?)
    }

    // =========================================================================
    // Media cache
    // =========================================================================

    pub async fn media_cache_stats(&self) -> Result<MediaCacheStats> {
        Ok(self.media.stats().await?)
    }

    /// Wipes the media cache directory and forgets every downloaded chapter.
    /// Chapter lists and progress are kept.
    pub async fn clear_media_cache(&self) -> Result<u64> {
        let removed = self.media.clear_all().await?;
        self.media_index.clear_all().await?;
        Ok(removed)
    }
}
