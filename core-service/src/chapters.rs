//! Books, chapter lists and downloads

use chrono::{DateTime, Utc};
use core_download::{BatchOutcome, DownloadBoard};
use core_library::models::{Book, BookId, ChapterId, ChapterSnapshot};
use core_runtime::events::{CoreEvent, LibraryEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::CoreService;

/// Chapter list of one book as shown to the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterListing {
    pub book_id: BookId,
    pub chapters: Vec<ChapterSnapshot>,
    /// Set when the network failed and an expired snapshot was served.
    pub is_offline: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

impl CoreService {
    pub async fn list_books(&self) -> Result<Vec<Book>> {
        Ok(self.catalog.list_books().await?)
    }

    /// Fresh snapshot, else the network, else the last snapshot marked
    /// offline. `force_refresh` skips the fresh-snapshot check.
    ///
    /// # Errors
    ///
    /// The network error when there is no snapshot to fall back to.
    #[instrument(skip(self), fields(book_id = %book_id))]
    pub async fn chapter_list(&self, book_id: &BookId, force_refresh: bool) -> Result<ChapterListing> {
        if !force_refresh {
            if let Some(chapters) = self
                .chapter_cache
                .fresh_list(book_id, self.config.chapter_list_ttl)
                .await?
            {
                debug!("Serving chapter list from snapshot");
                return Ok(ChapterListing {
                    book_id: book_id.clone(),
                    chapters,
                    is_offline: false,
                    cached_at: None,
                });
            }
        }

        match self.catalog.list_chapters(book_id).await {
            Ok(summaries) => {
                let chapters: Vec<ChapterSnapshot> =
                    summaries.iter().map(ChapterSnapshot::from).collect();
                let snapshot = self.chapter_cache.store(book_id, chapters).await?;
                let _ = self
                    .event_bus
                    .emit(CoreEvent::Library(LibraryEvent::ChapterListRefreshed {
                        book_id: book_id.to_string(),
                        count: snapshot.chapters.len(),
                    }));
                Ok(ChapterListing {
                    book_id: book_id.clone(),
                    chapters: snapshot.chapters,
                    is_offline: false,
                    cached_at: Some(snapshot.cached_at),
                })
            }
            Err(e) => {
                let Some(snapshot) = self.chapter_cache.cached_list(book_id).await? else {
                    return Err(e.into());
                };
                warn!(error = %e, "Chapter list unreachable, serving cached snapshot");
                let _ = self
                    .event_bus
                    .emit(CoreEvent::Library(LibraryEvent::ServedStale {
                        book_id: book_id.to_string(),
                    }));
                Ok(ChapterListing {
                    book_id: book_id.clone(),
                    chapters: snapshot.chapters,
                    is_offline: true,
                    cached_at: Some(snapshot.cached_at),
                })
            }
        }
    }

    pub async fn invalidate_chapter_list(&self, book_id: &BookId) -> Result<()> {
        Ok(self.chapter_cache.invalidate(book_id).await?)
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Starts a background bulk download of every eligible chapter.
    #[instrument(skip(self), fields(book_id = %book_id))]
    pub async fn download_book(
        &self,
        book_id: &BookId,
    ) -> Result<JoinHandle<core_download::Result<BatchOutcome>>> {
        let listing = self.chapter_list(book_id, false).await?;
        info!(chapters = listing.chapters.len(), "Starting bulk download");
        Ok(self.downloads.start_batch(book_id.clone(), listing.chapters))
    }

    pub fn cancel_book_download(&self) -> bool {
        self.downloads.cancel_batch()
    }

    #[instrument(skip(self), fields(book_id = %book_id, chapter_id = %chapter_id))]
    pub async fn download_chapter(&self, book_id: &BookId, chapter_id: &ChapterId) -> Result<()> {
        let listing = self.chapter_list(book_id, false).await?;
        let chapter = listing
            .chapters
            .iter()
            .find(|chapter| &chapter.chapter_id == chapter_id)
            .ok_or_else(|| CoreError::ChapterNotFound {
                book_id: book_id.to_string(),
                chapter_id: chapter_id.to_string(),
            })?;
        Ok(self.downloads.download_chapter(book_id, chapter).await?)
    }

    pub fn download_tasks(&self) -> Arc<DownloadBoard> {
        self.downloads.tasks()
    }
}
