//! # Bulk Download Orchestrator
//!
//! Downloads the audio and subtitles of many chapters of one book, one chapter
//! at a time, and records each finished chapter in the [`ChapterMediaIndex`].
//!
//! ## Workflow
//!
//! 1. Select eligible chapters (audio and subtitles available, not yet
//!    downloaded, not already finished by the listener)
//! 2. Mark them enqueued on the task board
//! 3. For each chapter: fetch detail, audio, subtitles, then persist the
//!    index entry, reporting progress at fixed checkpoints
//! 4. Stop on the first failure and return the untouched chapters to idle
//!
//! Cancellation is cooperative: the batch token is checked between steps and
//! raced against every network call. The chapter in flight goes back to idle;
//! chapters finished before the cancel stay downloaded.

use bridge_traits::time::Clock;
use core_library::catalog::CatalogApi;
use core_library::media_index::ChapterMediaIndex;
use core_library::models::{
    chapter_key, BookId, ChapterCacheEntry, ChapterId, ChapterSnapshot,
};
use core_library::progress::ListeningProgressStore;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::fetcher::MediaFetcher;
use crate::progress::{BatchOutcome, BatchProgress, EtaEstimator};
use crate::task::{DownloadBoard, DownloadTaskState, InFlightGuard, TaskBoard};

const PROGRESS_STARTED: f64 = 0.05;
const PROGRESS_DETAIL: f64 = 0.1;
const PROGRESS_AUDIO: f64 = 0.6;
const PROGRESS_SUBTITLES: f64 = 0.8;
const PROGRESS_DONE: f64 = 1.0;

/// Chapters a bulk download should pick up, in list order.
pub fn eligible_chapters(
    chapters: &[ChapterSnapshot],
    downloaded: &HashSet<ChapterId>,
    completed: &HashSet<ChapterId>,
    config: &DownloadConfig,
) -> Vec<ChapterSnapshot> {
    chapters
        .iter()
        .filter(|chapter| chapter.audio_available)
        .filter(|chapter| !config.require_subtitles || chapter.subtitles_available)
        .filter(|chapter| !downloaded.contains(&chapter.chapter_id))
        .filter(|chapter| !config.skip_completed || !completed.contains(&chapter.chapter_id))
        .cloned()
        .collect()
}

struct ActiveBatch {
    book_id: BookId,
    token: CancellationToken,
}

/// Clears the active batch slot when the batch returns or is dropped.
struct ActiveBatchSlot<'a>(&'a Mutex<Option<ActiveBatch>>);

impl Drop for ActiveBatchSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

pub struct BulkDownloadOrchestrator {
    catalog: Arc<dyn CatalogApi>,
    media: Arc<dyn MediaFetcher>,
    media_index: Arc<ChapterMediaIndex>,
    progress_store: Arc<ListeningProgressStore>,
    clock: Arc<dyn Clock>,
    config: DownloadConfig,
    board: TaskBoard,
    batch_tx: watch::Sender<Option<BatchProgress>>,
    active_batch: Mutex<Option<ActiveBatch>>,
    single_downloads: Mutex<HashMap<String, CancellationToken>>,
    event_bus: Option<EventBus>,
}

impl BulkDownloadOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        media: Arc<dyn MediaFetcher>,
        media_index: Arc<ChapterMediaIndex>,
        progress_store: Arc<ListeningProgressStore>,
        clock: Arc<dyn Clock>,
        config: DownloadConfig,
    ) -> Self {
        let (batch_tx, _) = watch::channel(None);
        Self {
            catalog,
            media,
            media_index,
            progress_store,
            clock,
            config,
            board: TaskBoard::new(),
            batch_tx,
            active_batch: Mutex::new(None),
            single_downloads: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn subscribe_tasks(&self) -> watch::Receiver<Arc<DownloadBoard>> {
        self.board.subscribe()
    }

    pub fn tasks(&self) -> Arc<DownloadBoard> {
        self.board.snapshot()
    }

    pub fn task_state(&self, book_id: &BookId, chapter_id: &ChapterId) -> DownloadTaskState {
        self.board.state(book_id, chapter_id)
    }

    /// `None` while no batch is running.
    pub fn subscribe_batch(&self) -> watch::Receiver<Option<BatchProgress>> {
        self.batch_tx.subscribe()
    }

    pub fn is_batch_running(&self) -> bool {
        self.active_batch.lock().is_some()
    }

    // =========================================================================
    // Batch
    // =========================================================================

    /// Runs the batch on a background task.
    pub fn start_batch(
        self: &Arc<Self>,
        book_id: BookId,
        chapters: Vec<ChapterSnapshot>,
    ) -> JoinHandle<Result<BatchOutcome>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run_batch(&book_id, &chapters).await })
    }

    /// Downloads every eligible chapter of `chapters` in order.
    ///
    /// # Errors
    ///
    /// [`DownloadError::BatchInProgress`] if another batch is running. Item
    /// failures do not surface here; they end the batch with
    /// [`BatchOutcome::Failed`].
    #[instrument(skip(self, book_id, chapters), fields(book_id = %book_id))]
    pub async fn run_batch(
        &self,
        book_id: &BookId,
        chapters: &[ChapterSnapshot],
    ) -> Result<BatchOutcome> {
        let token = CancellationToken::new();
        {
            let mut active = self.active_batch.lock();
            if let Some(batch) = active.as_ref() {
                return Err(DownloadError::BatchInProgress {
                    book_id: batch.book_id.to_string(),
                });
            }
            *active = Some(ActiveBatch {
                book_id: book_id.clone(),
                token: token.clone(),
            });
        }
        let _slot = ActiveBatchSlot(&self.active_batch);

        let downloaded = self.media_index.downloaded_chapters(book_id).await?;
        let completed: HashSet<ChapterId> = self
            .progress_store
            .records_for_book(book_id)
            .await
            .into_iter()
            .filter(|record| record.is_effectively_completed())
            .map(|record| record.chapter_id)
            .collect();

        let queue: Vec<ChapterSnapshot> =
            eligible_chapters(chapters, &downloaded, &completed, &self.config)
                .into_iter()
                .filter(|chapter| self.board.try_claim(book_id, &chapter.chapter_id, &chapter.title))
                .collect();

        info!(
            "Bulk download of {} chapters, {} already on disk",
            queue.len(),
            downloaded.len()
        );
        self.emit(DownloadEvent::BatchStarted {
            book_id: book_id.to_string(),
            total: queue.len(),
        });

        let mut eta = EtaEstimator::new();
        let mut progress = BatchProgress {
            book_id: book_id.clone(),
            total: queue.len(),
            completed: 0,
            downloaded: chapters
                .iter()
                .filter(|chapter| downloaded.contains(&chapter.chapter_id))
                .count(),
            current_title: None,
            eta_secs: None,
        };

        let mut outcome = BatchOutcome::Finished { completed: 0 };
        for (position, chapter) in queue.iter().enumerate() {
            if token.is_cancelled() {
                outcome = BatchOutcome::Cancelled {
                    completed: progress.completed,
                };
                self.release(book_id, &queue[position..]);
                break;
            }

            progress.current_title = Some(chapter.title.clone());
            self.batch_tx.send_replace(Some(progress.clone()));

            let started = Instant::now();
            match self.download_item(book_id, chapter, &token).await {
                Ok(()) => {
                    eta.record(started.elapsed());
                    progress.completed += 1;
                    progress.downloaded += 1;
                    progress.eta_secs = eta
                        .estimate(queue.len() - progress.completed)
                        .map(|left| left.as_secs_f64());
                    self.batch_tx.send_replace(Some(progress.clone()));
                }
                Err(DownloadError::Cancelled) => {
                    outcome = BatchOutcome::Cancelled {
                        completed: progress.completed,
                    };
                    self.release(book_id, &queue[position + 1..]);
                    break;
                }
                Err(e) => {
                    warn!("Bulk download stopped at {}: {}", chapter.chapter_id, e);
                    outcome = BatchOutcome::Failed {
                        completed: progress.completed,
                        message: e.to_string(),
                    };
                    self.release(book_id, &queue[position + 1..]);
                    break;
                }
            }
        }

        if let BatchOutcome::Finished { completed } = &mut outcome {
            *completed = progress.completed;
        }
        self.batch_tx.send_replace(None);
        self.emit(match &outcome {
            BatchOutcome::Finished { completed } => DownloadEvent::BatchFinished {
                book_id: book_id.to_string(),
                completed: *completed,
            },
            BatchOutcome::Cancelled { completed } => DownloadEvent::BatchCancelled {
                book_id: book_id.to_string(),
                completed: *completed,
            },
            BatchOutcome::Failed { completed, message } => DownloadEvent::BatchFailed {
                book_id: book_id.to_string(),
                completed: *completed,
                message: message.clone(),
            },
        });
        info!("Bulk download ended: {:?}", outcome);

        Ok(outcome)
    }

    /// Requests cancellation of the running batch. Returns `false` when no
    /// batch is running.
    pub fn cancel_batch(&self) -> bool {
        match self.active_batch.lock().as_ref() {
            Some(batch) => {
                batch.token.cancel();
                info!("Cancelling bulk download for {}", batch.book_id);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Single chapter
    // =========================================================================

    /// Downloads one chapter outside any batch.
    ///
    /// # Errors
    ///
    /// [`DownloadError::ChapterBusy`] if the chapter is already queued or
    /// downloading, whether by a batch or another single download.
    #[instrument(skip(self, book_id, chapter), fields(book_id = %book_id, chapter_id = %chapter.chapter_id))]
    pub async fn download_chapter(&self, book_id: &BookId, chapter: &ChapterSnapshot) -> Result<()> {
        if !self.board.try_claim(book_id, &chapter.chapter_id, &chapter.title) {
            return Err(DownloadError::ChapterBusy {
                chapter_id: chapter.chapter_id.to_string(),
            });
        }

        let key = chapter_key(book_id, &chapter.chapter_id);
        let token = CancellationToken::new();
        self.single_downloads.lock().insert(key.clone(), token.clone());

        let result = self.download_item(book_id, chapter, &token).await;

        self.single_downloads.lock().remove(&key);
        result
    }

    pub fn cancel_chapter(&self, book_id: &BookId, chapter_id: &ChapterId) -> bool {
        match self.single_downloads.lock().get(&chapter_key(book_id, chapter_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Item pipeline
    // =========================================================================

    async fn download_item(
        &self,
        book_id: &BookId,
        chapter: &ChapterSnapshot,
        token: &CancellationToken,
    ) -> Result<()> {
        let guard = InFlightGuard::new(&self.board, book_id, &chapter.chapter_id);
        let result = self.download_steps(book_id, chapter, token).await;

        match &result {
            Ok(()) => {
                guard.settle(DownloadTaskState::Downloaded);
                self.emit(DownloadEvent::ItemFinished {
                    book_id: book_id.to_string(),
                    chapter_id: chapter.chapter_id.to_string(),
                });
            }
            Err(DownloadError::Cancelled) => {
                debug!("Chapter {} cancelled", chapter.chapter_id);
                drop(guard);
            }
            Err(e) => {
                guard.settle(DownloadTaskState::Failed {
                    reason: e.to_string(),
                });
                self.emit(DownloadEvent::ItemFailed {
                    book_id: book_id.to_string(),
                    chapter_id: chapter.chapter_id.to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn download_steps(
        &self,
        book_id: &BookId,
        chapter: &ChapterSnapshot,
        token: &CancellationToken,
    ) -> Result<()> {
        let chapter_id = &chapter.chapter_id;
        self.checkpoint(book_id, chapter_id, PROGRESS_STARTED, token)?;

        let detail = cancellable(token, self.catalog.chapter_detail(book_id, chapter_id)).await?;
        self.checkpoint(book_id, chapter_id, PROGRESS_DETAIL, token)?;

        let audio_url = detail
            .audio_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| DownloadError::AudioUnavailable {
                chapter_id: chapter_id.to_string(),
            })?;
        let audio = cancellable(token, self.media.fetch_audio(&audio_url)).await?;
        self.checkpoint(book_id, chapter_id, PROGRESS_AUDIO, token)?;

        let subtitles = match detail.subtitles_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                let text = cancellable(token, self.media.fetch_subtitles(&url)).await?;
                self.checkpoint(book_id, chapter_id, PROGRESS_SUBTITLES, token)?;
                Some(text)
            }
            None => None,
        };

        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        self.media_index
            .upsert(ChapterCacheEntry {
                book_id: book_id.clone(),
                chapter_id: chapter_id.clone(),
                title: detail.title,
                audio_path: audio.local_path,
                subtitles_path: subtitles.as_ref().map(|s| s.local_path.clone()),
                audio_url: audio.remote_url,
                subtitles_url: subtitles.map(|s| s.remote_url),
                metrics: detail.metrics,
                cached_at: self.clock.now(),
            })
            .await?;

        self.report(book_id, chapter_id, PROGRESS_DONE);
        Ok(())
    }

    fn checkpoint(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
        fraction: f64,
        token: &CancellationToken,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        self.report(book_id, chapter_id, fraction);
        Ok(())
    }

    fn report(&self, book_id: &BookId, chapter_id: &ChapterId, fraction: f64) {
        self.board.set_state(
            book_id,
            chapter_id,
            DownloadTaskState::Downloading { progress: fraction },
        );
        self.emit(DownloadEvent::ItemProgress {
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
            fraction,
        });
    }

    /// Returns queued chapters that were never started to idle.
    fn release(&self, book_id: &BookId, chapters: &[ChapterSnapshot]) {
        for chapter in chapters {
            if self.board.state(book_id, &chapter.chapter_id) == DownloadTaskState::Enqueued {
                self.board.reset(book_id, &chapter.chapter_id);
            }
        }
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Download(event));
        }
    }
}

async fn cancellable<T, E>(
    token: &CancellationToken,
    operation: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    DownloadError: From<E>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        result = operation => result.map_err(DownloadError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::models::ChapterMetrics;

    fn chapter(id: &str, audio: bool, subtitles: bool) -> ChapterSnapshot {
        ChapterSnapshot {
            chapter_id: ChapterId::from(id),
            title: format!("Chapter {}", id),
            chapter_number: None,
            audio_available: audio,
            subtitles_available: subtitles,
            metrics: ChapterMetrics::default(),
        }
    }

    fn ids(chapters: &[ChapterSnapshot]) -> Vec<&str> {
        chapters.iter().map(|c| c.chapter_id.as_str()).collect()
    }

    #[test]
    fn test_eligibility_filters() {
        let chapters = vec![
            chapter("1", true, true),
            chapter("2", false, true),
            chapter("3", true, false),
            chapter("4", true, true),
            chapter("5", true, true),
        ];
        let downloaded = HashSet::from([ChapterId::from("4")]);
        let completed = HashSet::from([ChapterId::from("5")]);

        let selected = eligible_chapters(&chapters, &downloaded, &completed, &DownloadConfig::default());
        assert_eq!(ids(&selected), vec!["1"]);
    }

    #[test]
    fn test_eligibility_respects_config() {
        let chapters = vec![chapter("1", true, false), chapter("2", true, true)];
        let completed = HashSet::from([ChapterId::from("2")]);
        let config = DownloadConfig::default()
            .with_require_subtitles(false)
            .with_skip_completed(false);

        let selected = eligible_chapters(&chapters, &HashSet::new(), &completed, &config);
        assert_eq!(ids(&selected), vec!["1", "2"]);
    }
}
