//! Listening Progress Store
//!
//! Durable per-chapter playback positions, persisted as a single JSON map
//! keyed by `"{book_id}#{chapter_id}"`.
//!
//! ## Write rules
//!
//! [`ListeningProgressStore::save_progress`] applies, in order:
//!
//! 1. An update with no position (`<= 0`), no duration and no completion is
//!    ignored.
//! 2. The incoming duration wins; otherwise the stored one is kept.
//! 3. The position is clamped into `[0, duration]` when a duration is known.
//! 4. Completion is sticky-forward: a completed record stays pinned to its
//!    duration until an explicit [`CompletionUpdate::NotCompleted`].
//!
//! ## Observing changes
//!
//! [`subscribe`](ListeningProgressStore::subscribe) returns a `watch`
//! receiver that immediately holds the current record set and is updated
//! after every successful write. Each write is also announced on the
//! [`EventBus`] when one is attached.

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, ProgressEvent};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::json_store::{read_json, write_json_atomic};
use crate::models::{chapter_key, BookId, ChapterId, ListeningProgressRecord};

const PROGRESS_FILE: &str = "listening_progress.json";

/// All progress records, keyed by [`chapter_key`].
pub type ProgressMap = BTreeMap<String, ListeningProgressRecord>;

/// How a write affects the completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionUpdate {
    /// Keep whatever the stored record says.
    Keep,
    /// Mark completed; the position is raised to the duration.
    Completed,
    /// Explicitly un-complete, e.g. the listener sought back into the chapter.
    NotCompleted,
}

pub struct ListeningProgressStore {
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    path: PathBuf,
    records: Mutex<ProgressMap>,
    watch_tx: watch::Sender<Arc<ProgressMap>>,
    event_bus: Option<EventBus>,
}

impl ListeningProgressStore {
    /// Opens the store, loading any previously persisted records.
    pub async fn open(
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        data_dir: &Path,
    ) -> Result<Self> {
        let path = data_dir.join(PROGRESS_FILE);
        let records: ProgressMap = read_json(fs.as_ref(), &path).await?.unwrap_or_default();
        debug!(count = records.len(), "Loaded listening progress");

        let (watch_tx, _) = watch::channel(Arc::new(records.clone()));

        Ok(Self {
            fs,
            clock,
            path,
            records: Mutex::new(records),
            watch_tx,
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Receiver holding the current record set; updated after every write.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ProgressMap>> {
        self.watch_tx.subscribe()
    }

    pub async fn get(&self, book_id: &BookId, chapter_id: &ChapterId) -> Option<ListeningProgressRecord> {
        self.records
            .lock()
            .await
            .get(&chapter_key(book_id, chapter_id))
            .cloned()
    }

    pub async fn records_for_book(&self, book_id: &BookId) -> Vec<ListeningProgressRecord> {
        self.records
            .lock()
            .await
            .values()
            .filter(|record| &record.book_id == book_id)
            .cloned()
            .collect()
    }

    /// Applies one progress write. Returns the stored record, or `None` when
    /// the update was a no-op.
    #[instrument(skip(self), fields(book_id = %book_id, chapter_id = %chapter_id))]
    pub async fn save_progress(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
        position_sec: f64,
        duration_sec: Option<f64>,
        completion: CompletionUpdate,
    ) -> Result<Option<ListeningProgressRecord>> {
        let incoming_duration = duration_sec.filter(|d| d.is_finite() && *d > 0.0);
        let marks_completed = completion == CompletionUpdate::Completed;

        let has_position = position_sec.is_finite() && position_sec > 0.0;
        if !has_position && incoming_duration.is_none() && !marks_completed {
            debug!("Ignoring empty progress update");
            return Ok(None);
        }

        let mut records = self.records.lock().await;
        let key = chapter_key(book_id, chapter_id);
        let prior = records.get(&key);

        let merged_duration =
            incoming_duration.or_else(|| prior.and_then(|p| p.total_duration_sec));

        let mut position = if position_sec.is_finite() {
            position_sec.max(0.0)
        } else {
            0.0
        };
        if let Some(duration) = merged_duration {
            position = position.min(duration);
        }

        let is_completed = match completion {
            CompletionUpdate::Completed => true,
            CompletionUpdate::NotCompleted => false,
            CompletionUpdate::Keep => prior.is_some_and(|p| p.is_completed),
        };
        if is_completed {
            if let Some(duration) = merged_duration {
                position = duration;
            }
        }

        let record = ListeningProgressRecord {
            book_id: book_id.clone(),
            chapter_id: chapter_id.clone(),
            last_position_sec: position,
            total_duration_sec: merged_duration,
            updated_at: self.clock.now(),
            is_completed,
        };

        let mut next = records.clone();
        next.insert(key, record.clone());
        self.commit(&mut records, next).await?;

        debug!(
            position_sec = record.last_position_sec,
            is_completed = record.is_completed,
            "Saved listening progress"
        );
        self.emit(CoreEvent::Progress(ProgressEvent::Updated {
            book_id: record.book_id.to_string(),
            chapter_id: record.chapter_id.to_string(),
            position_secs: record.last_position_sec,
            duration_secs: record.total_duration_sec,
            is_completed: record.is_completed,
        }));

        Ok(Some(record))
    }

    /// Full record set for the backup collaborator.
    pub async fn export_all(&self) -> Vec<ListeningProgressRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Replaces every record with `records`. Returns the number imported.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn import_all(&self, records: Vec<ListeningProgressRecord>) -> Result<usize> {
        let next: ProgressMap = records
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        let count = next.len();

        let mut current = self.records.lock().await;
        self.commit(&mut current, next).await?;

        info!(count, "Imported listening progress");
        self.emit(CoreEvent::Progress(ProgressEvent::Imported { count }));
        Ok(count)
    }

    /// Removes one record. Returns whether it existed.
    pub async fn clear(&self, book_id: &BookId, chapter_id: &ChapterId) -> Result<bool> {
        let mut records = self.records.lock().await;
        let key = chapter_key(book_id, chapter_id);
        if !records.contains_key(&key) {
            return Ok(false);
        }

        let mut next = records.clone();
        next.remove(&key);
        self.commit(&mut records, next).await?;

        self.emit(CoreEvent::Progress(ProgressEvent::Cleared {
            book_id: Some(book_id.to_string()),
            chapter_id: Some(chapter_id.to_string()),
        }));
        Ok(true)
    }

    pub async fn clear_all(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        self.commit(&mut records, ProgressMap::new()).await?;

        self.emit(CoreEvent::Progress(ProgressEvent::Cleared {
            book_id: None,
            chapter_id: None,
        }));
        Ok(())
    }

    /// Persists `next`, then publishes it. The in-memory map only changes
    /// once the file write succeeded.
    async fn commit(&self, current: &mut ProgressMap, next: ProgressMap) -> Result<()> {
        write_json_atomic(self.fs.as_ref(), &self.path, &next).await?;
        *current = next;
        self.watch_tx.send_replace(Arc::new(current.clone()));
        Ok(())
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::time::ManualClock;
    use uuid::Uuid;

    struct Fixture {
        store: ListeningProgressStore,
        fs: Arc<TokioFileSystem>,
        root: PathBuf,
    }

    impl Fixture {
        async fn new() -> Self {
            let root = std::env::temp_dir().join(format!("progress-store-{}", Uuid::new_v4()));
            let fs = Arc::new(TokioFileSystem::with_directories(
                root.join("cache"),
                root.join("data"),
            ));
            let store = ListeningProgressStore::open(
                fs.clone(),
                Arc::new(ManualClock::at_unix(10)),
                &root.join("data"),
            )
            .await
            .unwrap();
            Self { store, fs, root }
        }

        async fn cleanup(self) {
            let _ = self.fs.delete_dir_all(&self.root).await;
        }
    }

    fn ids() -> (BookId, ChapterId) {
        (BookId::from("book"), ChapterId::from("ch-1"))
    }

    #[tokio::test]
    async fn test_noop_update_is_ignored() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();

        let result = fx
            .store
            .save_progress(&book, &chapter, 0.0, None, CompletionUpdate::Keep)
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(fx.store.get(&book, &chapter).await.is_none());
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_position_is_clamped_to_duration() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();

        let record = fx
            .store
            .save_progress(&book, &chapter, 75.0, Some(60.0), CompletionUpdate::Keep)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_position_sec, 60.0);

        let record = fx
            .store
            .save_progress(&book, &chapter, -5.0, Some(60.0), CompletionUpdate::Keep)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_position_sec, 0.0);
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_duration_is_merged_from_prior_record() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();

        fx.store
            .save_progress(&book, &chapter, 10.0, Some(120.0), CompletionUpdate::Keep)
            .await
            .unwrap();
        let record = fx
            .store
            .save_progress(&book, &chapter, 500.0, None, CompletionUpdate::Keep)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.total_duration_sec, Some(120.0));
        assert_eq!(record.last_position_sec, 120.0);
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_completion_is_sticky_forward() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();

        let record = fx
            .store
            .save_progress(&book, &chapter, 30.0, Some(60.0), CompletionUpdate::Completed)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_completed);
        assert_eq!(record.last_position_sec, 60.0);

        // Later completed write with a smaller position still pins to the end
        let record = fx
            .store
            .save_progress(&book, &chapter, 12.0, None, CompletionUpdate::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_position_sec, 60.0);

        // A plain write does not silently regress a finished chapter
        let record = fx
            .store
            .save_progress(&book, &chapter, 5.0, None, CompletionUpdate::Keep)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_completed);
        assert_eq!(record.last_position_sec, 60.0);

        // Explicit un-complete does
        let record = fx
            .store
            .save_progress(&book, &chapter, 5.0, None, CompletionUpdate::NotCompleted)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_completed);
        assert_eq!(record.last_position_sec, 5.0);
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_subscribe_replays_current_value() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();

        fx.store
            .save_progress(&book, &chapter, 42.0, Some(100.0), CompletionUpdate::Keep)
            .await
            .unwrap();

        let rx = fx.store.subscribe();
        let current = rx.borrow().clone();
        assert_eq!(current.get("book#ch-1").unwrap().last_position_sec, 42.0);
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_writes_notify_watchers_and_bus() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let mut fx = Fixture::new().await;
        fx.store = fx.store.with_event_bus(bus);
        let (book, chapter) = ids();
        let mut rx = fx.store.subscribe();

        fx.store
            .save_progress(&book, &chapter, 3.0, None, CompletionUpdate::Keep)
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Progress(ProgressEvent::Updated { position_secs, .. }) if position_secs == 3.0
        ));
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();
        fx.store
            .save_progress(&book, &chapter, 9.5, Some(20.0), CompletionUpdate::Keep)
            .await
            .unwrap();

        let reopened = ListeningProgressStore::open(
            fx.fs.clone(),
            Arc::new(ManualClock::at_unix(99)),
            &fx.root.join("data"),
        )
        .await
        .unwrap();
        let record = reopened.get(&book, &chapter).await.unwrap();
        assert_eq!(record.last_position_sec, 9.5);
        assert_eq!(record.updated_at.timestamp(), 10);
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_export_import_roundtrip_replaces_everything() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();
        fx.store
            .save_progress(&book, &chapter, 1.0, None, CompletionUpdate::Keep)
            .await
            .unwrap();
        fx.store
            .save_progress(&book, &ChapterId::from("ch-2"), 2.0, None, CompletionUpdate::Keep)
            .await
            .unwrap();

        let mut exported = fx.store.export_all().await;
        assert_eq!(exported.len(), 2);
        exported.retain(|r| r.chapter_id.as_str() == "ch-2");

        assert_eq!(fx.store.import_all(exported).await.unwrap(), 1);
        assert!(fx.store.get(&book, &chapter).await.is_none());
        assert_eq!(fx.store.records_for_book(&book).await.len(), 1);
        fx.cleanup().await;
    }

    #[tokio::test]
    async fn test_clear() {
        let fx = Fixture::new().await;
        let (book, chapter) = ids();
        fx.store
            .save_progress(&book, &chapter, 1.0, None, CompletionUpdate::Keep)
            .await
            .unwrap();

        assert!(fx.store.clear(&book, &chapter).await.unwrap());
        assert!(!fx.store.clear(&book, &chapter).await.unwrap());

        fx.store
            .save_progress(&book, &chapter, 1.0, None, CompletionUpdate::Keep)
            .await
            .unwrap();
        fx.store.clear_all().await.unwrap();
        assert!(fx.store.export_all().await.is_empty());
        fx.cleanup().await;
    }
}
