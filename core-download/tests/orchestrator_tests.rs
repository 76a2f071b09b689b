//! Bulk download behavior against a mocked catalog, a scripted media fetcher
//! and real index/progress files in a temp directory.

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::ManualClock;
use core_download::{
    BatchOutcome, BatchProgress, BulkDownloadOrchestrator, DownloadBoard, DownloadConfig, DownloadError,
    DownloadTaskState, MediaFetcher,
};
use core_library::catalog::CatalogApi;
use core_library::error::Result as LibraryResult;
use core_library::media_index::ChapterMediaIndex;
use core_library::models::{
    Book, BookId, ChapterDetail, ChapterId, ChapterMetrics, ChapterSnapshot, ChapterSummary,
};
use core_library::progress::{CompletionUpdate, ListeningProgressStore};
use core_playback::cache::{CachedAudio, CachedText};
use core_playback::error::{PlaybackError, Result as PlaybackResult};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use mockall::mock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

mock! {
    Catalog {}

    #[async_trait]
    impl CatalogApi for Catalog {
        async fn list_books(&self) -> LibraryResult<Vec<Book>>;
        async fn list_chapters(&self, book_id: &BookId) -> LibraryResult<Vec<ChapterSummary>>;
        async fn chapter_detail(&self, book_id: &BookId, chapter_id: &ChapterId)
            -> LibraryResult<ChapterDetail>;
    }
}

/// Writes small files into the media directory. URLs containing `hang_on`
/// never complete; URLs containing `fail_on` return HTTP 500. With a `gate`,
/// each audio fetch waits for one permit.
struct ScriptedMedia {
    dir: PathBuf,
    hang_on: Option<&'static str>,
    fail_on: Option<&'static str>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedMedia {
    async fn write(&self, url: &str) -> PlaybackResult<PathBuf> {
        if let Some(gate) = self.gate.as_ref().filter(|_| url.ends_with(".mp3")) {
            gate.acquire().await.unwrap().forget();
        }
        if self.hang_on.is_some_and(|marker| url.contains(marker)) {
            std::future::pending::<()>().await;
        }
        if self.fail_on.is_some_and(|marker| url.contains(marker)) {
            return Err(PlaybackError::HttpError(500));
        }
        let name = url.rsplit('/').next().unwrap_or("file");
        let path = self.dir.join(name);
        tokio::fs::create_dir_all(&self.dir).await.unwrap();
        tokio::fs::write(&path, b"media").await.unwrap();
        Ok(path)
    }
}

#[async_trait]
impl MediaFetcher for ScriptedMedia {
    async fn fetch_audio(&self, url: &str) -> PlaybackResult<CachedAudio> {
        let local_path = self.write(url).await?;
        Ok(CachedAudio {
            local_path,
            remote_url: url.to_string(),
            token: None,
            from_cache: false,
        })
    }

    async fn fetch_subtitles(&self, url: &str) -> PlaybackResult<CachedText> {
        let local_path = self.write(url).await?;
        Ok(CachedText {
            local_path,
            remote_url: url.to_string(),
            text: "1\n00:00:00,000 --> 00:00:01,000\nHi.\n".to_string(),
            from_cache: false,
        })
    }
}

fn detail(chapter_id: &ChapterId) -> ChapterDetail {
    ChapterDetail {
        id: chapter_id.clone(),
        title: format!("Chapter {}", chapter_id),
        chapter_number: None,
        audio_url: Some(format!("https://cdn.example.com/ch{}.mp3", chapter_id)),
        subtitles_url: Some(format!("https://cdn.example.com/ch{}.srt", chapter_id)),
        metrics: ChapterMetrics::default(),
    }
}

fn catalog() -> MockCatalog {
    let mut catalog = MockCatalog::new();
    catalog
        .expect_chapter_detail()
        .returning(|_, chapter_id| Ok(detail(chapter_id)));
    catalog
}

fn chapters(ids: &[&str]) -> Vec<ChapterSnapshot> {
    ids.iter()
        .map(|id| ChapterSnapshot {
            chapter_id: ChapterId::from(*id),
            title: format!("Chapter {}", id),
            chapter_number: None,
            audio_available: true,
            subtitles_available: true,
            metrics: ChapterMetrics::default(),
        })
        .collect()
}

struct Fixture {
    root: PathBuf,
    fs: Arc<TokioFileSystem>,
    index: Arc<ChapterMediaIndex>,
    progress: Arc<ListeningProgressStore>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    async fn new() -> Self {
        let root = std::env::temp_dir().join(format!("bulk-download-{}", Uuid::new_v4()));
        let fs = Arc::new(TokioFileSystem::with_directories(
            root.join("cache"),
            root.join("data"),
        ));
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let index = Arc::new(
            ChapterMediaIndex::open(fs.clone(), &root.join("data"))
                .await
                .unwrap(),
        );
        let progress = Arc::new(
            ListeningProgressStore::open(fs.clone(), clock.clone(), &root.join("data"))
                .await
                .unwrap(),
        );
        Self {
            root,
            fs,
            index,
            progress,
            clock,
        }
    }

    fn media(&self) -> ScriptedMedia {
        ScriptedMedia {
            dir: self.root.join("cache").join("media"),
            hang_on: None,
            fail_on: None,
            gate: None,
        }
    }

    fn orchestrator(&self, catalog: MockCatalog, media: ScriptedMedia) -> BulkDownloadOrchestrator {
        BulkDownloadOrchestrator::new(
            Arc::new(catalog),
            Arc::new(media),
            self.index.clone(),
            self.progress.clone(),
            self.clock.clone(),
            DownloadConfig::default(),
        )
    }

    async fn cleanup(self) {
        let _ = self.fs.delete_dir_all(&self.root).await;
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<Arc<DownloadBoard>>,
    predicate: impl Fn(&DownloadBoard) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let board = rx.borrow_and_update();
                if predicate(&board) {
                    return;
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("board never reached the expected state");
}

async fn wait_for_batch(
    rx: &mut watch::Receiver<Option<BatchProgress>>,
    predicate: impl Fn(Option<&BatchProgress>) -> bool,
) -> Option<BatchProgress> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let progress = rx.borrow_and_update();
                if predicate(progress.as_ref()) {
                    return progress.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("batch progress never reached the expected state")
}

fn state(orchestrator: &BulkDownloadOrchestrator, chapter: &str) -> DownloadTaskState {
    orchestrator.task_state(&BookId::from("book"), &ChapterId::from(chapter))
}

#[tokio::test]
async fn test_batch_downloads_all_eligible_chapters() {
    let fixture = Fixture::new().await;
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let orchestrator = fixture
        .orchestrator(catalog(), fixture.media())
        .with_event_bus(bus);
    let book = BookId::from("book");

    let outcome = orchestrator
        .run_batch(&book, &chapters(&["1", "2"]))
        .await
        .unwrap();

    assert_eq!(outcome, BatchOutcome::Finished { completed: 2 });
    assert_eq!(state(&orchestrator, "1"), DownloadTaskState::Downloaded);
    assert_eq!(state(&orchestrator, "2"), DownloadTaskState::Downloaded);
    assert!(!orchestrator.is_batch_running());

    let downloaded = fixture.index.downloaded_chapters(&book).await.unwrap();
    assert_eq!(downloaded.len(), 2);
    let entry = fixture.index.get(&book, &ChapterId::from("1")).await.unwrap();
    assert!(entry.subtitles_path.is_some());
    assert_eq!(entry.audio_url, "https://cdn.example.com/ch1.mp3");

    let mut fractions = Vec::new();
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        match event {
            CoreEvent::Download(DownloadEvent::ItemProgress {
                chapter_id, fraction, ..
            }) if chapter_id == "1" => fractions.push(fraction),
            CoreEvent::Download(DownloadEvent::BatchFinished { completed, .. }) => {
                finished = Some(completed)
            }
            _ => {}
        }
    }
    assert_eq!(fractions, vec![0.05, 0.1, 0.6, 0.8, 1.0]);
    assert_eq!(finished, Some(2));

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_batch_skips_downloaded_and_finished_chapters() {
    let fixture = Fixture::new().await;
    let book = BookId::from("book");
    fixture
        .progress
        .save_progress(&book, &ChapterId::from("2"), 60.0, Some(60.0), CompletionUpdate::Completed)
        .await
        .unwrap();

    let mut catalog = MockCatalog::new();
    catalog
        .expect_chapter_detail()
        .withf(|_, chapter_id| chapter_id.as_str() != "2")
        .times(2)
        .returning(|_, chapter_id| Ok(detail(chapter_id)));
    let orchestrator = fixture.orchestrator(catalog, fixture.media());

    let first = orchestrator.run_batch(&book, &chapters(&["1", "2"])).await.unwrap();
    assert_eq!(first, BatchOutcome::Finished { completed: 1 });

    // Chapter 1 is on disk now, so only chapter 3 is new.
    let second = orchestrator
        .run_batch(&book, &chapters(&["1", "2", "3"]))
        .await
        .unwrap();
    assert_eq!(second, BatchOutcome::Finished { completed: 1 });

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_cancel_keeps_finished_chapters_and_idles_the_rest() {
    let fixture = Fixture::new().await;
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let media = ScriptedMedia {
        hang_on: Some("ch2.mp3"),
        ..fixture.media()
    };
    let orchestrator = Arc::new(fixture.orchestrator(catalog(), media).with_event_bus(bus));
    let mut board = orchestrator.subscribe_tasks();

    let handle = orchestrator.start_batch(BookId::from("book"), chapters(&["1", "2", "3"]));
    wait_for(&mut board, |tasks| {
        tasks.values().any(|task| {
            task.chapter_id.as_str() == "2"
                && task.state == DownloadTaskState::Downloading { progress: 0.1 }
        })
    })
    .await;

    assert!(orchestrator.cancel_batch());
    let outcome = handle.await.unwrap().unwrap();

    assert_eq!(outcome, BatchOutcome::Cancelled { completed: 1 });
    assert!(outcome.alert_message().is_none());
    assert_eq!(state(&orchestrator, "1"), DownloadTaskState::Downloaded);
    assert_eq!(state(&orchestrator, "2"), DownloadTaskState::Idle);
    assert_eq!(state(&orchestrator, "3"), DownloadTaskState::Idle);
    assert!(!orchestrator.cancel_batch());

    let mut saw_failure = false;
    let mut saw_cancel = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CoreEvent::Download(DownloadEvent::BatchFailed { .. })
            | CoreEvent::Download(DownloadEvent::ItemFailed { .. }) => saw_failure = true,
            CoreEvent::Download(DownloadEvent::BatchCancelled { completed, .. }) => {
                assert_eq!(completed, 1);
                saw_cancel = true;
            }
            _ => {}
        }
    }
    assert!(saw_cancel);
    assert!(!saw_failure);

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_failure_stops_the_queue() {
    let fixture = Fixture::new().await;
    let mut catalog = MockCatalog::new();
    catalog
        .expect_chapter_detail()
        .withf(|_, chapter_id| chapter_id.as_str() != "3")
        .times(2)
        .returning(|_, chapter_id| Ok(detail(chapter_id)));
    let media = ScriptedMedia {
        fail_on: Some("ch2.mp3"),
        ..fixture.media()
    };
    let orchestrator = fixture.orchestrator(catalog, media);

    let outcome = orchestrator
        .run_batch(&BookId::from("book"), &chapters(&["1", "2", "3"]))
        .await
        .unwrap();

    match &outcome {
        BatchOutcome::Failed { completed, message } => {
            assert_eq!(*completed, 1);
            assert!(message.contains("500"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(outcome.alert_message().is_some());
    assert_eq!(state(&orchestrator, "1"), DownloadTaskState::Downloaded);
    assert!(matches!(state(&orchestrator, "2"), DownloadTaskState::Failed { .. }));
    assert_eq!(state(&orchestrator, "3"), DownloadTaskState::Idle);

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_single_download_refuses_busy_chapter() {
    let fixture = Fixture::new().await;
    let media = ScriptedMedia {
        hang_on: Some("ch1.mp3"),
        ..fixture.media()
    };
    let orchestrator = Arc::new(fixture.orchestrator(catalog(), media));
    let mut board = orchestrator.subscribe_tasks();
    let book = BookId::from("book");
    let list = chapters(&["1", "2"]);

    let handle = orchestrator.start_batch(book.clone(), list.clone());
    wait_for(&mut board, |tasks| {
        tasks
            .values()
            .any(|task| task.chapter_id.as_str() == "1" && task.state.is_active())
    })
    .await;

    let busy = orchestrator.download_chapter(&book, &list[0]).await;
    assert!(matches!(busy, Err(DownloadError::ChapterBusy { .. })));

    let second = orchestrator.run_batch(&book, &list).await;
    assert!(matches!(second, Err(DownloadError::BatchInProgress { .. })));

    orchestrator.cancel_batch();
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, BatchOutcome::Cancelled { completed: 0 });

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_single_download_records_entry() {
    let fixture = Fixture::new().await;
    let orchestrator = fixture.orchestrator(catalog(), fixture.media());
    let book = BookId::from("book");
    let list = chapters(&["7"]);

    orchestrator.download_chapter(&book, &list[0]).await.unwrap();

    assert_eq!(state(&orchestrator, "7"), DownloadTaskState::Downloaded);
    let playable = fixture
        .index
        .get_playable(&book, &ChapterId::from("7"))
        .await
        .unwrap();
    assert!(playable.is_some());
    assert!(!orchestrator.cancel_chapter(&book, &ChapterId::from("7")));

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_batch_progress_reports_title_counts_and_eta() {
    let fixture = Fixture::new().await;
    let gate = Arc::new(Semaphore::new(0));
    let media = ScriptedMedia {
        gate: Some(gate.clone()),
        ..fixture.media()
    };
    let orchestrator = Arc::new(fixture.orchestrator(catalog(), media));
    let book = BookId::from("book");
    let list = chapters(&["0", "1", "2"]);

    gate.add_permits(1);
    orchestrator.download_chapter(&book, &list[0]).await.unwrap();

    let mut batch = orchestrator.subscribe_batch();
    assert!(batch.borrow().is_none());
    let handle = orchestrator.start_batch(book.clone(), list);

    let first = wait_for_batch(&mut batch, |p| {
        p.is_some_and(|p| p.current_title.as_deref() == Some("Chapter 1"))
    })
    .await
    .unwrap();
    assert_eq!(first.total, 2);
    assert_eq!(first.completed, 0);
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.eta_secs, None);
    assert!(orchestrator.is_batch_running());

    gate.add_permits(1);
    let second = wait_for_batch(&mut batch, |p| {
        p.is_some_and(|p| p.current_title.as_deref() == Some("Chapter 2"))
    })
    .await
    .unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(second.downloaded, 2);
    assert!(second.eta_secs.is_some());
    assert_eq!(second.fraction(), 0.5);

    gate.add_permits(1);
    let ended = wait_for_batch(&mut batch, |p| p.is_none()).await;
    assert!(ended.is_none());

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, BatchOutcome::Finished { completed: 2 });
    assert!(orchestrator.subscribe_batch().borrow().is_none());

    fixture.cleanup().await;
}

#[tokio::test]
async fn test_cancel_single_download_in_flight() {
    let fixture = Fixture::new().await;
    let media = ScriptedMedia {
        hang_on: Some("ch5.mp3"),
        ..fixture.media()
    };
    let orchestrator = Arc::new(fixture.orchestrator(catalog(), media));
    let mut board = orchestrator.subscribe_tasks();
    let book = BookId::from("book");
    let chapter = chapters(&["5"]).remove(0);

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let book = book.clone();
        tokio::spawn(async move { orchestrator.download_chapter(&book, &chapter).await })
    };
    wait_for(&mut board, |tasks| {
        tasks.values().any(|task| {
            task.chapter_id.as_str() == "5"
                && task.state == DownloadTaskState::Downloading { progress: 0.1 }
        })
    })
    .await;

    assert!(orchestrator.cancel_chapter(&book, &ChapterId::from("5")));
    let result = handle.await.unwrap();

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert_eq!(state(&orchestrator, "5"), DownloadTaskState::Idle);
    assert!(!orchestrator.cancel_chapter(&book, &ChapterId::from("5")));
    assert!(fixture
        .index
        .get(&book, &ChapterId::from("5"))
        .await
        .is_none());

    fixture.cleanup().await;
}
