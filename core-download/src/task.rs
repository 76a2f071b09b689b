//! Per-chapter download state
//!
//! The board holds one [`DownloadTask`] per chapter that is queued, running,
//! finished or failed. A chapter without an entry is idle. Every change is
//! republished through a `watch` channel so observers always start from the
//! latest board.

use core_library::models::{chapter_key, BookId, ChapterId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadTaskState {
    Idle,
    Enqueued,
    Downloading { progress: f64 },
    Downloaded,
    Failed { reason: String },
}

impl DownloadTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadTaskState::Idle => "idle",
            DownloadTaskState::Enqueued => "enqueued",
            DownloadTaskState::Downloading { .. } => "downloading",
            DownloadTaskState::Downloaded => "downloaded",
            DownloadTaskState::Failed { .. } => "failed",
        }
    }

    /// Queued or running; a second download of the chapter must be refused.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DownloadTaskState::Enqueued | DownloadTaskState::Downloading { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub book_id: BookId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub state: DownloadTaskState,
}

pub type DownloadBoard = BTreeMap<String, DownloadTask>;

pub(crate) struct TaskBoard {
    tasks: Mutex<DownloadBoard>,
    tx: watch::Sender<Arc<DownloadBoard>>,
}

impl TaskBoard {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(DownloadBoard::new()));
        Self {
            tasks: Mutex::new(DownloadBoard::new()),
            tx,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<DownloadBoard>> {
        self.tx.subscribe()
    }

    pub(crate) fn snapshot(&self) -> Arc<DownloadBoard> {
        self.tx.borrow().clone()
    }

    pub(crate) fn state(&self, book_id: &BookId, chapter_id: &ChapterId) -> DownloadTaskState {
        self.tasks
            .lock()
            .get(&chapter_key(book_id, chapter_id))
            .map(|task| task.state.clone())
            .unwrap_or(DownloadTaskState::Idle)
    }

    /// Marks the chapter enqueued unless it is already queued or running.
    pub(crate) fn try_claim(&self, book_id: &BookId, chapter_id: &ChapterId, title: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let key = chapter_key(book_id, chapter_id);
        if tasks.get(&key).is_some_and(|task| task.state.is_active()) {
            return false;
        }
        tasks.insert(
            key,
            DownloadTask {
                book_id: book_id.clone(),
                chapter_id: chapter_id.clone(),
                title: title.to_string(),
                state: DownloadTaskState::Enqueued,
            },
        );
        self.publish(&tasks);
        true
    }

    pub(crate) fn set_state(&self, book_id: &BookId, chapter_id: &ChapterId, state: DownloadTaskState) {
        let mut tasks = self.tasks.lock();
        let key = chapter_key(book_id, chapter_id);
        if state == DownloadTaskState::Idle {
            tasks.remove(&key);
        } else if let Some(task) = tasks.get_mut(&key) {
            task.state = state;
        } else {
            return;
        }
        self.publish(&tasks);
    }

    pub(crate) fn reset(&self, book_id: &BookId, chapter_id: &ChapterId) {
        self.set_state(book_id, chapter_id, DownloadTaskState::Idle);
    }

    fn publish(&self, tasks: &DownloadBoard) {
        self.tx.send_replace(Arc::new(tasks.clone()));
    }
}

/// Puts an in-flight chapter back to idle if it is dropped without being
/// settled, which is what happens when its download future is cancelled.
pub(crate) struct InFlightGuard<'a> {
    board: &'a TaskBoard,
    book_id: BookId,
    chapter_id: ChapterId,
    settled: bool,
}

impl<'a> InFlightGuard<'a> {
    pub(crate) fn new(board: &'a TaskBoard, book_id: &BookId, chapter_id: &ChapterId) -> Self {
        Self {
            board,
            book_id: book_id.clone(),
            chapter_id: chapter_id.clone(),
            settled: false,
        }
    }

    pub(crate) fn settle(mut self, state: DownloadTaskState) {
        self.board.set_state(&self.book_id, &self.chapter_id, state);
        self.settled = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.board.reset(&self.book_id, &self.chapter_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (BookId, ChapterId) {
        (BookId::from("b1"), ChapterId::from("c1"))
    }

    #[test]
    fn test_claim_refuses_active_chapters() {
        let board = TaskBoard::new();
        let (book, chapter) = ids();

        assert!(board.try_claim(&book, &chapter, "One"));
        assert!(!board.try_claim(&book, &chapter, "One"));

        board.set_state(&book, &chapter, DownloadTaskState::Downloading { progress: 0.1 });
        assert!(!board.try_claim(&book, &chapter, "One"));

        board.set_state(&book, &chapter, DownloadTaskState::Failed { reason: "x".into() });
        assert!(board.try_claim(&book, &chapter, "One"));
    }

    #[test]
    fn test_idle_removes_entry() {
        let board = TaskBoard::new();
        let (book, chapter) = ids();
        let rx = board.subscribe();

        board.try_claim(&book, &chapter, "One");
        assert_eq!(rx.borrow().len(), 1);

        board.reset(&book, &chapter);
        assert!(rx.borrow().is_empty());
        assert_eq!(board.state(&book, &chapter), DownloadTaskState::Idle);
    }

    #[test]
    fn test_unsettled_guard_resets_to_idle() {
        let board = TaskBoard::new();
        let (book, chapter) = ids();
        board.try_claim(&book, &chapter, "One");

        {
            let _guard = InFlightGuard::new(&board, &book, &chapter);
            board.set_state(&book, &chapter, DownloadTaskState::Downloading { progress: 0.6 });
        }
        assert_eq!(board.state(&book, &chapter), DownloadTaskState::Idle);

        board.try_claim(&book, &chapter, "One");
        InFlightGuard::new(&board, &book, &chapter).settle(DownloadTaskState::Downloaded);
        assert_eq!(board.state(&book, &chapter), DownloadTaskState::Downloaded);
    }

    #[test]
    fn test_active_states() {
        assert!(DownloadTaskState::Enqueued.is_active());
        assert!(DownloadTaskState::Downloading { progress: 0.5 }.is_active());
        assert!(!DownloadTaskState::Downloaded.is_active());
        assert!(!DownloadTaskState::Idle.is_active());
        assert_eq!(DownloadTaskState::Downloading { progress: 0.5 }.as_str(), "downloading");
    }
}
