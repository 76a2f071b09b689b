//! # Event Bus System
//!
//! Typed, fire-and-forget notifications between the core components using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain (cache, progress, playback, download,
//!   library) wrapped in [`CoreEvent`]
//! - **EventBus**: central broadcast channel for publishing events
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! The bus does not replay past events. Components whose current value must be
//! visible to late subscribers (progress records, the playback snapshot, the
//! download board) expose a `tokio::sync::watch` channel in addition to
//! emitting here.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ProgressEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(CoreEvent::Progress(ProgressEvent::Imported { count: 3 })).ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Progress(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: all senders have been dropped (shutdown).
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Media cache store activity
    Cache(CacheEvent),
    /// Listening progress writes
    Progress(ProgressEvent),
    /// Playback session transitions
    Playback(PlaybackEvent),
    /// Bulk and single chapter downloads
    Download(DownloadEvent),
    /// Chapter list snapshots
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Progress(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::LoadFailed { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::BatchFailed { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::ItemFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Library(LibraryEvent::ServedStale { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::BatchFinished { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A cached file was served without downloading the body.
    Hit {
        url: String,
        /// `true` when the revalidation token matched, `false` for a TTL hit
        revalidated: bool,
    },
    /// A full body fetch replaced the cached file.
    Fetched { url: String, bytes: u64 },
    /// The whole media cache directory was wiped.
    Cleared { removed: u64 },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Hit { .. } => "Served from media cache",
            CacheEvent::Fetched { .. } => "Media downloaded into cache",
            CacheEvent::Cleared { .. } => "Media cache cleared",
        }
    }
}

// ============================================================================
// Progress Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ProgressEvent {
    Updated {
        book_id: String,
        chapter_id: String,
        position_secs: f64,
        duration_secs: Option<f64>,
        is_completed: bool,
    },
    Imported {
        count: usize,
    },
    Cleared {
        book_id: Option<String>,
        chapter_id: Option<String>,
    },
}

impl ProgressEvent {
    fn description(&self) -> &str {
        match self {
            ProgressEvent::Updated { .. } => "Listening progress updated",
            ProgressEvent::Imported { .. } => "Listening progress imported",
            ProgressEvent::Cleared { .. } => "Listening progress cleared",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    StateChanged {
        book_id: String,
        chapter_id: String,
        state: String,
    },
    Seeked {
        book_id: String,
        chapter_id: String,
        position_secs: f64,
    },
    /// End of media reached. Emitted once per finish transition.
    Completed {
        book_id: String,
        chapter_id: String,
    },
    LoadFailed {
        book_id: String,
        chapter_id: String,
        message: String,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::StateChanged { .. } => "Playback state changed",
            PlaybackEvent::Seeked { .. } => "Playback position moved",
            PlaybackEvent::Completed { .. } => "Chapter finished",
            PlaybackEvent::LoadFailed { .. } => "Playback load failed",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    BatchStarted {
        book_id: String,
        total: usize,
    },
    ItemProgress {
        book_id: String,
        chapter_id: String,
        fraction: f64,
    },
    ItemFinished {
        book_id: String,
        chapter_id: String,
    },
    ItemFailed {
        book_id: String,
        chapter_id: String,
        message: String,
    },
    BatchFinished {
        book_id: String,
        completed: usize,
    },
    /// User cancelled. Not an error; no alert is shown.
    BatchCancelled {
        book_id: String,
        completed: usize,
    },
    BatchFailed {
        book_id: String,
        completed: usize,
        message: String,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::BatchStarted { .. } => "Bulk download started",
            DownloadEvent::ItemProgress { .. } => "Chapter download in progress",
            DownloadEvent::ItemFinished { .. } => "Chapter downloaded",
            DownloadEvent::ItemFailed { .. } => "Chapter download failed",
            DownloadEvent::BatchFinished { .. } => "Bulk download finished",
            DownloadEvent::BatchCancelled { .. } => "Bulk download cancelled",
            DownloadEvent::BatchFailed { .. } => "Bulk download failed",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    ChapterListRefreshed { book_id: String, count: usize },
    /// Network unavailable; a previously cached list was served.
    ServedStale { book_id: String },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::ChapterListRefreshed { .. } => "Chapter list refreshed",
            LibraryEvent::ServedStale { .. } => "Serving cached chapter list offline",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscription. Only events emitted after this call are
    /// received.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper that skips events not matching an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let stream = EventStream::new(bus.subscribe())
///     .filter(|e| matches!(e, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that matches the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). Returns `None` when no
    /// matching event is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
