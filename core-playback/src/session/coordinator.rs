//! # Playback Session Coordinator
//!
//! Drives the transport state machine for one chapter at a time:
//!
//! ```text
//! idle ──configure──> ready ──play──> playing <──pause/play──> paused
//!                                        │
//!                                   end of media
//!                                        v
//!                                    finished ──play──> playing
//! ```
//!
//! While playing, a sampling task reads the engine position at
//! [`SessionConfig::sampling_interval`], updates the subtitle index and
//! publishes a [`PlaybackSnapshot`]. Progress is written through the
//! [`ListeningProgressStore`]: rate-limited from the tick, forced on pause,
//! seek and finish.
//!
//! Transport commands are expected to be issued one at a time by a single
//! presenter. The sampling and re-sampling tasks only hold a weak reference
//! to the coordinator and stop once it is dropped.

use bridge_traits::playback::PlaybackEngine;
use core_library::models::{BookId, ChapterId};
use core_library::progress::{CompletionUpdate, ListeningProgressStore};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::session::config::SessionConfig;
use crate::subtitles::{initial_resume_position, SubtitleContext, SubtitleMode, SubtitleTrack};

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Ready,
    Playing,
    Paused,
    Finished,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Finished => "finished",
        }
    }
}

/// Live view of the session. Recomputed on every tick, never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub book_id: Option<BookId>,
    pub chapter_id: Option<ChapterId>,
    pub state: PlaybackState,
    pub current_time: f64,
    /// `0.0` while unknown.
    pub total_duration: f64,
    /// `current_time / total_duration`, `0.0` while the duration is unknown.
    pub progress: f64,
    pub subtitle_mode: SubtitleMode,
    pub subtitle_index: Option<usize>,
}

// ============================================================================
// Session State
// ============================================================================

#[derive(Default)]
struct Session {
    chapter: Option<(BookId, ChapterId)>,
    state: PlaybackState,
    position: f64,
    duration: f64,
    subtitles: Option<Arc<SubtitleTrack>>,
    mode: SubtitleMode,
    subtitle_index: Option<usize>,
    pending_resume: Option<f64>,
    sampler: Option<CancellationToken>,
    last_persisted_at: Option<Instant>,
    /// Bumped on configure, seek and stop; stale re-samples compare against it.
    generation: u64,
}

impl Session {
    fn clamp(&self, position: f64) -> f64 {
        let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        if self.duration > 0.0 {
            position.min(self.duration)
        } else {
            position
        }
    }

    fn sync_subtitles(&mut self) {
        self.subtitle_index = self
            .subtitles
            .as_ref()
            .and_then(|track| track.index(self.position, self.mode));
    }

    fn stop_sampler(&mut self) {
        if let Some(token) = self.sampler.take() {
            token.cancel();
        }
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        let progress = if self.duration > 0.0 {
            (self.position / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        PlaybackSnapshot {
            book_id: self.chapter.as_ref().map(|(book, _)| book.clone()),
            chapter_id: self.chapter.as_ref().map(|(_, chapter)| chapter.clone()),
            state: self.state,
            current_time: self.position,
            total_duration: self.duration,
            progress,
            subtitle_mode: self.mode,
            subtitle_index: self.subtitle_index,
        }
    }
}

struct Inner {
    engine: Arc<dyn PlaybackEngine>,
    progress: Arc<ListeningProgressStore>,
    config: SessionConfig,
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    event_bus: OnceLock<EventBus>,
}

impl Inner {
    fn publish(&self) {
        let snapshot = self.session.lock().snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = self.event_bus.get() {
            let _ = bus.emit(CoreEvent::Playback(event));
        }
    }

    fn emit_state(&self) {
        let (chapter, state) = {
            let session = self.session.lock();
            (session.chapter.clone(), session.state)
        };
        if let Some((book_id, chapter_id)) = chapter {
            self.emit(PlaybackEvent::StateChanged {
                book_id: book_id.to_string(),
                chapter_id: chapter_id.to_string(),
                state: state.as_str().to_string(),
            });
        }
    }

    /// Writes the current position. Failures are logged; playback goes on.
    async fn persist(&self, force: bool, completion: CompletionUpdate) {
        let target = {
            let mut session = self.session.lock();
            let Some((book_id, chapter_id)) = session.chapter.clone() else {
                return;
            };
            if !force {
                if let Some(at) = session.last_persisted_at {
                    if at.elapsed() < self.config.progress_save_interval {
                        return;
                    }
                }
            }
            session.last_persisted_at = Some(Instant::now());
            let duration = (session.duration > 0.0).then_some(session.duration);
            (book_id, chapter_id, session.position, duration)
        };

        let (book_id, chapter_id, position, duration) = target;
        if let Err(e) = self
            .progress
            .save_progress(&book_id, &chapter_id, position, duration, completion)
            .await
        {
            warn!(%book_id, %chapter_id, error = %e, "Failed to persist listening progress");
        }
    }

    async fn tick(&self) {
        let reported = self.engine.current_position();
        let step = self.config.sampling_interval.as_secs_f64();

        {
            let mut session = self.session.lock();
            if session.state != PlaybackState::Playing {
                return;
            }
            let next = match reported {
                Some(position) if position.is_finite() => position,
                // Engine missed a report; extrapolate.
                _ => session.position + step,
            };
            session.position = session.clamp(next);
            session.sync_subtitles();
        }

        self.publish();
        self.persist(false, CompletionUpdate::Keep).await;
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        progress: Arc<ListeningProgressStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate().map_err(|e| {
            PlaybackError::Internal(format!("Invalid session configuration: {}", e))
        })?;

        let (snapshot_tx, _) = watch::channel(PlaybackSnapshot::default());
        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                progress,
                config,
                session: Mutex::new(Session::default()),
                snapshot_tx,
                event_bus: OnceLock::new(),
            }),
        })
    }

    pub fn with_event_bus(self, event_bus: EventBus) -> Self {
        let _ = self.inner.event_bus.set(event_bus);
        self
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver that immediately holds the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    // ========================================================================
    // Session Setup
    // ========================================================================

    /// Loads a chapter into the engine and moves to `ready` at position 0.
    ///
    /// A saved position is applied later, once subtitles are attached.
    #[instrument(skip(self, audio_path), fields(book_id = %book_id, chapter_id = %chapter_id))]
    pub async fn configure_session(
        &self,
        book_id: BookId,
        chapter_id: ChapterId,
        audio_path: &Path,
        duration_hint: Option<f64>,
    ) -> Result<()> {
        let had_session = {
            let mut session = self.inner.session.lock();
            session.stop_sampler();
            matches!(session.state, PlaybackState::Playing | PlaybackState::Paused)
        };
        if had_session {
            self.inner.persist(true, CompletionUpdate::Keep).await;
        }

        let reported = match self.inner.engine.load(audio_path).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!(error = %e, "Engine failed to load chapter audio");
                {
                    let mut session = self.inner.session.lock();
                    let generation = session.generation + 1;
                    *session = Session {
                        generation,
                        ..Session::default()
                    };
                }
                self.inner.publish();
                self.inner.emit(PlaybackEvent::LoadFailed {
                    book_id: book_id.to_string(),
                    chapter_id: chapter_id.to_string(),
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let duration = reported
            .or(duration_hint)
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0);
        let saved = self
            .inner
            .progress
            .get(&book_id, &chapter_id)
            .await
            .map(|record| record.last_position_sec);

        {
            let mut session = self.inner.session.lock();
            let generation = session.generation + 1;
            let mode = session.mode;
            *session = Session {
                chapter: Some((book_id, chapter_id)),
                state: PlaybackState::Ready,
                duration,
                mode,
                pending_resume: saved,
                generation,
                ..Session::default()
            };
        }

        info!(duration, "Chapter ready");
        self.inner.publish();
        self.inner.emit_state();
        Ok(())
    }

    /// Attaches the alignment track and applies any pending resume position.
    /// Chapters without subtitles attach [`SubtitleTrack::empty`].
    pub async fn attach_subtitles(&self, track: SubtitleTrack) -> Result<()> {
        let (resume, duration) = {
            let mut session = self.inner.session.lock();
            if session.chapter.is_none() {
                return Err(PlaybackError::NoChapterLoaded);
            }
            session.subtitles = Some(Arc::new(track));
            session.sync_subtitles();
            let duration = (session.duration > 0.0).then_some(session.duration);
            (session.pending_resume.take(), duration)
        };

        if let Some(target) = initial_resume_position(resume, duration) {
            self.inner.engine.seek(target).await?;
            let mut session = self.inner.session.lock();
            if matches!(session.state, PlaybackState::Ready | PlaybackState::Paused) {
                session.position = session.clamp(target);
                session.sync_subtitles();
            }
            debug!(target, "Applied resume position");
        }

        self.inner.publish();
        Ok(())
    }

    pub fn set_subtitle_mode(&self, mode: SubtitleMode) {
        {
            let mut session = self.inner.session.lock();
            session.mode = mode;
            session.sync_subtitles();
        }
        self.inner.publish();
    }

    /// Window around the active subtitle item.
    pub fn subtitle_context(&self) -> Option<SubtitleContext> {
        let session = self.inner.session.lock();
        let track = session.subtitles.as_ref()?;
        let index = session.subtitle_index?;
        Some(track.context(index, session.mode))
    }

    /// Window around the item playing at `time` in the current mode.
    pub fn subtitle_context_at(&self, time: f64) -> Option<SubtitleContext> {
        let session = self.inner.session.lock();
        session.subtitles.as_ref()?.context_at(time, session.mode)
    }

    // ========================================================================
    // Transport
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        let replay_from = {
            let session = self.inner.session.lock();
            match session.state {
                PlaybackState::Idle => return Err(PlaybackError::NoChapterLoaded),
                PlaybackState::Playing => return Ok(()),
                _ => {}
            }
            let at_end = session.state == PlaybackState::Finished
                || (session.duration > 0.0
                    && session.duration - session.position <= self.inner.config.end_tolerance_secs);
            at_end.then(|| (session.duration - self.inner.config.replay_offset_secs).max(0.0))
        };

        if let Some(target) = replay_from {
            self.inner.engine.seek(target).await?;
        }
        self.inner.engine.play().await?;

        {
            let mut session = self.inner.session.lock();
            if let Some(target) = replay_from {
                session.position = target;
            }
            session.state = PlaybackState::Playing;
            session.last_persisted_at = Some(Instant::now());
            session.sync_subtitles();
        }

        self.start_sampler();
        self.inner.publish();
        self.inner.emit_state();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        {
            let mut session = self.inner.session.lock();
            if session.state != PlaybackState::Playing {
                return Ok(());
            }
            session.stop_sampler();
        }

        self.inner.engine.pause().await?;
        let reported = self.inner.engine.current_position();

        {
            let mut session = self.inner.session.lock();
            if let Some(position) = reported {
                session.position = session.clamp(position);
            }
            session.state = PlaybackState::Paused;
            session.sync_subtitles();
        }

        self.inner.publish();
        self.inner.emit_state();
        self.inner.persist(true, CompletionUpdate::Keep).await;
        Ok(())
    }

    /// Moves the playhead. Playback continues only when it was already
    /// running and `auto_resume` is set; a running session is paused
    /// otherwise.
    #[instrument(skip(self))]
    pub async fn seek(&self, time: f64, auto_resume: bool) -> Result<()> {
        let (target, was_playing) = {
            let session = self.inner.session.lock();
            if session.state == PlaybackState::Idle {
                return Err(PlaybackError::NoChapterLoaded);
            }
            (session.clamp(time), session.state == PlaybackState::Playing)
        };

        self.inner.engine.seek(target).await?;
        let keep_playing = was_playing && auto_resume;
        if was_playing && !keep_playing {
            self.inner.session.lock().stop_sampler();
            self.inner.engine.pause().await?;
        }

        let (generation, before_end, book_chapter) = {
            let mut session = self.inner.session.lock();
            session.position = target;
            let before_end = session.duration <= 0.0
                || session.duration - target > self.inner.config.end_tolerance_secs;
            if was_playing && !keep_playing {
                session.state = PlaybackState::Paused;
            } else if session.state == PlaybackState::Finished && before_end {
                session.state = PlaybackState::Paused;
            }
            session.generation += 1;
            session.sync_subtitles();
            (session.generation, before_end, session.chapter.clone())
        };

        self.inner.publish();
        if let Some((book_id, chapter_id)) = book_chapter {
            self.inner.emit(PlaybackEvent::Seeked {
                book_id: book_id.to_string(),
                chapter_id: chapter_id.to_string(),
                position_secs: target,
            });
        }

        let completion = if before_end {
            CompletionUpdate::NotCompleted
        } else {
            CompletionUpdate::Keep
        };
        self.inner.persist(true, completion).await;
        self.schedule_resample(generation);
        Ok(())
    }

    pub async fn skip(&self, delta_secs: f64) -> Result<()> {
        let current = self.inner.session.lock().position;
        self.seek(current + delta_secs, true).await
    }

    /// Called by the host when the engine reaches the end of the media.
    /// Repeated calls for the same finish are ignored.
    #[instrument(skip(self))]
    pub async fn handle_end_of_media(&self) -> Result<()> {
        let chapter = {
            let mut session = self.inner.session.lock();
            if matches!(session.state, PlaybackState::Idle | PlaybackState::Finished) {
                return Ok(());
            }
            session.stop_sampler();
            if session.duration <= 0.0 {
                session.duration = session.position;
            }
            session.position = session.duration;
            session.state = PlaybackState::Finished;
            session.sync_subtitles();
            session.chapter.clone()
        };

        self.inner.publish();
        self.inner.emit_state();
        self.inner.persist(true, CompletionUpdate::Completed).await;

        if let Some((book_id, chapter_id)) = chapter {
            info!(%book_id, %chapter_id, "Chapter finished");
            self.inner.emit(PlaybackEvent::Completed {
                book_id: book_id.to_string(),
                chapter_id: chapter_id.to_string(),
            });
        }
        Ok(())
    }

    /// Persists the current position and returns to `idle`.
    pub async fn stop(&self) -> Result<()> {
        let was_loaded = {
            let mut session = self.inner.session.lock();
            session.stop_sampler();
            session.chapter.is_some()
        };
        if !was_loaded {
            return Ok(());
        }

        self.inner.engine.pause().await?;
        self.inner.persist(true, CompletionUpdate::Keep).await;

        {
            let mut session = self.inner.session.lock();
            let generation = session.generation + 1;
            let mode = session.mode;
            *session = Session {
                generation,
                mode,
                ..Session::default()
            };
        }
        self.inner.publish();
        Ok(())
    }

    // ========================================================================
    // Background Tasks
    // ========================================================================

    fn start_sampler(&self) {
        let token = CancellationToken::new();
        {
            let mut session = self.inner.session.lock();
            session.stop_sampler();
            session.sampler = Some(token.clone());
        }

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sampling_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        if token.is_cancelled() {
                            break;
                        }
                        inner.tick().await;
                    }
                }
            }
        });
    }

    /// Engines report the new position with some delay after a seek.
    fn schedule_resample(&self, generation: u64) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = self.inner.config.seek_resample_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else { return };
            let Some(reported) = inner.engine.current_position() else {
                return;
            };
            {
                let mut session = inner.session.lock();
                if session.generation != generation
                    || matches!(session.state, PlaybackState::Idle | PlaybackState::Finished)
                {
                    return;
                }
                session.position = session.clamp(reported);
                session.sync_subtitles();
            }
            inner.publish();
        });
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.inner.session.lock().stop_sampler();
    }
}
