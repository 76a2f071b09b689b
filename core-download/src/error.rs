use core_library::error::LibraryError;
use core_playback::error::PlaybackError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("A bulk download is already running for book {book_id}")]
    BatchInProgress { book_id: String },

    #[error("Chapter {chapter_id} is already queued or downloading")]
    ChapterBusy { chapter_id: String },

    #[error("Chapter {chapter_id} has no audio")]
    AudioUnavailable { chapter_id: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Media error: {0}")]
    Media(#[from] PlaybackError),
}

impl DownloadError {
    /// Cancellation is silent; everything else gets a message.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            DownloadError::Cancelled | DownloadError::Media(PlaybackError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
