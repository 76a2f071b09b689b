use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Chapter {chapter_id} is not in the chapter list of book {book_id}")]
    ChapterNotFound { book_id: String, chapter_id: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),

    #[error("Download error: {0}")]
    Download(#[from] core_download::DownloadError),
}

impl CoreError {
    /// `false` for cooperative cancellation, which is never shown to the user.
    pub fn is_user_visible(&self) -> bool {
        match self {
            CoreError::Playback(e) => e.is_user_visible(),
            CoreError::Download(e) => e.is_user_visible(),
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
