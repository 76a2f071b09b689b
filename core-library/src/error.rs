use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Failed to write {path}: {message}")]
    FileWriteFailed { path: String, message: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, LibraryError>;
