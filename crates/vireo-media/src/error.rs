#![forbid(unsafe_code)]

use thiserror::Error;

/// Manifest, chunk and URL errors.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Duplicate chunk {chunk} in stream {stream}")]
    DuplicateChunk { stream: usize, chunk: usize },

    #[error("Stream {stream} is missing chunk {chunk}")]
    MissingChunk { stream: usize, chunk: usize },

    #[error("Chunk {chunk} of stream {stream} has no duration")]
    MissingDuration { stream: usize, chunk: usize },

    #[error("Chunk {chunk} of stream {stream} has zero duration but is not the last chunk")]
    ZeroDuration { stream: usize, chunk: usize },

    #[error("Unsupported stream topology: {0}")]
    UnsupportedTopology(String),

    #[error("Chunk {chunk} of stream {stream} is not loaded")]
    NotLoaded { stream: usize, chunk: usize },

    #[error("Chunk parse error: {0}")]
    Parse(String),

    #[error("Frame at offset {offset} with size {size} exceeds chunk length {len}")]
    FrameOutOfBounds { offset: usize, size: usize, len: usize },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl MediaError {
    /// Whether the error describes a malformed manifest (fatal for the session).
    pub fn is_manifest_error(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_)
                | Self::DuplicateChunk { .. }
                | Self::MissingChunk { .. }
                | Self::MissingDuration { .. }
                | Self::ZeroDuration { .. }
                | Self::UnsupportedTopology(_)
        )
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
