#![forbid(unsafe_code)]

use thiserror::Error;
use vireo_media::MediaError;

/// Source controller errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("source is not opened")]
    NotOpened,

    #[error("source is already opened")]
    AlreadyOpened,

    #[error("source is closed")]
    Closed,

    #[error("unknown stream {0}")]
    UnknownStream(usize),

    #[error("stream {0} is not active")]
    InactiveStream(usize),

    #[error("streams {from} and {to} cannot be switched")]
    IncompatibleStreams { from: usize, to: usize },

    #[error("stream {stream} skipped {skips} chunks in a row")]
    StreamSkipLimit { stream: usize, skips: u32 },

    #[error("failed to spawn source worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("source worker panicked: {0}")]
    Panicked(String),
}

impl SourceError {
    /// Whether the error ends the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Media(e) => e.is_manifest_error(),
            Self::StreamSkipLimit { .. } | Self::Panicked(_) => true,
            _ => false,
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_errors_are_fatal() {
        let err = SourceError::from(MediaError::DuplicateChunk { stream: 0, chunk: 3 });
        assert!(err.is_fatal());
        assert!(!SourceError::from(MediaError::Parse("bad".into())).is_fatal());
        assert!(!SourceError::InactiveStream(1).is_fatal());
        assert!(SourceError::StreamSkipLimit { stream: 0, skips: 4 }.is_fatal());
    }
}
