use std::{fmt, time::Duration};

use bytes::Bytes;

/// Kind of media carried by a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Text,
}

impl MediaKind {
    pub fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        })
    }
}

/// Lifecycle of a chunk.
///
/// `Pending -> Loaded -> Parsed`, with `Error` reachable from any state.
/// A chunk returns to `Pending` when it is re-armed (seek, quality replacement).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkState {
    #[default]
    Pending,
    Loaded,
    Parsed,
    Error,
}

impl ChunkState {
    /// Payload bytes are present (`Loaded` or `Parsed`).
    pub fn is_downloaded(self) -> bool {
        matches!(self, Self::Loaded | Self::Parsed)
    }
}

/// One frame inside a parsed chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Presentation time relative to the chunk start.
    pub timestamp: Duration,
    /// Byte offset into the chunk payload.
    pub offset: usize,
    /// Frame size in bytes.
    pub size: usize,
    /// Opaque DRM sample data, if the format carries any.
    pub drm: Option<Bytes>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ChunkState::Pending, false)]
    #[case(ChunkState::Loaded, true)]
    #[case(ChunkState::Parsed, true)]
    #[case(ChunkState::Error, false)]
    fn downloaded_states(#[case] state: ChunkState, #[case] expected: bool) {
        assert_eq!(state.is_downloaded(), expected);
    }

    #[test]
    fn kind_display_is_lowercase() {
        assert_eq!(MediaKind::Video.to_string(), "video");
        assert_eq!(MediaKind::Audio.to_string(), "audio");
        assert!(MediaKind::Video.is_video());
        assert!(!MediaKind::Text.is_video());
    }
}
