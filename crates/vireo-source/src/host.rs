use std::time::Duration;

use bytes::Bytes;
use vireo_abr::StreamDiagnostics;
use vireo_media::MediaKind;

use crate::{CommandKind, SourceError};

/// One frame handed to the media pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub stream: usize,
    pub chunk: usize,
    pub chunk_start: Duration,
    /// Frame time relative to `chunk_start`.
    pub timestamp: Duration,
    pub bitrate: u64,
    pub data: Bytes,
    pub drm: Option<Bytes>,
}

impl Sample {
    /// Presentation time of the frame.
    pub fn position(&self) -> Duration {
        self.chunk_start + self.timestamp
    }
}

/// Stream description returned by `Open`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub id: usize,
    pub kind: MediaKind,
    pub name: String,
    pub language: Option<String>,
    pub bitrates: Vec<u64>,
    pub active: bool,
}

/// Answer to a host request. Every request gets exactly one.
#[derive(Debug)]
pub enum SourceResponse {
    Opened {
        duration: Duration,
        streams: Vec<StreamSummary>,
    },
    Sample(Sample),
    EndOfStream {
        stream: usize,
    },
    SeekCompleted {
        position: Duration,
    },
    StreamSwitched {
        from: usize,
        to: usize,
    },
    Diagnostics(Vec<StreamDiagnostics>),
    BitrateRangeSet {
        stream: usize,
        next_bitrate: u64,
    },
    /// `chunk` is the re-downloaded chunk, if one was buffered far enough ahead.
    MediaReplaced {
        stream: usize,
        chunk: Option<usize>,
    },
    Closed,
    Rejected {
        command: CommandKind,
        error: SourceError,
    },
}

/// Media pipeline fed by the source controller.
///
/// Called from the worker thread.
pub trait MediaHost: Send + Sync {
    fn deliver(&self, response: SourceResponse);

    /// The session failed and is closed.
    fn report_error(&self, error: &str);
}
