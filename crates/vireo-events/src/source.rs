#![forbid(unsafe_code)]

use std::time::Duration;

/// Events emitted by the source controller.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    /// Manifest accepted and heuristics opened.
    Opened { streams: usize, duration: Duration },
    /// Bitrate of the samples delivered to the host changed.
    PlaybackBitrateChanged {
        stream: usize,
        from: Option<u64>,
        to: u64,
    },
    SeekCompleted { position: Duration },
    StreamSwitched { from: usize, to: usize },
    /// A chunk was given up after too many misses.
    ChunkSkipped { stream: usize, chunk: usize },
    EndOfStream { stream: usize },
    /// Fatal error; the controller is closed.
    Error { error: String },
    Closed,
}
