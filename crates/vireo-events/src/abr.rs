#![forbid(unsafe_code)]

use std::time::Duration;

/// Events emitted by the heuristics engine.
#[derive(Clone, Debug, PartialEq)]
pub enum AbrEvent {
    /// Stream entered the Buffering state.
    BufferingStarted { stream: usize },
    /// Stream reached the Steady state.
    BufferingDone { stream: usize },
    /// A chunk download completed in the current session.
    ChunkDownloaded {
        stream: usize,
        chunk: usize,
        bitrate: u64,
        bytes: u64,
        elapsed: Duration,
        /// Whether the sample was classified as a cache hit.
        cached: bool,
    },
    /// Bitrate chosen for new downloads changed.
    DownloadBitrateChanged {
        stream: usize,
        from: Option<u64>,
        to: u64,
    },
    /// Downloads paused ahead of an ad break.
    DownloadsPaused { ad_timestamp: Duration },
    /// Downloads resumed after an ad break.
    DownloadsResumed { ad_timestamp: Duration },
}
