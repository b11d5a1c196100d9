#![forbid(unsafe_code)]

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use url::Url;

use crate::{Chunk, Frame, ManifestInfo, MediaKind, MediaResult};

/// Turns manifest bytes into a [`ManifestInfo`].
pub trait ManifestParser: Send + Sync {
    fn parse(&self, data: &Bytes, base_url: &Url) -> MediaResult<ManifestInfo>;
}

/// Format-specific reader for one downloaded chunk.
pub trait ChunkParser: Send {
    /// Parse the chunk header. Called once, before any frame is read.
    fn parse_header(&mut self, data: &Bytes) -> MediaResult<()>;

    /// Next frame descriptor.
    ///
    /// `Ok(None)` means no more frames, `Err` is a parse error.
    fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Creates a fresh [`ChunkParser`] for each chunk.
pub trait ChunkParserFactory: Send + Sync {
    fn create(&self, kind: MediaKind) -> Box<dyn ChunkParser>;
}

/// Everything a URL generator may need to address one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRequestInfo {
    pub base_url: Url,
    pub template: String,
    pub stream_id: usize,
    pub chunk_id: usize,
    pub kind: MediaKind,
    pub bitrate: u64,
    pub start: Duration,
    pub duration: Duration,
}

/// Builds the request URL for a chunk.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait UrlGenerator: Send + Sync {
    fn chunk_url(&self, info: &ChunkRequestInfo) -> MediaResult<Url>;
}

/// A chunk download handed to the [`Transport`].
#[derive(Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub chunk: Arc<Chunk>,
    /// Session (seek instance) the request belongs to.
    pub epoch: u64,
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("url", &self.url.as_str())
            .field("stream", &self.chunk.stream_id())
            .field("chunk", &self.chunk.chunk_id())
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Invoked by the transport once a request has finished, failed or been
/// cancelled.
pub type CompletionHandler = Arc<dyn Fn(DownloadRequest) + Send + Sync>;

/// Byte-level chunk downloader.
///
/// On success the transport stores the payload with
/// [`Chunk::complete_download`], on failure it calls [`Chunk::fail_download`].
/// In every case, including cancellation, it then invokes the completion
/// handler exactly once. Completion may happen on any thread.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait Transport: Send + Sync {
    fn start(&self, request: DownloadRequest, on_complete: CompletionHandler);

    /// Cancel the download of one chunk. Safe on finished downloads.
    fn cancel(&self, chunk: &Arc<Chunk>);

    /// Cancel every download that belongs to `epoch`.
    fn cancel_all(&self, epoch: u64);
}
