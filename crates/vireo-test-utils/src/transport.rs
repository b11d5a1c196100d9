//! In-memory [`Transport`] that records requests and completes them on demand.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;
use vireo_media::{Chunk, CompletionHandler, DownloadRequest, Transport};
use web_time::Instant;

/// When a [`RecordingTransport`] completes requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Requests stay pending until the test completes them.
    Manual,
    /// Requests complete inside `start()` as if downloaded at this bandwidth.
    Instant { bandwidth_bps: u64 },
}

/// A request seen by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedRequest {
    pub stream: usize,
    pub chunk: usize,
    pub bitrate: u64,
    pub epoch: u64,
    pub url: Url,
}

struct Pending {
    request: DownloadRequest,
    on_complete: CompletionHandler,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Pending>,
    started: Vec<StartedRequest>,
    chunks: Vec<Arc<Chunk>>,
    cancelled: Vec<(usize, usize)>,
    cancelled_epochs: Vec<u64>,
}

pub struct RecordingTransport {
    mode: CompletionMode,
    state: Mutex<State>,
}

/// Payload size of a chunk encoded at `bitrate` (at least 64 bytes).
pub fn payload_len(bitrate: u64, duration: Duration) -> usize {
    let bytes = u128::from(bitrate) * duration.as_millis() / 8_000;
    usize::try_from(bytes).unwrap_or(usize::MAX).max(64)
}

impl RecordingTransport {
    pub fn new(mode: CompletionMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            state: Mutex::new(State::default()),
        })
    }

    pub fn manual() -> Arc<Self> {
        Self::new(CompletionMode::Manual)
    }

    pub fn instant(bandwidth_bps: u64) -> Arc<Self> {
        Self::new(CompletionMode::Instant { bandwidth_bps })
    }

    pub fn started(&self) -> Vec<StartedRequest> {
        self.state.lock().started.clone()
    }

    /// Chunk handle of the most recent request for `(stream, chunk)`.
    pub fn chunk(&self, stream: usize, chunk: usize) -> Option<Arc<Chunk>> {
        self.state
            .lock()
            .chunks
            .iter()
            .rev()
            .find(|c| c.stream_id() == stream && c.chunk_id() == chunk)
            .cloned()
    }

    /// `(stream, chunk)` of every pending request, oldest first.
    pub fn pending(&self) -> Vec<(usize, usize)> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|p| (p.request.chunk.stream_id(), p.request.chunk.chunk_id()))
            .collect()
    }

    pub fn pending_for(&self, stream: usize) -> usize {
        self.pending().iter().filter(|(s, _)| *s == stream).count()
    }

    pub fn cancelled(&self) -> Vec<(usize, usize)> {
        self.state.lock().cancelled.clone()
    }

    pub fn cancelled_epochs(&self) -> Vec<u64> {
        self.state.lock().cancelled_epochs.clone()
    }

    /// Complete the oldest pending request with a full-size payload.
    pub fn complete_next(&self, elapsed: Duration) -> bool {
        let Some(pending) = self.state.lock().pending.pop_front() else {
            return false;
        };
        let len = payload_len(pending.request.chunk.bitrate(), pending.request.chunk.duration());
        Self::deliver(pending, len, elapsed);
        true
    }

    /// Complete the pending request of `(stream, chunk)` with `bytes` of payload.
    pub fn complete_with(&self, stream: usize, chunk: usize, bytes: usize, elapsed: Duration) -> bool {
        let Some(pending) = self.take(stream, chunk) else {
            return false;
        };
        Self::deliver(pending, bytes, elapsed);
        true
    }

    /// Complete the pending request of `(stream, chunk)` with a full-size payload.
    pub fn complete_where(&self, stream: usize, chunk: usize, elapsed: Duration) -> bool {
        let Some(pending) = self.take(stream, chunk) else {
            return false;
        };
        let len = payload_len(pending.request.chunk.bitrate(), pending.request.chunk.duration());
        Self::deliver(pending, len, elapsed);
        true
    }

    /// Fail the oldest pending request.
    pub fn fail_next(&self) -> bool {
        let Some(pending) = self.state.lock().pending.pop_front() else {
            return false;
        };
        pending.request.chunk.fail_download(pending.request.epoch);
        (pending.on_complete)(pending.request);
        true
    }

    /// Complete pending requests in order until none are left or `limit` is hit.
    pub fn drain(&self, elapsed: Duration, limit: usize) -> usize {
        let mut done = 0;
        while done < limit && self.complete_next(elapsed) {
            done += 1;
        }
        done
    }

    fn take(&self, stream: usize, chunk: usize) -> Option<Pending> {
        let mut state = self.state.lock();
        let pos = state.pending.iter().position(|p| {
            p.request.chunk.stream_id() == stream && p.request.chunk.chunk_id() == chunk
        })?;
        state.pending.remove(pos)
    }

    fn deliver(pending: Pending, len: usize, elapsed: Duration) {
        let started = Instant::now();
        pending.request.chunk.complete_download(
            pending.request.epoch,
            Bytes::from(vec![0u8; len]),
            started,
            started + elapsed,
        );
        (pending.on_complete)(pending.request);
    }

    fn remove_where(&self, matches: impl Fn(&DownloadRequest) -> bool) -> Vec<Pending> {
        let mut state = self.state.lock();
        let (removed, kept): (VecDeque<Pending>, VecDeque<Pending>) = state
            .pending
            .drain(..)
            .partition(|p| matches(&p.request));
        state.pending = kept;
        removed.into()
    }
}

impl Transport for RecordingTransport {
    fn start(&self, request: DownloadRequest, on_complete: CompletionHandler) {
        {
            let mut state = self.state.lock();
            state.started.push(StartedRequest {
                stream: request.chunk.stream_id(),
                chunk: request.chunk.chunk_id(),
                bitrate: request.chunk.bitrate(),
                epoch: request.epoch,
                url: request.url.clone(),
            });
            state.chunks.push(Arc::clone(&request.chunk));
        }
        let pending = Pending {
            request,
            on_complete,
        };
        match self.mode {
            CompletionMode::Manual => self.state.lock().pending.push_back(pending),
            CompletionMode::Instant { bandwidth_bps } => {
                let len = payload_len(pending.request.chunk.bitrate(), pending.request.chunk.duration());
                let bits = u64::try_from(len).unwrap_or(u64::MAX).saturating_mul(8);
                let elapsed = Duration::from_micros(bits.saturating_mul(1_000_000) / bandwidth_bps.max(1));
                Self::deliver(pending, len, elapsed);
            }
        }
    }

    fn cancel(&self, chunk: &Arc<Chunk>) {
        self.state
            .lock()
            .cancelled
            .push((chunk.stream_id(), chunk.chunk_id()));
        let removed = self.remove_where(|r| {
            r.chunk.stream_id() == chunk.stream_id() && r.chunk.chunk_id() == chunk.chunk_id()
        });
        for pending in removed {
            (pending.on_complete)(pending.request);
        }
    }

    fn cancel_all(&self, epoch: u64) {
        self.state.lock().cancelled_epochs.push(epoch);
        for pending in self.remove_where(|r| r.epoch == epoch) {
            (pending.on_complete)(pending.request);
        }
    }
}
