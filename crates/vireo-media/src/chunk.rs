use std::{fmt, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;
use web_time::Instant;

use crate::{ChunkParser, ChunkState, Frame, MediaError, MediaResult};

/// One time slice of one stream.
///
/// Identity and timing are fixed at manifest ingestion. Everything else lives
/// behind an internal lock: the transport completes downloads from its own
/// thread while the source worker parses and plays the chunk.
pub struct Chunk {
    stream_id: usize,
    chunk_id: usize,
    start: Duration,
    duration: Duration,
    inner: Mutex<ChunkInner>,
}

#[derive(Default)]
struct ChunkInner {
    state: ChunkState,
    bitrate: u64,
    /// Download session (seek instance) of the last request.
    epoch: u64,
    data: Option<Bytes>,
    length: u64,
    download_started: Option<Instant>,
    download_completed: Option<Instant>,
    missed: u32,
    parser: Option<Box<dyn ChunkParser>>,
}

impl Chunk {
    pub fn new(stream_id: usize, chunk_id: usize, start: Duration, duration: Duration) -> Self {
        Self {
            stream_id,
            chunk_id,
            start,
            duration,
            inner: Mutex::new(ChunkInner::default()),
        }
    }

    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    pub fn chunk_id(&self) -> usize {
        self.chunk_id
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn state(&self) -> ChunkState {
        self.inner.lock().state
    }

    /// Bitrate assigned to the last download request.
    pub fn bitrate(&self) -> u64 {
        self.inner.lock().bitrate
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Payload length in bytes (0 until loaded).
    pub fn length(&self) -> u64 {
        self.inner.lock().length
    }

    pub fn data(&self) -> Option<Bytes> {
        self.inner.lock().data.clone()
    }

    /// Number of sample requests that found this chunk unavailable.
    pub fn missed(&self) -> u32 {
        self.inner.lock().missed
    }

    /// Wall-clock time the transport spent downloading the payload.
    pub fn download_duration(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.download_started, inner.download_completed) {
            (Some(started), Some(completed)) => Some(completed.saturating_duration_since(started)),
            _ => None,
        }
    }

    /// Arm the chunk for a new download request.
    pub fn begin_download(&self, bitrate: u64, epoch: u64) {
        let mut inner = self.inner.lock();
        inner.state = ChunkState::Pending;
        inner.bitrate = bitrate;
        inner.epoch = epoch;
        inner.data = None;
        inner.length = 0;
        inner.download_started = None;
        inner.download_completed = None;
        inner.parser = None;
    }

    /// Store a finished download.
    ///
    /// Returns `false` (and leaves the chunk untouched) when the request belongs
    /// to another epoch or the chunk is no longer waiting for data.
    pub fn complete_download(
        &self,
        epoch: u64,
        data: Bytes,
        started: Instant,
        completed: Instant,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state != ChunkState::Pending {
            trace!(
                stream = self.stream_id,
                chunk = self.chunk_id,
                epoch,
                current_epoch = inner.epoch,
                state = ?inner.state,
                "chunk: rejecting stale download"
            );
            return false;
        }
        inner.length = data.len() as u64;
        inner.data = Some(data);
        inner.download_started = Some(started);
        inner.download_completed = Some(completed);
        inner.state = ChunkState::Loaded;
        true
    }

    /// Record a failed download. Same epoch rules as [`Chunk::complete_download`].
    pub fn fail_download(&self, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state != ChunkState::Pending {
            return false;
        }
        inner.state = ChunkState::Error;
        inner.download_completed = Some(Instant::now());
        true
    }

    pub fn mark_error(&self) {
        let mut inner = self.inner.lock();
        inner.state = ChunkState::Error;
        inner.parser = None;
    }

    /// Parse the chunk header and keep the parser for frame iteration.
    ///
    /// A header error moves the chunk to `Error`.
    pub fn parse_with(&self, mut parser: Box<dyn ChunkParser>) -> MediaResult<()> {
        let mut inner = self.inner.lock();
        let data = match (&inner.data, inner.state) {
            (Some(data), ChunkState::Loaded) => data.clone(),
            _ => {
                return Err(MediaError::NotLoaded {
                    stream: self.stream_id,
                    chunk: self.chunk_id,
                });
            }
        };
        match parser.parse_header(&data) {
            Ok(()) => {
                inner.parser = Some(parser);
                inner.state = ChunkState::Parsed;
                Ok(())
            }
            Err(e) => {
                inner.state = ChunkState::Error;
                Err(e)
            }
        }
    }

    /// Next frame and its payload slice. `Ok(None)` means the chunk is exhausted.
    pub fn next_frame(&self) -> MediaResult<Option<(Frame, Bytes)>> {
        let mut inner = self.inner.lock();
        let not_loaded = MediaError::NotLoaded {
            stream: self.stream_id,
            chunk: self.chunk_id,
        };
        if inner.state != ChunkState::Parsed {
            return Err(not_loaded);
        }
        let ChunkInner { parser, data, .. } = &mut *inner;
        let (Some(parser), Some(data)) = (parser.as_mut(), data.as_ref()) else {
            return Err(not_loaded);
        };
        let Some(frame) = parser.next_frame()? else {
            return Ok(None);
        };
        let end = frame
            .offset
            .checked_add(frame.size)
            .filter(|end| *end <= data.len())
            .ok_or(MediaError::FrameOutOfBounds {
                offset: frame.offset,
                size: frame.size,
                len: data.len(),
            })?;
        let payload = data.slice(frame.offset..end);
        Ok(Some((frame, payload)))
    }

    /// Restart frame iteration: a parsed chunk goes back to `Loaded`.
    pub fn rewind(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ChunkState::Parsed {
            inner.parser = None;
            inner.state = ChunkState::Loaded;
        }
    }

    /// Drop payload and parser; the chunk becomes `Pending` again.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.state = ChunkState::Pending;
        inner.data = None;
        inner.length = 0;
        inner.parser = None;
        inner.download_started = None;
        inner.download_completed = None;
    }

    /// Release the chunk and assign a fresh bitrate (seek or quality replacement).
    pub fn rearm(&self, bitrate: u64) {
        self.release();
        let mut inner = self.inner.lock();
        inner.bitrate = bitrate;
        inner.missed = 0;
    }

    /// Count one unsuccessful sample request, returning the new total.
    pub fn record_miss(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.missed = inner.missed.saturating_add(1);
        inner.missed
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Chunk")
            .field("stream_id", &self.stream_id)
            .field("chunk_id", &self.chunk_id)
            .field("start", &self.start)
            .field("duration", &self.duration)
            .field("state", &inner.state)
            .field("bitrate", &inner.bitrate)
            .field("epoch", &inner.epoch)
            .field("length", &inner.length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HalvesParser {
        fail: bool,
        emitted: usize,
        len: usize,
    }

    impl ChunkParser for HalvesParser {
        fn parse_header(&mut self, data: &Bytes) -> MediaResult<()> {
            if self.fail {
                return Err(MediaError::Parse("bad header".into()));
            }
            self.len = data.len();
            Ok(())
        }

        fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
            if self.emitted == 2 {
                return Ok(None);
            }
            let half = self.len / 2;
            let frame = Frame {
                timestamp: Duration::from_millis(500 * self.emitted as u64),
                offset: half * self.emitted,
                size: half,
                drm: None,
            };
            self.emitted += 1;
            Ok(Some(frame))
        }
    }

    fn parser(fail: bool) -> Box<dyn ChunkParser> {
        Box::new(HalvesParser {
            fail,
            emitted: 0,
            len: 0,
        })
    }

    fn loaded_chunk() -> Chunk {
        let chunk = Chunk::new(0, 3, Duration::from_secs(6), Duration::from_secs(2));
        chunk.begin_download(300_000, 1);
        let now = Instant::now();
        assert!(chunk.complete_download(
            1,
            Bytes::from_static(b"abcdefgh"),
            now,
            now + Duration::from_millis(250)
        ));
        chunk
    }

    #[test]
    fn lifecycle_pending_loaded_parsed() {
        let chunk = loaded_chunk();
        assert_eq!(chunk.state(), ChunkState::Loaded);
        assert_eq!(chunk.length(), 8);
        assert_eq!(chunk.download_duration(), Some(Duration::from_millis(250)));
        assert_eq!(chunk.end(), Duration::from_secs(8));

        chunk.parse_with(parser(false)).unwrap();
        assert_eq!(chunk.state(), ChunkState::Parsed);

        let (frame, payload) = chunk.next_frame().unwrap().unwrap();
        assert_eq!(frame.timestamp, Duration::ZERO);
        assert_eq!(&payload[..], b"abcd");
        let (_, payload) = chunk.next_frame().unwrap().unwrap();
        assert_eq!(&payload[..], b"efgh");
        assert!(chunk.next_frame().unwrap().is_none());
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let chunk = Chunk::new(0, 0, Duration::ZERO, Duration::from_secs(2));
        chunk.begin_download(300_000, 2);
        let now = Instant::now();
        assert!(!chunk.complete_download(1, Bytes::from_static(b"x"), now, now));
        assert_eq!(chunk.state(), ChunkState::Pending);
        assert!(!chunk.fail_download(1));
        assert!(chunk.fail_download(2));
        assert_eq!(chunk.state(), ChunkState::Error);
    }

    #[test]
    fn header_error_moves_to_error_state() {
        let chunk = loaded_chunk();
        assert!(chunk.parse_with(parser(true)).is_err());
        assert_eq!(chunk.state(), ChunkState::Error);
    }

    #[test]
    fn parse_requires_loaded_payload() {
        let chunk = Chunk::new(1, 0, Duration::ZERO, Duration::from_secs(2));
        let err = chunk.parse_with(parser(false)).unwrap_err();
        assert!(matches!(err, MediaError::NotLoaded { stream: 1, chunk: 0 }));
    }

    #[test]
    fn rewind_restarts_frame_iteration() {
        let chunk = loaded_chunk();
        chunk.parse_with(parser(false)).unwrap();
        chunk.next_frame().unwrap();
        chunk.rewind();
        assert_eq!(chunk.state(), ChunkState::Loaded);
        chunk.parse_with(parser(false)).unwrap();
        let (frame, _) = chunk.next_frame().unwrap().unwrap();
        assert_eq!(frame.offset, 0);
    }

    #[test]
    fn rearm_resets_payload_and_misses() {
        let chunk = loaded_chunk();
        assert_eq!(chunk.record_miss(), 1);
        assert_eq!(chunk.record_miss(), 2);
        chunk.rearm(1_500_000);
        assert_eq!(chunk.state(), ChunkState::Pending);
        assert_eq!(chunk.bitrate(), 1_500_000);
        assert_eq!(chunk.missed(), 0);
        assert!(chunk.data().is_none());
    }
}
