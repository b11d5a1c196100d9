//! Deterministic manifest and chunk parsers.

use std::time::Duration;

use bytes::Bytes;
use url::Url;
use vireo_media::{
    ChunkParser, ChunkParserFactory, Frame, ManifestInfo, ManifestParser, MediaError, MediaKind,
    MediaResult,
};

/// Payload prefix that makes [`FixedFrameParser::parse_header`] fail.
pub const CORRUPT_MARKER: &[u8] = b"CORRUPT";

/// Splits a chunk payload into `frames` equal frames spaced `frame_duration`
/// apart.
#[derive(Clone, Debug)]
pub struct FixedFrameParser {
    frames: usize,
    frame_duration: Duration,
    len: usize,
    emitted: usize,
}

impl FixedFrameParser {
    pub fn new(frames: usize, frame_duration: Duration) -> Self {
        Self {
            frames: frames.max(1),
            frame_duration,
            len: 0,
            emitted: 0,
        }
    }
}

impl ChunkParser for FixedFrameParser {
    fn parse_header(&mut self, data: &Bytes) -> MediaResult<()> {
        if data.starts_with(CORRUPT_MARKER) {
            return Err(MediaError::Parse("corrupt chunk header".into()));
        }
        if data.len() < self.frames {
            return Err(MediaError::Parse(format!(
                "chunk of {} bytes cannot hold {} frames",
                data.len(),
                self.frames
            )));
        }
        self.len = data.len();
        self.emitted = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.emitted >= self.frames {
            return Ok(None);
        }
        let size = self.len / self.frames;
        let offset = size * self.emitted;
        let size = if self.emitted + 1 == self.frames {
            self.len - offset
        } else {
            size
        };
        let frame = Frame {
            timestamp: self.frame_duration * u32::try_from(self.emitted).unwrap(),
            offset,
            size,
            drm: None,
        };
        self.emitted += 1;
        Ok(Some(frame))
    }
}

/// Creates [`FixedFrameParser`]s.
#[derive(Clone, Copy, Debug)]
pub struct FixedFrameParserFactory {
    pub frames_per_chunk: usize,
    pub frame_duration: Duration,
}

impl FixedFrameParserFactory {
    /// Frames evenly covering a chunk of `chunk_duration`.
    pub fn covering(chunk_duration: Duration, frames_per_chunk: usize) -> Self {
        Self {
            frames_per_chunk,
            frame_duration: chunk_duration / u32::try_from(frames_per_chunk.max(1)).unwrap(),
        }
    }
}

impl ChunkParserFactory for FixedFrameParserFactory {
    fn create(&self, _kind: MediaKind) -> Box<dyn ChunkParser> {
        Box::new(FixedFrameParser::new(
            self.frames_per_chunk,
            self.frame_duration,
        ))
    }
}

/// Returns a fixed [`ManifestInfo`] (or a fixed error) regardless of input.
#[derive(Clone, Debug)]
pub struct StaticManifestParser {
    result: Result<ManifestInfo, String>,
}

impl StaticManifestParser {
    pub fn new(info: ManifestInfo) -> Self {
        Self { result: Ok(info) }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
        }
    }
}

impl ManifestParser for StaticManifestParser {
    fn parse(&self, _data: &Bytes, _base_url: &Url) -> MediaResult<ManifestInfo> {
        self.result.clone().map_err(MediaError::Manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_cover_payload() {
        let mut parser = FixedFrameParser::new(3, Duration::from_millis(500));
        parser.parse_header(&Bytes::from(vec![0u8; 10])).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = parser.next_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].offset + frames[2].size, 10);
        assert_eq!(frames[1].timestamp, Duration::from_millis(500));
    }

    #[test]
    fn corrupt_header_fails() {
        let mut parser = FixedFrameParser::new(1, Duration::from_secs(1));
        assert!(
            parser
                .parse_header(&Bytes::from_static(b"CORRUPT chunk"))
                .is_err()
        );
    }
}
