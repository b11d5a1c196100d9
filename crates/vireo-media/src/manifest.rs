#![forbid(unsafe_code)]

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;
use url::Url;

use crate::{
    AdInsertionPoint, AdInsertionPoints, Chunk, ChunkSequence, MediaError, MediaKind, MediaResult,
};

/// Parser output: the presentation before validation.
#[derive(Clone, Debug, Default)]
pub struct ManifestInfo {
    /// Declared presentation duration, if the format carries one.
    pub duration: Option<Duration>,
    pub streams: Vec<StreamDescriptor>,
    pub ad_points: Vec<AdInsertionPoint>,
}

#[derive(Clone, Debug)]
pub struct StreamDescriptor {
    pub kind: MediaKind,
    pub name: String,
    pub language: Option<String>,
    /// Chunk URL template, see [`crate::TemplateUrlGenerator`].
    pub url_template: String,
    /// Bitrate ladder in any order.
    pub bitrates: Vec<QualityLevel>,
    pub chunks: Vec<ChunkDescriptor>,
}

/// One rung of a bitrate ladder with its format attributes
/// (codec private data, resolution, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QualityLevel {
    pub bitrate: u64,
    pub attributes: BTreeMap<String, String>,
}

impl QualityLevel {
    pub fn new(bitrate: u64) -> Self {
        Self {
            bitrate,
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Chunk entry as listed by the manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Explicit chunk index. `None` means "position in the list".
    pub id: Option<usize>,
    pub duration: Option<Duration>,
}

impl ChunkDescriptor {
    pub fn new(duration: Duration) -> Self {
        Self {
            id: None,
            duration: Some(duration),
        }
    }
}

/// A validated presentation.
#[derive(Debug)]
pub struct Manifest {
    base_url: Url,
    duration: Duration,
    streams: Vec<StreamInfo>,
    ad_points: Arc<AdInsertionPoints>,
}

impl Manifest {
    /// Validate parser output and build the stream/chunk model.
    ///
    /// Chunk start times are the prefix sums of durations in chunk-id order.
    /// Only the final chunk of a stream may have zero duration.
    pub fn from_info(info: ManifestInfo, base_url: Url) -> MediaResult<Self> {
        if info.streams.is_empty() {
            return Err(MediaError::UnsupportedTopology(
                "manifest declares no streams".into(),
            ));
        }
        if !info
            .streams
            .iter()
            .any(|s| matches!(s.kind, MediaKind::Video | MediaKind::Audio))
        {
            return Err(MediaError::UnsupportedTopology(
                "manifest has neither video nor audio".into(),
            ));
        }

        let streams = info
            .streams
            .into_iter()
            .enumerate()
            .map(|(id, desc)| StreamInfo::build(id, desc))
            .collect::<MediaResult<Vec<_>>>()?;

        let duration = info.duration.unwrap_or_else(|| {
            streams
                .iter()
                .map(|s| s.chunks().total_duration())
                .max()
                .unwrap_or_default()
        });

        let ad_points = Arc::new(AdInsertionPoints::new());
        ad_points.extend(info.ad_points);

        debug!(
            streams = streams.len(),
            ?duration,
            ad_points = ad_points.len(),
            "manifest: ingested"
        );

        Ok(Self {
            base_url,
            duration,
            streams,
            ad_points,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn stream(&self, id: usize) -> Option<&StreamInfo> {
        self.streams.get(id)
    }

    pub fn streams_of(&self, kind: MediaKind) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    pub fn ad_points(&self) -> &Arc<AdInsertionPoints> {
        &self.ad_points
    }
}

/// One logical stream: its ladder and its chunks.
pub struct StreamInfo {
    id: usize,
    kind: MediaKind,
    name: String,
    language: Option<String>,
    url_template: String,
    bitrates: Vec<u64>,
    attributes: Vec<BTreeMap<String, String>>,
    chunk_count: usize,
    chunks: Mutex<ChunkSequence>,
}

impl StreamInfo {
    fn build(id: usize, desc: StreamDescriptor) -> MediaResult<Self> {
        let mut ladder = desc.bitrates;
        ladder.sort_by_key(|q| q.bitrate);
        ladder.dedup_by_key(|q| q.bitrate);
        if ladder.is_empty() {
            return Err(MediaError::Manifest(format!(
                "stream {id} has an empty bitrate ladder"
            )));
        }
        if desc.chunks.is_empty() {
            return Err(MediaError::Manifest(format!("stream {id} has no chunks")));
        }

        let mut ordered = Vec::with_capacity(desc.chunks.len());
        for (position, chunk) in desc.chunks.iter().enumerate() {
            let chunk_id = chunk.id.unwrap_or(position);
            let duration = chunk.duration.ok_or(MediaError::MissingDuration {
                stream: id,
                chunk: chunk_id,
            })?;
            ordered.push((chunk_id, duration));
        }
        ordered.sort_by_key(|(chunk_id, _)| *chunk_id);

        let last = ordered.len() - 1;
        let mut chunks = Vec::with_capacity(ordered.len());
        let mut start = Duration::ZERO;
        for (expected, &(chunk_id, duration)) in ordered.iter().enumerate() {
            if chunk_id < expected {
                return Err(MediaError::DuplicateChunk {
                    stream: id,
                    chunk: chunk_id,
                });
            }
            if chunk_id > expected {
                return Err(MediaError::MissingChunk {
                    stream: id,
                    chunk: expected,
                });
            }
            if duration.is_zero() && expected != last {
                return Err(MediaError::ZeroDuration {
                    stream: id,
                    chunk: chunk_id,
                });
            }
            chunks.push(Arc::new(Chunk::new(id, chunk_id, start, duration)));
            start += duration;
        }

        let (bitrates, attributes) = ladder.into_iter().map(|q| (q.bitrate, q.attributes)).unzip();

        Ok(Self {
            id,
            kind: desc.kind,
            name: desc.name,
            language: desc.language,
            url_template: desc.url_template,
            bitrates,
            attributes,
            chunk_count: chunks.len(),
            chunks: Mutex::new(ChunkSequence::new(chunks)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Ascending, unique bitrate ladder.
    pub fn bitrates(&self) -> &[u64] {
        &self.bitrates
    }

    pub fn lowest_bitrate(&self) -> u64 {
        self.bitrates[0]
    }

    pub fn highest_bitrate(&self) -> u64 {
        self.bitrates[self.bitrates.len() - 1]
    }

    /// Ladder index of `bitrate`.
    pub fn rung_of(&self, bitrate: u64) -> Option<usize> {
        self.bitrates.binary_search(&bitrate).ok()
    }

    /// Format attributes of the rung carrying `bitrate`.
    pub fn attributes(&self, bitrate: u64) -> Option<&BTreeMap<String, String>> {
        self.rung_of(bitrate).map(|rung| &self.attributes[rung])
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Lock the chunk sequence.
    pub fn chunks(&self) -> MutexGuard<'_, ChunkSequence> {
        self.chunks.lock()
    }

    pub fn chunk(&self, index: usize) -> Option<Arc<Chunk>> {
        self.chunks.lock().get(index).cloned()
    }
}

impl fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("language", &self.language)
            .field("bitrates", &self.bitrates)
            .field("chunk_count", &self.chunk_count)
            .finish_non_exhaustive()
    }
}
