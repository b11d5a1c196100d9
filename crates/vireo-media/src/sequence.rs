use std::{sync::Arc, time::Duration};

use tracing::trace;

use crate::Chunk;

/// Ordered chunks of one stream with a single read cursor.
///
/// The cursor ("current") is the chunk the consumer is reading frames from.
/// Buffer accounting only considers chunks at or after the cursor.
#[derive(Debug, Default)]
pub struct ChunkSequence {
    chunks: Vec<Arc<Chunk>>,
    current: usize,
}

impl ChunkSequence {
    pub fn new(chunks: Vec<Arc<Chunk>>) -> Self {
        Self { chunks, current: 0 }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Chunk>> {
        self.chunks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.iter()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Chunk under the cursor, `None` once the sequence is exhausted.
    pub fn current(&self) -> Option<&Arc<Chunk>> {
        self.chunks.get(self.current)
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.chunks.len()
    }

    /// Move past the cursor chunk, releasing its payload.
    pub fn advance(&mut self) -> Option<&Arc<Chunk>> {
        if let Some(played) = self.chunks.get(self.current) {
            played.release();
            self.current += 1;
        }
        self.current()
    }

    /// Index of the chunk containing `position`.
    ///
    /// Positions past the end map to the last chunk.
    pub fn index_at(&self, position: Duration) -> usize {
        let idx = self.chunks.partition_point(|c| c.end() <= position);
        idx.min(self.chunks.len().saturating_sub(1))
    }

    /// Reposition the cursor on the chunk containing `position`.
    ///
    /// Every chunk before it is released, as is every downloaded chunk after
    /// the first gap following it. The new current chunk restarts frame
    /// iteration from its first frame.
    pub fn discard_until(&mut self, position: Duration) -> usize {
        let target = self.index_at(position);
        for chunk in &self.chunks[..target] {
            chunk.release();
        }
        if let Some(chunk) = self.chunks.get(target) {
            chunk.rewind();
        }
        let contiguous = self
            .chunks
            .iter()
            .skip(target)
            .take_while(|c| c.state().is_downloaded())
            .count();
        let stale = self
            .chunks
            .iter()
            .skip(target + contiguous)
            .filter(|c| c.state().is_downloaded())
            .inspect(|c| c.release())
            .count();
        if stale > 0 {
            trace!(stale, "sequence: released chunks detached from cursor");
        }
        trace!(from = self.current, to = target, ?position, "sequence: discard_until");
        self.current = target;
        target
    }

    fn ahead(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.iter().skip(self.current)
    }

    /// Total duration of downloaded chunks at or after the cursor.
    pub fn buffered_time(&self) -> Duration {
        self.ahead()
            .filter(|c| c.state().is_downloaded())
            .map(|c| c.duration())
            .sum()
    }

    /// Total payload bytes of downloaded chunks at or after the cursor.
    pub fn buffered_bytes(&self) -> u64 {
        self.ahead()
            .filter(|c| c.state().is_downloaded())
            .map(|c| c.length())
            .sum()
    }

    /// End time of the contiguous downloaded run starting at the cursor.
    ///
    /// `None` when the cursor chunk itself is not downloaded.
    pub fn contiguous_buffered_end(&self) -> Option<Duration> {
        self.ahead()
            .take_while(|c| c.state().is_downloaded())
            .last()
            .map(|c| c.end())
    }

    pub fn total_duration(&self) -> Duration {
        self.chunks.last().map_or(Duration::ZERO, |c| c.end())
    }

    /// Re-arm the first downloaded chunk starting at least `offset` after the
    /// cursor chunk's start. Returns its index.
    pub fn prune_ahead(&mut self, offset: Duration) -> Option<usize> {
        let origin = self.current()?.start() + offset;
        let index = self
            .chunks
            .iter()
            .enumerate()
            .skip(self.current + 1)
            .find(|(_, c)| c.start() >= origin && c.state().is_downloaded())
            .map(|(i, _)| i)?;
        self.chunks[index].release();
        Some(index)
    }
}
