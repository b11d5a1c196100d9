//! Scheduling half of the heuristics engine.
//!
//! A pass walks the streams in manifest order and decides which of them may
//! issue a chunk request now. Planning happens under the engine lock; the
//! transport is only called once the lock is released.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tracing::trace;
use vireo_events::{AbrEvent, BitrateTracker, EventBus};
use vireo_media::{Chunk, ChunkRequestInfo, ChunkSequence, Manifest};

use crate::{HeuristicsOptions, NetworkMediaInfo};

/// Download bookkeeping of one stream.
#[derive(Clone, Debug, Default)]
pub struct StreamSchedule {
    pub(crate) active: bool,
    /// Next chunk index to request.
    pub(crate) next_chunk: usize,
    pub(crate) in_flight: Vec<Arc<Chunk>>,
    /// Chunks whose cancellation has not been acknowledged by the transport.
    pub(crate) cancelled: HashSet<usize>,
    /// Chunk to re-download ahead of the regular order.
    pub(crate) forced: Option<usize>,
    pub(crate) skip_tracking: bool,
}

impl StreamSchedule {
    pub fn new(active: bool) -> Self {
        Self {
            active,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn next_chunk(&self) -> usize {
        self.next_chunk
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Concurrent download cap, raised by one while a forced re-download or a
    /// cancellation is outstanding.
    pub fn cap(&self, options: &HeuristicsOptions) -> usize {
        let raised = !self.cancelled.is_empty() || self.forced.is_some();
        options.max_concurrent_downloads.max(1) + usize::from(raised)
    }

    /// Media time of requests still in flight.
    pub fn committed(&self) -> Duration {
        self.in_flight.iter().map(|c| c.duration()).sum()
    }

    pub(crate) fn finish(&mut self, chunk_id: usize) -> bool {
        match self.in_flight.iter().position(|c| c.chunk_id() == chunk_id) {
            Some(pos) => {
                self.in_flight.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Forget everything in flight and restart at `next_chunk`.
    pub(crate) fn reset(&mut self, next_chunk: usize) {
        self.next_chunk = next_chunk;
        self.in_flight.clear();
        self.cancelled.clear();
        self.forced = None;
        self.skip_tracking = false;
    }
}

/// Per-stream state held by the engine.
#[derive(Clone, Debug)]
pub(crate) struct StreamSlot {
    pub info: NetworkMediaInfo,
    pub schedule: StreamSchedule,
}

/// A request decided under the lock, issued after it is released.
#[derive(Debug)]
pub(crate) struct PlannedDownload {
    pub chunk: Arc<Chunk>,
    pub request: ChunkRequestInfo,
    pub epoch: u64,
}

pub(crate) struct PlanContext<'a> {
    pub manifest: &'a Manifest,
    pub options: &'a HeuristicsOptions,
    pub epoch: u64,
    /// Buffered-time ceiling for this pass (`max_buffer`, or the minimal
    /// paused buffer during an ad pause).
    pub buffer_cap: Duration,
    pub bus: &'a EventBus,
}

/// Whether a stream with `buffered + committed` media time may take another
/// chunk of `next` duration without exceeding `cap`.
///
/// An empty stream may always take one chunk.
fn has_room(buffered: Duration, committed: Duration, next: Duration, cap: Duration) -> bool {
    let total = buffered + committed;
    total.is_zero() || total + next <= cap
}

/// Step the request cursor over chunks that are already downloaded or behind
/// the read cursor.
fn settle_next_chunk(schedule: &mut StreamSchedule, seq: &ChunkSequence) {
    let mut next = schedule.next_chunk.max(seq.current_index());
    while seq.get(next).is_some_and(|c| c.state().is_downloaded()) {
        next += 1;
    }
    schedule.next_chunk = next;
}

/// Download edge of the first active video stream and whether video itself is
/// held back by the buffer cap.
fn video_edge(ctx: &PlanContext<'_>, slots: &mut [StreamSlot]) -> Option<(Duration, bool)> {
    let slot = slots
        .iter_mut()
        .find(|s| s.schedule.active && s.info.kind().is_video())?;
    let stream = ctx.manifest.stream(slot.info.stream())?;
    let seq = stream.chunks();
    settle_next_chunk(&mut slot.schedule, &seq);
    let next = seq.get(slot.schedule.next_chunk)?;
    let capped = !has_room(
        seq.buffered_time(),
        slot.schedule.committed(),
        next.duration(),
        ctx.buffer_cap,
    );
    Some((next.end() + next.duration(), capped))
}

/// Decide the downloads to start now.
pub(crate) fn plan_downloads(
    ctx: &PlanContext<'_>,
    slots: &mut [StreamSlot],
    download_bitrates: &mut BitrateTracker,
) -> Vec<PlannedDownload> {
    let video = video_edge(ctx, slots);
    let video_capped = video.is_some_and(|(_, capped)| capped);
    for slot in slots.iter_mut() {
        slot.schedule.skip_tracking = video_capped && !slot.info.kind().is_video();
    }

    let mut planned = Vec::new();
    for slot in slots.iter_mut().filter(|s| s.schedule.active) {
        let Some(stream) = ctx.manifest.stream(slot.info.stream()) else {
            continue;
        };
        let seq = stream.chunks();
        let mut issue = |slot: &mut StreamSlot, chunk: &Arc<Chunk>| {
            let bitrate = slot.info.next_bitrate();
            chunk.begin_download(bitrate, ctx.epoch);
            slot.schedule.in_flight.push(Arc::clone(chunk));
            if let Some(change) = download_bitrates.update(stream.id(), bitrate) {
                ctx.bus.publish(AbrEvent::DownloadBitrateChanged {
                    stream: change.stream,
                    from: change.from,
                    to: change.to,
                });
            }
            trace!(
                stream = stream.id(),
                chunk = chunk.chunk_id(),
                bitrate,
                epoch = ctx.epoch,
                "scheduler: request"
            );
            planned.push(PlannedDownload {
                chunk: Arc::clone(chunk),
                request: ChunkRequestInfo {
                    base_url: ctx.manifest.base_url().clone(),
                    template: stream.url_template().to_owned(),
                    stream_id: stream.id(),
                    chunk_id: chunk.chunk_id(),
                    kind: stream.kind(),
                    bitrate,
                    start: chunk.start(),
                    duration: chunk.duration(),
                },
                epoch: ctx.epoch,
            });
        };

        if let Some(forced) = slot.schedule.forced {
            if slot.schedule.in_flight.len() < slot.schedule.cap(ctx.options) {
                slot.schedule.forced = None;
                if forced >= seq.current_index() {
                    if let Some(chunk) = seq.get(forced) {
                        issue(slot, chunk);
                    }
                }
            }
        }

        loop {
            if slot.schedule.in_flight.len() >= slot.schedule.cap(ctx.options) {
                break;
            }
            settle_next_chunk(&mut slot.schedule, &seq);
            let Some(chunk) = seq.get(slot.schedule.next_chunk) else {
                break;
            };
            if !has_room(
                seq.buffered_time(),
                slot.schedule.committed(),
                chunk.duration(),
                ctx.buffer_cap,
            ) {
                break;
            }
            if !slot.info.kind().is_video() && !slot.schedule.skip_tracking {
                if let Some((edge, _)) = video {
                    if chunk.start() > edge {
                        trace!(
                            stream = stream.id(),
                            chunk = chunk.chunk_id(),
                            ?edge,
                            "scheduler: tracking video"
                        );
                        break;
                    }
                }
            }
            let chunk = Arc::clone(chunk);
            issue(slot, &chunk);
            slot.schedule.next_chunk += 1;
        }
    }
    planned
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0, 40, 30, true)]
    #[case(26, 0, 2, 30, true)]
    #[case(28, 0, 2, 30, true)]
    #[case(29, 0, 2, 30, false)]
    #[case(26, 2, 2, 30, true)]
    #[case(28, 2, 2, 30, false)]
    fn room_check(
        #[case] buffered: u64,
        #[case] committed: u64,
        #[case] next: u64,
        #[case] cap: u64,
        #[case] expected: bool,
    ) {
        let s = Duration::from_secs;
        assert_eq!(has_room(s(buffered), s(committed), s(next), s(cap)), expected);
    }

    #[test]
    fn cap_is_raised_while_cancellation_pending() {
        let options = HeuristicsOptions::default();
        let mut schedule = StreamSchedule::new(true);
        assert_eq!(schedule.cap(&options), 1);
        schedule.cancelled.insert(3);
        assert_eq!(schedule.cap(&options), 2);
        schedule.reset(5);
        assert_eq!(schedule.cap(&options), 1);
        assert_eq!(schedule.next_chunk(), 5);
    }
}
