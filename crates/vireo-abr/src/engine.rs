use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use vireo_events::{AbrEvent, BitrateTracker, EventBus};
use vireo_media::{
    Chunk, ChunkState, CompletionHandler, DownloadRequest, Manifest, MediaKind, Transport,
    UrlGenerator,
};

use crate::{
    AdPauseCoordinator, AdTransition, DownloadSample, DownloadState, HeuristicsOptions,
    NetworkMediaInfo, StreamSchedule, StreamSlot,
    scheduler::{PlanContext, PlannedDownload, plan_downloads},
};

/// Per-stream snapshot for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamDiagnostics {
    pub stream: usize,
    pub kind: MediaKind,
    pub active: bool,
    pub state: DownloadState,
    pub next_bitrate: u64,
    pub previous_bitrate: Option<u64>,
    pub locked_bitrate: Option<u64>,
    pub bandwidth_bps: f64,
    pub fullness_secs: f64,
    pub buffered_time: Duration,
    pub buffered_bytes: u64,
    pub current_chunk: usize,
    pub next_chunk: usize,
    pub in_flight: usize,
}

/// Bitrate selection and download scheduling.
///
/// The source controller drives it from its worker thread; the transport
/// reports completions from its own thread.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait Heuristics: Send + Sync {
    /// Attach a manifest. `active` lists the streams to download.
    /// Does not schedule.
    fn open(&self, manifest: Arc<Manifest>, active: &[usize]);

    /// Run one scheduling pass.
    fn schedule(&self);

    /// Transport completion (success, failure or cancellation).
    fn on_download_completed(&self, request: DownloadRequest);

    /// A sample at `position` was handed to the host.
    fn on_sample_delivered(&self, stream: usize, position: Duration);

    /// Stop scheduling and cancel every download of the current session.
    fn begin_seek(&self);

    /// Restart scheduling from the streams' new read cursors.
    fn end_seek(&self, position: Duration);

    /// Re-download `chunk` of `stream` ahead of the regular order.
    fn force_chunk(&self, stream: usize, chunk: usize);

    /// Cancel the download of a chunk the consumer gave up on.
    fn cancel_chunk(&self, chunk: &Arc<Chunk>);

    fn set_stream_active(&self, stream: usize, active: bool);

    /// Restrict the stream's ladder to `[min, max]`. Returns the new next bitrate.
    fn set_bitrate_range(&self, stream: usize, min: u64, max: u64) -> Option<u64>;

    fn next_bitrate(&self, stream: usize) -> Option<u64>;

    /// Downloads are paused for an ad break.
    fn is_paused(&self) -> bool;

    /// Offset ahead of playback at which a buffered chunk should be replaced
    /// with a higher-quality one.
    fn replacement_candidate(&self, stream: usize) -> Option<Duration>;

    fn diagnostics(&self) -> Vec<StreamDiagnostics>;

    /// Cancel everything and refuse further scheduling.
    fn shutdown(&self);
}

struct EngineState {
    manifest: Option<Arc<Manifest>>,
    slots: Vec<StreamSlot>,
    epoch: u64,
    seeking: bool,
    shutdown: bool,
    ad_pause: AdPauseCoordinator,
    download_bitrates: BitrateTracker,
}

/// Canonical [`Heuristics`] implementation.
pub struct HeuristicsEngine {
    options: HeuristicsOptions,
    transport: Arc<dyn Transport>,
    url_generator: Arc<dyn UrlGenerator>,
    bus: EventBus,
    on_complete: CompletionHandler,
    state: Mutex<EngineState>,
}

impl HeuristicsEngine {
    pub fn new(
        options: HeuristicsOptions,
        transport: Arc<dyn Transport>,
        url_generator: Arc<dyn UrlGenerator>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let on_complete: CompletionHandler = Arc::new(move |request| {
                if let Some(engine) = weak.upgrade() {
                    engine.on_download_completed(request);
                }
            });
            let ad_pause = AdPauseCoordinator::new(options.ad_pause_before, options.ad_pause_after);
            Self {
                options,
                transport,
                url_generator,
                bus,
                on_complete,
                state: Mutex::new(EngineState {
                    manifest: None,
                    slots: Vec::new(),
                    epoch: 0,
                    seeking: false,
                    shutdown: false,
                    ad_pause,
                    download_bitrates: BitrateTracker::new(),
                }),
            }
        })
    }

    pub fn options(&self) -> &HeuristicsOptions {
        &self.options
    }

    /// Current download session.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn network_info(&self, stream: usize) -> Option<NetworkMediaInfo> {
        self.state.lock().slots.get(stream).map(|s| s.info.clone())
    }

    pub fn stream_schedule(&self, stream: usize) -> Option<StreamSchedule> {
        self.state.lock().slots.get(stream).map(|s| s.schedule.clone())
    }

    fn start_download(&self, plan: PlannedDownload) {
        let PlannedDownload {
            chunk,
            request,
            epoch,
        } = plan;
        match self.url_generator.chunk_url(&request) {
            Ok(url) => {
                self.transport.start(
                    DownloadRequest { url, chunk, epoch },
                    Arc::clone(&self.on_complete),
                );
            }
            Err(e) => {
                warn!(
                    stream = request.stream_id,
                    chunk = request.chunk_id,
                    error = %e,
                    "heuristics: cannot build chunk URL"
                );
                chunk.fail_download(epoch);
                self.on_download_completed(DownloadRequest {
                    url: request.base_url,
                    chunk,
                    epoch,
                });
            }
        }
    }

    fn publish_transition(&self, stream: usize, state: DownloadState) {
        let event = match state {
            DownloadState::Buffering => AbrEvent::BufferingStarted { stream },
            DownloadState::Steady => AbrEvent::BufferingDone { stream },
        };
        self.bus.publish(event);
    }

    fn publish_ad(&self, transition: AdTransition) {
        let event = match transition {
            AdTransition::Paused(point) => AbrEvent::DownloadsPaused {
                ad_timestamp: point.timestamp,
            },
            AdTransition::Resumed(point) => AbrEvent::DownloadsResumed {
                ad_timestamp: point.timestamp,
            },
        };
        self.bus.publish(event);
    }
}

/// Every active stream can play through `until` from what is buffered:
/// its cursor chunk is parsed and the contiguous buffer reaches `until`,
/// or it has no more content.
fn all_pausable(manifest: &Manifest, slots: &[StreamSlot], until: Duration) -> bool {
    slots.iter().filter(|s| s.schedule.active).all(|slot| {
        let Some(stream) = manifest.stream(slot.info.stream()) else {
            return true;
        };
        let seq = stream.chunks();
        if seq.is_finished() {
            return true;
        }
        let target = until.min(seq.total_duration());
        seq.current().is_some_and(|c| c.state() == ChunkState::Parsed)
            && seq.contiguous_buffered_end().is_some_and(|end| end >= target)
    })
}

impl Heuristics for HeuristicsEngine {
    fn open(&self, manifest: Arc<Manifest>, active: &[usize]) {
        let mut state = self.state.lock();
        state.slots = manifest
            .streams()
            .iter()
            .map(|stream| StreamSlot {
                info: NetworkMediaInfo::new(stream, &self.options),
                schedule: StreamSchedule::new(active.contains(&stream.id())),
            })
            .collect();
        debug!(
            streams = state.slots.len(),
            ?active,
            epoch = state.epoch,
            "heuristics: opened"
        );
        state.manifest = Some(manifest);
    }

    fn schedule(&self) {
        let planned = {
            let mut state = self.state.lock();
            if state.seeking || state.shutdown {
                trace!(
                    seeking = state.seeking,
                    shutdown = state.shutdown,
                    "heuristics: scheduling suppressed"
                );
                return;
            }
            let Some(manifest) = state.manifest.clone() else {
                return;
            };
            let buffer_cap = if state.ad_pause.is_paused() {
                self.options.min_paused_buffer
            } else {
                self.options.max_buffer
            };
            let EngineState {
                slots,
                epoch,
                download_bitrates,
                ..
            } = &mut *state;
            let ctx = PlanContext {
                manifest: &manifest,
                options: &self.options,
                epoch: *epoch,
                buffer_cap,
                bus: &self.bus,
            };
            plan_downloads(&ctx, slots, download_bitrates)
        };
        for plan in planned {
            self.start_download(plan);
        }
    }

    fn on_download_completed(&self, request: DownloadRequest) {
        let DownloadRequest { chunk, epoch, .. } = request;
        {
            let mut state = self.state.lock();
            if epoch != state.epoch || state.shutdown {
                trace!(
                    stream = chunk.stream_id(),
                    chunk = chunk.chunk_id(),
                    epoch,
                    current = state.epoch,
                    "heuristics: ignoring completion from stale session"
                );
                return;
            }
            let Some(manifest) = state.manifest.clone() else {
                return;
            };
            let stream_id = chunk.stream_id();
            let Some(slot) = state.slots.get_mut(stream_id) else {
                return;
            };
            let known = slot.schedule.finish(chunk.chunk_id());
            let cancelled = slot.schedule.cancelled.remove(&chunk.chunk_id());
            let chunk_state = chunk.state();

            if cancelled || !known {
                debug!(
                    stream = stream_id,
                    chunk = chunk.chunk_id(),
                    known,
                    "heuristics: cancellation acknowledged"
                );
            } else if chunk_state != ChunkState::Loaded {
                warn!(
                    stream = stream_id,
                    chunk = chunk.chunk_id(),
                    state = ?chunk_state,
                    "heuristics: download did not complete"
                );
            } else {
                let buffered = manifest
                    .stream(stream_id)
                    .map(|s| s.chunks().buffered_time())
                    .unwrap_or_default();
                let sample = DownloadSample {
                    bytes: chunk.length(),
                    elapsed: chunk.download_duration().unwrap_or_default(),
                    chunk_duration: chunk.duration(),
                    bitrate: chunk.bitrate(),
                    buffered,
                };
                let outcome = slot.info.process_chunk_download(&sample, &self.options);
                self.bus.publish(AbrEvent::ChunkDownloaded {
                    stream: stream_id,
                    chunk: chunk.chunk_id(),
                    bitrate: sample.bitrate,
                    bytes: sample.bytes,
                    elapsed: sample.elapsed,
                    cached: outcome.cached,
                });
                for entered in outcome.entered.into_iter().flatten() {
                    self.publish_transition(stream_id, entered);
                }
            }
        }
        self.schedule();
    }

    fn on_sample_delivered(&self, stream: usize, position: Duration) {
        let transition = {
            let mut state = self.state.lock();
            if state.shutdown || state.seeking {
                return;
            }
            let Some(manifest) = state.manifest.clone() else {
                return;
            };
            let is_video = state
                .slots
                .get(stream)
                .is_some_and(|s| s.info.kind().is_video());
            if is_video {
                let EngineState {
                    slots, ad_pause, ..
                } = &mut *state;
                ad_pause.on_video_sample(position, manifest.ad_points(), |until| {
                    all_pausable(&manifest, slots, until)
                })
            } else {
                None
            }
        };
        if let Some(transition) = transition {
            self.publish_ad(transition);
        }
        self.schedule();
    }

    fn begin_seek(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.seeking = true;
            let previous = state.epoch;
            state.epoch += 1;
            for slot in &mut state.slots {
                let next = slot.schedule.next_chunk;
                slot.schedule.reset(next);
            }
            debug!(previous, epoch = state.epoch, "heuristics: seek started");
            previous
        };
        self.transport.cancel_all(previous);
    }

    fn end_seek(&self, position: Duration) {
        let (transitions, ad) = {
            let mut state = self.state.lock();
            state.seeking = false;
            let mut transitions = Vec::new();
            if let Some(manifest) = state.manifest.clone() {
                for slot in &mut state.slots {
                    if slot.info.reset_for_seek() {
                        transitions.push(slot.info.stream());
                    }
                    let Some(stream) = manifest.stream(slot.info.stream()) else {
                        continue;
                    };
                    let current = stream.chunks().current_index();
                    slot.schedule.reset(current);
                    // The chunk under the new cursor is fetched first even when
                    // the buffer ahead of it is full.
                    if let Some(chunk) = stream.chunk(current).filter(|_| slot.schedule.active) {
                        chunk.rearm(slot.info.next_bitrate());
                        slot.schedule.forced = Some(current);
                        slot.schedule.next_chunk = current + 1;
                    }
                }
            }
            let ad = state.ad_pause.reset(position);
            debug!(?position, epoch = state.epoch, "heuristics: seek finished");
            (transitions, ad)
        };
        for stream in transitions {
            self.publish_transition(stream, DownloadState::Buffering);
        }
        if let Some(ad) = ad {
            self.publish_ad(ad);
        }
        self.schedule();
    }

    fn force_chunk(&self, stream: usize, chunk: usize) {
        {
            let mut state = self.state.lock();
            let Some(manifest) = state.manifest.clone() else {
                return;
            };
            let Some(slot) = state.slots.get_mut(stream) else {
                return;
            };
            let Some(target) = manifest.stream(stream).and_then(|s| s.chunk(chunk)) else {
                return;
            };
            target.rearm(slot.info.next_bitrate());
            slot.schedule.forced = Some(chunk);
            debug!(
                stream,
                chunk,
                bitrate = slot.info.next_bitrate(),
                "heuristics: forced re-download"
            );
        }
        self.schedule();
    }

    fn cancel_chunk(&self, chunk: &Arc<Chunk>) {
        {
            let mut state = self.state.lock();
            if let Some(slot) = state.slots.get_mut(chunk.stream_id()) {
                if slot
                    .schedule
                    .in_flight
                    .iter()
                    .any(|c| c.chunk_id() == chunk.chunk_id())
                {
                    slot.schedule.cancelled.insert(chunk.chunk_id());
                }
            }
        }
        debug!(
            stream = chunk.stream_id(),
            chunk = chunk.chunk_id(),
            "heuristics: cancelling chunk"
        );
        self.transport.cancel(chunk);
        self.schedule();
    }

    fn set_stream_active(&self, stream: usize, active: bool) {
        let cancel = {
            let mut state = self.state.lock();
            let manifest = state.manifest.clone();
            let EngineState {
                slots,
                download_bitrates,
                ..
            } = &mut *state;
            let Some(slot) = slots.get_mut(stream) else {
                return;
            };
            slot.schedule.active = active;
            if active {
                if let Some(info) = manifest.as_deref().and_then(|m| m.stream(stream)) {
                    let current = info.chunks().current_index();
                    slot.schedule.reset(current);
                }
                Vec::new()
            } else {
                slot.schedule.forced = None;
                download_bitrates.forget(stream);
                let in_flight = slot.schedule.in_flight.clone();
                slot.schedule
                    .cancelled
                    .extend(in_flight.iter().map(|c| c.chunk_id()));
                in_flight
            }
        };
        debug!(stream, active, cancelled = cancel.len(), "heuristics: stream activation");
        for chunk in &cancel {
            self.transport.cancel(chunk);
        }
        self.schedule();
    }

    fn set_bitrate_range(&self, stream: usize, min: u64, max: u64) -> Option<u64> {
        let mut state = self.state.lock();
        state
            .slots
            .get_mut(stream)
            .map(|slot| slot.info.set_bitrate_range(min, max))
    }

    fn next_bitrate(&self, stream: usize) -> Option<u64> {
        self.state
            .lock()
            .slots
            .get(stream)
            .map(|s| s.info.next_bitrate())
    }

    fn is_paused(&self) -> bool {
        self.state.lock().ad_pause.is_paused()
    }

    fn replacement_candidate(&self, stream: usize) -> Option<Duration> {
        if !self.options.chunk_replacement {
            return None;
        }
        let state = self.state.lock();
        if state.seeking || state.shutdown {
            return None;
        }
        let manifest = state.manifest.as_ref()?;
        let slot = state.slots.get(stream)?;
        if !slot.schedule.active
            || slot.info.state() != DownloadState::Steady
            || slot.schedule.forced.is_some()
            || slot.schedule.in_flight.len() >= slot.schedule.cap(&self.options)
        {
            return None;
        }
        let seq = manifest.stream(stream)?.chunks();
        let origin = seq.current()?.start() + self.options.replacement_offset;
        let candidate = seq
            .iter()
            .skip(seq.current_index() + 1)
            .find(|c| c.start() >= origin && c.state().is_downloaded())?;
        (candidate.bitrate() < slot.info.next_bitrate()).then_some(self.options.replacement_offset)
    }

    fn diagnostics(&self) -> Vec<StreamDiagnostics> {
        let state = self.state.lock();
        let Some(manifest) = state.manifest.as_ref() else {
            return Vec::new();
        };
        state
            .slots
            .iter()
            .map(|slot| {
                let (buffered_time, buffered_bytes, current_chunk) = manifest
                    .stream(slot.info.stream())
                    .map(|s| {
                        let seq = s.chunks();
                        (seq.buffered_time(), seq.buffered_bytes(), seq.current_index())
                    })
                    .unwrap_or_default();
                StreamDiagnostics {
                    stream: slot.info.stream(),
                    kind: slot.info.kind(),
                    active: slot.schedule.active,
                    state: slot.info.state(),
                    next_bitrate: slot.info.next_bitrate(),
                    previous_bitrate: slot.info.previous_bitrate(),
                    locked_bitrate: slot.info.locked_bitrate(),
                    bandwidth_bps: slot.info.bandwidth().kernel(),
                    fullness_secs: slot.info.fullness().kernel(),
                    buffered_time,
                    buffered_bytes,
                    current_chunk,
                    next_chunk: slot.schedule.next_chunk,
                    in_flight: slot.schedule.in_flight.len(),
                }
            })
            .collect()
    }

    fn shutdown(&self) {
        let previous = {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let previous = state.epoch;
            state.epoch += 1;
            for slot in &mut state.slots {
                slot.schedule.reset(0);
            }
            state.manifest = None;
            debug!(epoch = previous, "heuristics: shut down");
            previous
        };
        self.transport.cancel_all(previous);
    }
}

impl fmt::Debug for HeuristicsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HeuristicsEngine")
            .field("options", &self.options)
            .field("epoch", &state.epoch)
            .field("streams", &state.slots.len())
            .field("seeking", &state.seeking)
            .field("shutdown", &state.shutdown)
            .finish_non_exhaustive()
    }
}
