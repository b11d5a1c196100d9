//! Command execution on the worker thread.
//!
//! The worker is the only mutator of chunk cursors. It never holds a stream's
//! chunk-sequence lock while calling into the heuristics.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use url::Url;
use vireo_abr::Heuristics;
use vireo_events::{BitrateTracker, EventBus, SourceEvent};
use vireo_media::{
    Chunk, ChunkParserFactory, ChunkState, Frame, Manifest, ManifestParser, MediaKind, StreamInfo,
};

use crate::{
    Collaborators, CommandKind, MediaHost, Sample, SessionContext, SourceError, SourceOptions,
    SourceResponse, SourceResult, SourceState, StreamSummary,
    command::{CommandQueue, SourceCommand},
};

/// State shared between the controller handle and its worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queue: CommandQueue,
    pub(crate) playback_paused: AtomicBool,
    state: Mutex<SourceState>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            queue: CommandQueue::new(),
            playback_paused: AtomicBool::new(false),
            state: Mutex::new(SourceState::None),
        }
    }

    pub(crate) fn state(&self) -> SourceState {
        *self.state.lock()
    }

    fn set_state(&self, state: SourceState) {
        *self.state.lock() = state;
    }
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    session: Arc<SessionContext>,
    options: SourceOptions,
    manifest_parser: Arc<dyn ManifestParser>,
    chunk_parsers: Arc<dyn ChunkParserFactory>,
    heuristics: Arc<dyn Heuristics>,
    host: Arc<dyn MediaHost>,
    bus: EventBus,
    manifest: Option<Arc<Manifest>>,
    active: Vec<bool>,
    /// Consecutive skipped chunks per stream.
    skips: Vec<u32>,
    /// Position of the last sample delivered per stream.
    positions: Vec<Option<Duration>>,
    playback_bitrates: BitrateTracker,
    /// Nothing has been played or sought yet.
    pristine: bool,
}

/// First stream of every media kind, in manifest order.
pub(crate) fn default_active_streams(manifest: &Manifest) -> Vec<usize> {
    let mut kinds: Vec<MediaKind> = Vec::new();
    let mut active = Vec::new();
    for stream in manifest.streams() {
        if !kinds.contains(&stream.kind()) {
            kinds.push(stream.kind());
            active.push(stream.id());
        }
    }
    active
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

impl Worker {
    pub(crate) fn new(
        collaborators: Collaborators,
        options: SourceOptions,
        shared: Arc<Shared>,
        session: Arc<SessionContext>,
    ) -> Self {
        let Collaborators {
            manifest_parser,
            chunk_parsers,
            heuristics,
            host,
            bus,
        } = collaborators;
        Self {
            shared,
            session,
            options,
            manifest_parser,
            chunk_parsers,
            heuristics,
            host,
            bus,
            manifest: None,
            active: Vec::new(),
            skips: Vec::new(),
            positions: Vec::new(),
            playback_bitrates: BitrateTracker::new(),
            pristine: true,
        }
    }

    pub(crate) fn run(mut self) {
        let span = self.session.span();
        let _entered = span.enter();
        debug!("source: worker started");
        while let Some(command) = self.shared.queue.pop() {
            let kind = command.kind();
            trace!(?command, "source: executing");
            match panic::catch_unwind(AssertUnwindSafe(|| self.execute(command))) {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Stop)) => break,
                Ok(Err(error)) => {
                    self.fail(&error);
                    break;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(?kind, message, "source: command panicked");
                    self.fail(&SourceError::Panicked(message));
                    panic::resume_unwind(payload);
                }
            }
        }
        debug!("source: worker stopped");
    }

    /// `Err` is fatal for the session; per-request problems are answered with
    /// [`SourceResponse::Rejected`] instead.
    fn execute(&mut self, command: SourceCommand) -> SourceResult<Flow> {
        match command {
            SourceCommand::Open { manifest, base_url } => self.open(&manifest, base_url)?,
            SourceCommand::GetSample { stream } => self.get_sample(stream)?,
            SourceCommand::Seek { position } => self.seek(position),
            SourceCommand::SwitchStream { from, to } => self.switch_stream(from, to),
            SourceCommand::Diagnostics => self.diagnostics(),
            SourceCommand::SetBitrateRange { stream, min, max } => {
                self.set_bitrate_range(stream, min, max);
            }
            SourceCommand::ParseChunk { stream, chunk } => self.parse_chunk(stream, chunk),
            SourceCommand::ReplaceMedia {
                stream,
                offset,
                reply,
            } => self.replace_media(stream, offset, reply),
            SourceCommand::Close => {
                self.close();
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn reject(&self, command: CommandKind, error: SourceError) {
        debug!(?command, %error, "source: request rejected");
        self.host
            .deliver(SourceResponse::Rejected { command, error });
    }

    fn opened(&self) -> SourceResult<Arc<Manifest>> {
        self.manifest.clone().ok_or(SourceError::NotOpened)
    }

    fn active_stream(&self, stream: usize) -> SourceResult<Arc<Manifest>> {
        let manifest = self.opened()?;
        if manifest.stream(stream).is_none() {
            return Err(SourceError::UnknownStream(stream));
        }
        if !self.active[stream] {
            return Err(SourceError::InactiveStream(stream));
        }
        Ok(manifest)
    }

    fn open(&mut self, data: &Bytes, base_url: Url) -> SourceResult<()> {
        if self.manifest.is_some() {
            self.reject(CommandKind::Open, SourceError::AlreadyOpened);
            return Ok(());
        }
        let info = self.manifest_parser.parse(data, &base_url)?;
        let manifest = Arc::new(Manifest::from_info(info, base_url)?);
        let count = manifest.streams().len();
        let active = default_active_streams(&manifest);

        self.active = (0..count).map(|id| active.contains(&id)).collect();
        self.skips = vec![0; count];
        self.positions = vec![None; count];
        self.heuristics.open(Arc::clone(&manifest), &active);
        self.shared.set_state(SourceState::Opened);

        let streams = manifest
            .streams()
            .iter()
            .map(|s| StreamSummary {
                id: s.id(),
                kind: s.kind(),
                name: s.name().to_owned(),
                language: s.language().map(str::to_owned),
                bitrates: s.bitrates().to_vec(),
                active: self.active[s.id()],
            })
            .collect();
        let duration = manifest.duration();
        debug!(streams = count, ?active, ?duration, "source: opened");
        self.bus.publish(SourceEvent::Opened {
            streams: count,
            duration,
        });
        self.host
            .deliver(SourceResponse::Opened { duration, streams });
        self.manifest = Some(manifest);
        self.heuristics.schedule();
        Ok(())
    }

    fn get_sample(&mut self, stream: usize) -> SourceResult<()> {
        let manifest = match self.active_stream(stream) {
            Ok(manifest) => manifest,
            Err(error) => {
                self.reject(CommandKind::GetSample, error);
                return Ok(());
            }
        };
        let Some(info) = manifest.stream(stream) else {
            return Ok(());
        };

        loop {
            let Some(chunk) = info.chunks().current().cloned() else {
                debug!(stream, "source: end of stream");
                self.bus.publish(SourceEvent::EndOfStream { stream });
                self.host.deliver(SourceResponse::EndOfStream { stream });
                return Ok(());
            };

            match chunk.state() {
                ChunkState::Parsed => match chunk.next_frame() {
                    Ok(Some((frame, data))) => return self.deliver_sample(stream, &chunk, frame, data),
                    Ok(None) => {
                        trace!(stream, chunk = chunk.chunk_id(), "source: chunk played out");
                        info.chunks().advance();
                        self.heuristics.schedule();
                    }
                    Err(e) => {
                        warn!(
                            stream,
                            chunk = chunk.chunk_id(),
                            error = %e,
                            "source: frame parse failed"
                        );
                        chunk.mark_error();
                    }
                },
                ChunkState::Loaded => {
                    self.shared.queue.push(SourceCommand::ParseChunk {
                        stream,
                        chunk: chunk.chunk_id(),
                    })?;
                    self.shared.queue.push(SourceCommand::GetSample { stream })?;
                    return Ok(());
                }
                ChunkState::Pending | ChunkState::Error => {
                    let paused = self.shared.playback_paused.load(Ordering::Acquire);
                    let missed = chunk.record_miss();
                    if missed >= self.options.miss_threshold(paused) {
                        self.skip_chunk(info, &chunk, missed)?;
                        continue;
                    }
                    if self.session.log_once("sample-before-download") {
                        debug!(stream, chunk = chunk.chunk_id(), "source: waiting for chunk download");
                    }
                    if !self.options.poll_interval.is_zero() {
                        thread::sleep(self.options.poll_interval);
                    }
                    self.shared.queue.push(SourceCommand::GetSample { stream })?;
                    return Ok(());
                }
            }
        }
    }

    fn deliver_sample(
        &mut self,
        stream: usize,
        chunk: &Chunk,
        frame: Frame,
        data: Bytes,
    ) -> SourceResult<()> {
        let sample = Sample {
            stream,
            chunk: chunk.chunk_id(),
            chunk_start: chunk.start(),
            timestamp: frame.timestamp,
            bitrate: chunk.bitrate(),
            data,
            drm: frame.drm,
        };
        let position = sample.position();
        self.skips[stream] = 0;
        self.positions[stream] = Some(position);
        self.pristine = false;
        if let Some(change) = self.playback_bitrates.update(stream, sample.bitrate) {
            debug!(stream, from = ?change.from, to = change.to, "source: playback bitrate changed");
            self.bus.publish(SourceEvent::PlaybackBitrateChanged {
                stream,
                from: change.from,
                to: change.to,
            });
        }
        trace!(stream, chunk = sample.chunk, ?position, "source: sample");
        self.host.deliver(SourceResponse::Sample(sample));

        self.heuristics.on_sample_delivered(stream, position);
        if let Some(offset) = self.heuristics.replacement_candidate(stream) {
            self.shared.queue.push(SourceCommand::ReplaceMedia {
                stream,
                offset,
                reply: false,
            })?;
        }
        Ok(())
    }

    fn skip_chunk(&mut self, info: &StreamInfo, chunk: &Arc<Chunk>, missed: u32) -> SourceResult<()> {
        let stream = info.id();
        warn!(
            stream,
            chunk = chunk.chunk_id(),
            missed,
            state = ?chunk.state(),
            "source: giving up on chunk"
        );
        self.heuristics.cancel_chunk(chunk);
        chunk.mark_error();
        info.chunks().advance();
        self.bus.publish(SourceEvent::ChunkSkipped {
            stream,
            chunk: chunk.chunk_id(),
        });

        self.skips[stream] += 1;
        let skips = self.skips[stream];
        if skips > self.options.max_consecutive_skips {
            return Err(SourceError::StreamSkipLimit { stream, skips });
        }
        self.heuristics.schedule();
        Ok(())
    }

    fn seek(&mut self, position: Duration) {
        let manifest = match self.opened() {
            Ok(manifest) => manifest,
            Err(error) => {
                self.reject(CommandKind::Seek, error);
                return;
            }
        };
        if self.pristine && position.is_zero() {
            self.pristine = false;
            debug!("source: initial seek to start, nothing to discard");
            self.complete_seek(position);
            return;
        }
        self.pristine = false;

        let position = position.min(manifest.duration());
        self.heuristics.begin_seek();
        for info in manifest.streams().iter().filter(|s| self.active[s.id()]) {
            let index = info.chunks().discard_until(position);
            trace!(stream = info.id(), index, "source: cursor repositioned");
        }
        self.skips.fill(0);
        self.positions.fill(Some(position));
        self.heuristics.end_seek(position);
        self.complete_seek(position);
    }

    fn complete_seek(&self, position: Duration) {
        debug!(?position, "source: seek completed");
        self.bus.publish(SourceEvent::SeekCompleted { position });
        self.host
            .deliver(SourceResponse::SeekCompleted { position });
    }

    fn switch_stream(&mut self, from: usize, to: usize) {
        let manifest = match self.active_stream(from) {
            Ok(manifest) => manifest,
            Err(error) => {
                self.reject(CommandKind::SwitchStream, error);
                return;
            }
        };
        let (Some(source), Some(target)) = (manifest.stream(from), manifest.stream(to)) else {
            self.reject(CommandKind::SwitchStream, SourceError::UnknownStream(to));
            return;
        };
        if from == to || source.kind() != target.kind() || self.active[to] {
            self.reject(
                CommandKind::SwitchStream,
                SourceError::IncompatibleStreams { from, to },
            );
            return;
        }

        let position = self.positions[from].unwrap_or_else(|| {
            source
                .chunks()
                .current()
                .map_or(Duration::ZERO, |c| c.start())
        });
        self.heuristics.set_stream_active(from, false);
        self.active[from] = false;
        self.playback_bitrates.forget(from);

        target.chunks().discard_until(position);
        self.active[to] = true;
        self.skips[to] = 0;
        self.positions[to] = Some(position);
        self.heuristics.set_stream_active(to, true);

        debug!(from, to, ?position, "source: stream switched");
        self.bus.publish(SourceEvent::StreamSwitched { from, to });
        self.host
            .deliver(SourceResponse::StreamSwitched { from, to });
    }

    fn diagnostics(&self) {
        if let Err(error) = self.opened() {
            self.reject(CommandKind::Diagnostics, error);
            return;
        }
        self.host
            .deliver(SourceResponse::Diagnostics(self.heuristics.diagnostics()));
    }

    fn set_bitrate_range(&self, stream: usize, min: u64, max: u64) {
        let result = self.opened().and_then(|_| {
            self.heuristics
                .set_bitrate_range(stream, min, max)
                .ok_or(SourceError::UnknownStream(stream))
        });
        match result {
            Ok(next_bitrate) => {
                debug!(stream, min, max, next_bitrate, "source: bitrate range set");
                self.host.deliver(SourceResponse::BitrateRangeSet {
                    stream,
                    next_bitrate,
                });
            }
            Err(error) => self.reject(CommandKind::SetBitrateRange, error),
        }
    }

    fn parse_chunk(&self, stream: usize, chunk: usize) {
        let Some(info) = self.manifest.as_deref().and_then(|m| m.stream(stream)) else {
            return;
        };
        let Some(chunk) = info.chunk(chunk) else {
            return;
        };
        if chunk.state() != ChunkState::Loaded {
            trace!(stream, chunk = chunk.chunk_id(), state = ?chunk.state(), "source: parse skipped");
            return;
        }
        if let Err(e) = chunk.parse_with(self.chunk_parsers.create(info.kind())) {
            warn!(
                stream,
                chunk = chunk.chunk_id(),
                error = %e,
                "source: chunk header rejected"
            );
        }
    }

    fn replace_media(&self, stream: usize, offset: Duration, reply: bool) {
        let manifest = match self.active_stream(stream) {
            Ok(manifest) => manifest,
            Err(error) => {
                if reply {
                    self.reject(CommandKind::ReplaceMedia, error);
                }
                return;
            }
        };
        let Some(info) = manifest.stream(stream) else {
            return;
        };
        let pruned = info.chunks().prune_ahead(offset);
        if let Some(chunk) = pruned {
            debug!(stream, chunk, ?offset, "source: replacing buffered chunk");
            self.heuristics.force_chunk(stream, chunk);
        }
        if reply {
            self.host
                .deliver(SourceResponse::MediaReplaced { stream, chunk: pruned });
        }
    }

    /// Answer every queued request with [`SourceError::Closed`].
    fn drain_queue(&self) {
        for command in self.shared.queue.close() {
            if command.expects_reply() {
                self.host.deliver(SourceResponse::Rejected {
                    command: command.kind(),
                    error: SourceError::Closed,
                });
            }
        }
    }

    fn close(&mut self) {
        self.shared.set_state(SourceState::Closed);
        self.heuristics.shutdown();
        self.manifest = None;
        debug!("source: closed");
        self.bus.publish(SourceEvent::Closed);
        self.host.deliver(SourceResponse::Closed);
        self.drain_queue();
    }

    /// The single failure path: close the session and report `error` once.
    fn fail(&mut self, error: &SourceError) {
        if self.shared.state() == SourceState::Closed {
            debug!(%error, "source: failure after close ignored");
            return;
        }
        error!(%error, "source: fatal error");
        self.shared.set_state(SourceState::Closed);
        self.heuristics.shutdown();
        self.manifest = None;
        self.drain_queue();
        let message = error.to_string();
        self.host.report_error(&message);
        self.bus.publish(SourceEvent::Error { error: message });
    }
}

#[cfg(test)]
mod tests {
    use vireo_test_utils::{AUDIO_LADDER, CHUNK, av_manifest_info, manifest, stream_descriptor};

    use super::*;

    #[test]
    fn first_stream_of_each_kind_is_active() {
        let mut info = av_manifest_info(4, CHUNK);
        info.streams
            .push(stream_descriptor(MediaKind::Text, Some("en"), &[1_000], 4, CHUNK));
        info.streams
            .push(stream_descriptor(MediaKind::Audio, Some("de"), &AUDIO_LADDER, 4, CHUNK));
        assert_eq!(default_active_streams(&manifest(info)), vec![0, 1, 3]);
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&17_u8), "non-string panic payload");
    }
}
