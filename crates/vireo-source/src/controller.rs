use std::{
    fmt,
    sync::{Arc, atomic::Ordering},
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;
use vireo_abr::{Heuristics, HeuristicsEngine};
use vireo_events::EventBus;
use vireo_media::{ChunkParserFactory, ManifestParser, TemplateUrlGenerator, Transport};

use crate::{
    MediaHost, SessionContext, SourceError, SourceOptions, SourceResult,
    command::SourceCommand,
    worker::{Shared, Worker},
};

/// Lifecycle of a [`SourceController`]. `Closed` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceState {
    #[default]
    None,
    Opened,
    Closed,
}

/// Everything the controller talks to.
pub struct Collaborators {
    pub manifest_parser: Arc<dyn ManifestParser>,
    pub chunk_parsers: Arc<dyn ChunkParserFactory>,
    pub heuristics: Arc<dyn Heuristics>,
    pub host: Arc<dyn MediaHost>,
    pub bus: EventBus,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Host-facing handle of the source.
///
/// Every request is queued and executed in order on a dedicated worker
/// thread, which answers through [`MediaHost::deliver`]. Dropping the
/// controller closes it and joins the worker.
pub struct SourceController {
    shared: Arc<Shared>,
    bus: EventBus,
    session: Arc<SessionContext>,
    worker: Option<JoinHandle<()>>,
}

impl SourceController {
    pub fn spawn(collaborators: Collaborators, options: SourceOptions) -> SourceResult<Self> {
        let session = Arc::new(SessionContext::new());
        let shared = Arc::new(Shared::new());
        let bus = collaborators.bus.clone();
        let worker = Worker::new(
            collaborators,
            options,
            Arc::clone(&shared),
            Arc::clone(&session),
        );
        let handle = thread::Builder::new()
            .name("vireo-source".to_string())
            .spawn(move || worker.run())
            .map_err(SourceError::Spawn)?;
        debug!(session = session.id(), "source: controller started");
        Ok(Self {
            shared,
            bus,
            session,
            worker: Some(handle),
        })
    }

    /// Controller driving a [`HeuristicsEngine`] over `transport`, with chunk
    /// URLs built by [`TemplateUrlGenerator`].
    pub fn with_transport(
        manifest_parser: Arc<dyn ManifestParser>,
        chunk_parsers: Arc<dyn ChunkParserFactory>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn MediaHost>,
        options: SourceOptions,
    ) -> SourceResult<Self> {
        let bus = EventBus::new(options.event_capacity);
        let heuristics = HeuristicsEngine::new(
            options.heuristics.clone(),
            transport,
            Arc::new(TemplateUrlGenerator),
            bus.clone(),
        );
        Self::spawn(
            Collaborators {
                manifest_parser,
                chunk_parsers,
                heuristics,
                host,
                bus,
            },
            options,
        )
    }

    fn enqueue(&self, command: SourceCommand) -> SourceResult<()> {
        self.shared.queue.push(command)
    }

    /// Parse `manifest` and start downloading the default streams (the first
    /// stream of every kind).
    pub fn open(&self, manifest: Bytes, base_url: Url) -> SourceResult<()> {
        self.enqueue(SourceCommand::Open { manifest, base_url })
    }

    pub fn get_sample(&self, stream: usize) -> SourceResult<()> {
        self.enqueue(SourceCommand::GetSample { stream })
    }

    pub fn seek(&self, position: Duration) -> SourceResult<()> {
        self.enqueue(SourceCommand::Seek { position })
    }

    /// Replace active stream `from` with inactive stream `to` of the same kind
    /// at the current playback position.
    pub fn switch_stream(&self, from: usize, to: usize) -> SourceResult<()> {
        self.enqueue(SourceCommand::SwitchStream { from, to })
    }

    pub fn diagnostics(&self) -> SourceResult<()> {
        self.enqueue(SourceCommand::Diagnostics)
    }

    /// Re-download, at the current bitrate, the first buffered chunk starting
    /// `offset` after the playing one.
    pub fn replace_media(&self, stream: usize, offset: Duration) -> SourceResult<()> {
        self.enqueue(SourceCommand::ReplaceMedia {
            stream,
            offset,
            reply: true,
        })
    }

    pub fn close(&self) -> SourceResult<()> {
        self.enqueue(SourceCommand::Close)
    }

    /// Host playback pause state; a paused host tolerates more sample misses.
    pub fn set_playback_paused(&self, paused: bool) {
        self.shared.playback_paused.store(paused, Ordering::Release);
    }

    /// Restrict the stream's adaptive ladder to `[min, max]`. Answered with
    /// the bitrate of the stream's next request.
    pub fn set_bitrate_range(&self, stream: usize, min: u64, max: u64) -> SourceResult<()> {
        self.enqueue(SourceCommand::SetBitrateRange { stream, min, max })
    }

    pub fn state(&self) -> SourceState {
        self.shared.state()
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    /// Bus carrying heuristics and source events.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Requests waiting for the worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for SourceController {
    fn drop(&mut self) {
        if !self.shared.queue.is_closed() {
            let _ = self.enqueue(SourceCommand::Close);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(session = self.session.id(), "source: worker panicked");
            }
        }
    }
}

impl fmt::Debug for SourceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceController")
            .field("session", &self.session.id())
            .field("state", &self.state())
            .field("queue", &self.shared.queue)
            .finish_non_exhaustive()
    }
}
