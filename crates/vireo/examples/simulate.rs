//! Drive the engine against a simulated network.
//!
//! ```
//! cargo run -p vireo --example simulate
//! ```
//!
//! Downloads run on background threads at a configurable bandwidth. The demo
//! plays video and English audio, drops the bandwidth, seeks, switches the
//! audio language and prints per-stream diagnostics.

use std::{
    collections::HashMap,
    error::Error,
    sync::{
        Arc, mpsc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, metadata::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use vireo::prelude::*;
use vireo_test_utils::{
    CHUNK, FixedFrameParserFactory, StaticManifestParser, av_manifest_info, base_url, payload_len,
};
use web_time::Instant;

type Key = (usize, usize, u64);

/// Transport whose downloads take `bytes / bandwidth`, divided by `speedup`.
struct SimulatedNetwork {
    bandwidth_bps: AtomicU64,
    speedup: u32,
    in_flight: Arc<Mutex<HashMap<Key, (DownloadRequest, CompletionHandler)>>>,
}

impl SimulatedNetwork {
    fn new(bandwidth_bps: u64, speedup: u32) -> Arc<Self> {
        Arc::new(Self {
            bandwidth_bps: AtomicU64::new(bandwidth_bps),
            speedup: speedup.max(1),
            in_flight: Arc::default(),
        })
    }

    fn set_bandwidth(&self, bandwidth_bps: u64) {
        self.bandwidth_bps.store(bandwidth_bps.max(1), Ordering::Relaxed);
    }

    fn key(request: &DownloadRequest) -> Key {
        (
            request.chunk.stream_id(),
            request.chunk.chunk_id(),
            request.epoch,
        )
    }

    fn abort_where(&self, matches: impl Fn(&Key) -> bool) {
        let aborted: Vec<_> = {
            let mut in_flight = self.in_flight.lock();
            let keys: Vec<Key> = in_flight.keys().copied().filter(|k| matches(k)).collect();
            keys.iter().filter_map(|k| in_flight.remove(k)).collect()
        };
        for (request, on_complete) in aborted {
            on_complete(request);
        }
    }
}

impl Transport for SimulatedNetwork {
    fn start(&self, request: DownloadRequest, on_complete: CompletionHandler) {
        let len = payload_len(request.chunk.bitrate(), request.chunk.duration());
        let bits = u64::try_from(len).unwrap_or(u64::MAX).saturating_mul(8);
        let wire = Duration::from_micros(
            bits.saturating_mul(1_000_000) / self.bandwidth_bps.load(Ordering::Relaxed),
        );
        let delay = wire / self.speedup;
        let key = Self::key(&request);
        self.in_flight.lock().insert(key, (request, on_complete));

        let in_flight = Arc::clone(&self.in_flight);
        thread::spawn(move || {
            let started = Instant::now();
            thread::sleep(delay);
            let Some((request, on_complete)) = in_flight.lock().remove(&key) else {
                return;
            };
            request.chunk.complete_download(
                request.epoch,
                Bytes::from(vec![0u8; len]),
                started,
                started + wire,
            );
            on_complete(request);
        });
    }

    fn cancel(&self, chunk: &Arc<Chunk>) {
        let (stream, id) = (chunk.stream_id(), chunk.chunk_id());
        self.abort_where(|&(s, c, _)| s == stream && c == id);
    }

    fn cancel_all(&self, epoch: u64) {
        self.abort_where(|&(_, _, e)| e == epoch);
    }
}

struct ChannelHost(mpsc::Sender<SourceResponse>);

impl MediaHost for ChannelHost {
    fn deliver(&self, response: SourceResponse) {
        let _ = self.0.send(response);
    }

    fn report_error(&self, error: &str) {
        warn!(error, "host: session failed");
    }
}

fn log_events(events: &mut broadcast::Receiver<Event>) {
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Abr(AbrEvent::DownloadBitrateChanged { stream, from, to }) => {
                info!(stream, ?from, to, "download bitrate");
            }
            Event::Source(SourceEvent::PlaybackBitrateChanged { stream, from, to }) => {
                info!(stream, ?from, to, "playback bitrate");
            }
            Event::Abr(AbrEvent::DownloadsPaused { ad_timestamp }) => {
                info!(?ad_timestamp, "downloads paused for ad");
            }
            Event::Abr(AbrEvent::DownloadsResumed { ad_timestamp }) => {
                info!(?ad_timestamp, "downloads resumed");
            }
            _ => {}
        }
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("vireo_abr=debug".parse()?)
                .add_directive("vireo_source=info".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let mut manifest = av_manifest_info(60, CHUNK);
    manifest.ad_points.push(AdInsertionPoint::new(
        Duration::from_secs(30),
        Duration::from_secs(15),
    ));
    let network = SimulatedNetwork::new(4_000_000, 20);
    let (tx, rx) = mpsc::channel();
    let controller = SourceController::with_transport(
        Arc::new(StaticManifestParser::new(manifest)),
        Arc::new(FixedFrameParserFactory::covering(CHUNK, 4)),
        Arc::clone(&network) as Arc<dyn Transport>,
        Arc::new(ChannelHost(tx)),
        SourceOptions::default().with_heuristics(
            HeuristicsOptions::default().with_max_concurrent_downloads(2),
        ),
    )?;
    let mut events = controller.events().subscribe();
    let timeout = Duration::from_secs(10);

    controller.open(Bytes::from_static(b"<SmoothStreamingMedia/>"), base_url())?;
    if let SourceResponse::Opened { duration, streams } = rx.recv_timeout(timeout)? {
        info!(?duration, streams = streams.len(), "opened");
    }

    let mut audio = 1;
    'play: for step in 0..240_u32 {
        for stream in [0, audio] {
            controller.get_sample(stream)?;
            match rx.recv_timeout(timeout)? {
                SourceResponse::Sample(sample) => {
                    if stream == 0 && step % 20 == 0 {
                        info!(
                            position = ?sample.position(),
                            bitrate = sample.bitrate,
                            "video"
                        );
                    }
                }
                SourceResponse::EndOfStream { stream } => {
                    info!(stream, "end of stream");
                    break 'play;
                }
                other => warn!(?other, "unexpected response"),
            }
        }
        match step {
            60 => {
                info!("bandwidth drops to 600 kbit/s");
                network.set_bandwidth(600_000);
            }
            120 => {
                controller.seek(Duration::from_secs(80))?;
                info!(response = ?rx.recv_timeout(timeout)?, "seek");
                network.set_bandwidth(8_000_000);
            }
            160 => {
                controller.switch_stream(audio, 2)?;
                info!(response = ?rx.recv_timeout(timeout)?, "audio switch");
                audio = 2;
            }
            _ => {}
        }
        log_events(&mut events);
    }

    controller.diagnostics()?;
    if let SourceResponse::Diagnostics(streams) = rx.recv_timeout(timeout)? {
        for d in streams {
            info!(
                stream = d.stream,
                kind = %d.kind,
                active = d.active,
                state = ?d.state,
                next_bitrate = d.next_bitrate,
                bandwidth_bps = d.bandwidth_bps,
                buffered = ?d.buffered_time,
                "diagnostics"
            );
        }
    }
    controller.close()?;
    info!(response = ?rx.recv_timeout(timeout)?, "closed");
    Ok(())
}
