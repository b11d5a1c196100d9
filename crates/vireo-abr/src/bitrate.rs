//! Bitrate-selection half of the heuristics engine.
//!
//! Every completed download feeds the stream's windows and then runs the
//! state rule (Buffering or Steady) to pick the bitrate of the next request.

use std::time::Duration;

use tracing::{debug, trace};

use crate::{DownloadState, HeuristicsOptions, NetworkMediaInfo};

/// Measurements of one completed chunk download.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DownloadSample {
    pub bytes: u64,
    /// Wall-clock download time.
    pub elapsed: Duration,
    /// Media duration of the chunk.
    pub chunk_duration: Duration,
    /// Bitrate the chunk was requested at.
    pub bitrate: u64,
    /// Stream buffered time including this chunk.
    pub buffered: Duration,
}

/// Result of [`NetworkMediaInfo::process_chunk_download`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DownloadOutcome {
    pub bandwidth_bps: f64,
    pub cached: bool,
    /// States entered while processing, in order.
    pub entered: [Option<DownloadState>; 2],
    pub next_bitrate: u64,
}

impl NetworkMediaInfo {
    /// Update estimators with a finished download and choose the next bitrate.
    #[expect(
        clippy::cast_precision_loss,
        reason = "byte counts and bitrates stay far below 2^52"
    )]
    pub fn process_chunk_download(
        &mut self,
        sample: &DownloadSample,
        options: &HeuristicsOptions,
    ) -> DownloadOutcome {
        let mut entered = [None, None];

        self.fullness.add(sample.buffered.as_secs_f64());

        let bits = sample.bytes as f64 * 8.0;
        let elapsed = sample.elapsed.as_secs_f64();
        let bandwidth_bps = if elapsed > 0.0 {
            (bits / elapsed).min(options.max_bandwidth_bps)
        } else {
            options.max_bandwidth_bps
        };

        let cached = self.cache.classify(bandwidth_bps, options);
        if cached {
            trace!(
                stream = self.stream,
                bandwidth_bps,
                threshold = self.cache.threshold_bps(),
                "abr: cache hit excluded from bandwidth window"
            );
        } else {
            self.bandwidth.add(bandwidth_bps);
        }

        if let Some(rung) = self.rung_of(sample.bitrate) {
            let chunk_secs = sample.chunk_duration.as_secs_f64();
            if chunk_secs > 0.0 {
                self.encoded_rates[rung].add(bits / chunk_secs);
            }
        }

        self.improvement.record(sample.chunk_duration);
        if !sample.chunk_duration.is_zero() {
            self.last_chunk_duration = sample.chunk_duration;
        }

        if self.state == DownloadState::Buffering && sample.buffered >= options.steady_fullness() {
            self.state = DownloadState::Steady;
            entered[0] = Some(DownloadState::Steady);
        }

        let before = self.state;
        let next = self.select_bitrate(options);
        if self.state != before {
            entered[1] = Some(self.state);
        }

        if next != self.next_bitrate {
            debug!(
                stream = self.stream,
                from = self.next_bitrate,
                to = next,
                state = ?self.state,
                bandwidth = self.bandwidth.kernel(),
                fullness = self.fullness.kernel(),
                "abr: next bitrate changed"
            );
        }
        self.previous_bitrate = Some(self.next_bitrate);
        self.next_bitrate = next;

        DownloadOutcome {
            bandwidth_bps,
            cached,
            entered,
            next_bitrate: next,
        }
    }

    pub(crate) fn rung_of(&self, bitrate: u64) -> Option<usize> {
        self.bitrates.binary_search(&bitrate).ok()
    }

    fn current_rung(&self) -> usize {
        let rung = self
            .rung_of(self.next_bitrate)
            .unwrap_or_else(|| self.bitrates.partition_point(|b| *b < self.next_bitrate));
        rung.clamp(self.range.0, self.range.1)
    }

    fn select_bitrate(&mut self, options: &HeuristicsOptions) -> u64 {
        if let Some(locked) = self.locked {
            return locked;
        }
        let rung = match self.state {
            DownloadState::Buffering => self.buffering_rung(options),
            DownloadState::Steady => self.steady_rung(options),
        };
        self.bitrates[rung.clamp(self.range.0, self.range.1)]
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "ladder bitrates stay far below 2^52"
    )]
    fn buffering_rung(&self, options: &HeuristicsOptions) -> usize {
        let (lowest, highest) = self.range;
        if self.bandwidth.is_empty() {
            return lowest;
        }
        let bandwidth = self.bandwidth.kernel();
        let fullness = self.fullness.last().unwrap_or(0.0);
        let chunk_secs = self.last_chunk_duration.as_secs_f64().max(f64::EPSILON);

        let by_speed = bandwidth / options.relative_content_download_speed;
        let by_fullness = bandwidth * fullness * options.bandwidth_fraction
            * options.fullness_fraction
            / chunk_secs;
        let limit = by_speed.min(by_fullness);

        let mut rung = (lowest..=highest)
            .rev()
            .find(|r| self.bitrates[*r] as f64 <= limit)
            .unwrap_or(lowest);

        if self.cache.last_was_cache()
            || self.fullness.is_decreasing()
            || self.fullness.is_slow_changing()
        {
            rung = rung.min(self.current_rung() + 1);
        }

        trace!(
            stream = self.stream,
            bandwidth,
            fullness,
            by_speed,
            by_fullness,
            rung,
            "abr: buffering rule"
        );
        rung
    }

    fn steady_rung(&mut self, options: &HeuristicsOptions) -> usize {
        let lowest = self.range.0;
        let current = self.current_rung();
        let fullness = Duration::from_secs_f64(self.fullness.last().unwrap_or(0.0).max(0.0));

        if fullness < options.panic_fullness {
            debug!(stream = self.stream, ?fullness, "abr: panic, dropping to lowest rung");
            self.improvement.reset(options.min_improvement_interval);
            self.state = DownloadState::Buffering;
            return lowest;
        }

        if self.fullness.is_slow_changing() {
            if fullness < options.lower_fullness {
                if current > lowest {
                    self.improvement
                        .stepped_down(options.max_improvement_interval);
                    return current - 1;
                }
                return current;
            }
            if fullness > options.upper_fullness {
                return self.try_improve(current);
            }
            return current;
        }

        if self.fullness.is_decreasing() {
            if self.fullness.is_fast_decreasing() && fullness < options.lower_fullness {
                debug!(stream = self.stream, ?fullness, "abr: fast decrease, rebuffering");
                self.state = DownloadState::Buffering;
                return lowest;
            }
            return current;
        }

        self.try_improve(current)
    }

    /// Step up one rung if the back-off allows it and the rung's encoded rate
    /// is below the smoothed bandwidth.
    #[expect(
        clippy::cast_precision_loss,
        reason = "ladder bitrates stay far below 2^52"
    )]
    fn try_improve(&mut self, current: usize) -> usize {
        if !self.improvement.is_ready() {
            return current;
        }
        let candidate = current + 1;
        if candidate > self.range.1 {
            self.improvement.attempted(false);
            return current;
        }
        let window = &self.encoded_rates[candidate];
        let encoded = if window.is_empty() {
            self.bitrates[candidate] as f64
        } else {
            window.kernel()
        };
        let step_up = encoded < self.bandwidth.kernel();
        self.improvement.attempted(step_up);
        if step_up {
            candidate
        } else {
            current
        }
    }

    /// Restrict adaptive selection to `[min, max]`.
    ///
    /// One admissible rung locks it. No admissible rung locks the nearest one:
    /// the highest rung when the range lies above the ladder, the lowest when
    /// it lies below, otherwise the rung just below `min`. Two or more unlock
    /// and clamp.
    pub fn set_bitrate_range(&mut self, min: u64, max: u64) -> u64 {
        let inside: Vec<usize> = (0..self.bitrates.len())
            .filter(|r| (min..=max).contains(&self.bitrates[*r]))
            .collect();
        let last = self.bitrates.len() - 1;
        match inside.as_slice() {
            [] => {
                let rung = if self.bitrates[last] < min {
                    last
                } else if self.bitrates[0] > max {
                    0
                } else {
                    self.bitrates.partition_point(|b| *b < min).saturating_sub(1)
                };
                self.lock_rung(rung);
            }
            [rung] => self.lock_rung(*rung),
            [first, .., end] => {
                self.locked = None;
                self.range = (*first, *end);
                self.next_bitrate = self.bitrates[self.current_rung()];
            }
        }
        debug!(
            stream = self.stream,
            min,
            max,
            locked = ?self.locked,
            next = self.next_bitrate,
            "abr: bitrate range set"
        );
        self.next_bitrate
    }

    fn lock_rung(&mut self, rung: usize) {
        let bitrate = self.bitrates[rung];
        self.locked = Some(bitrate);
        self.range = (rung, rung);
        self.next_bitrate = bitrate;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};
    use url::Url;
    use vireo_media::{ChunkDescriptor, Manifest, ManifestInfo, MediaKind, QualityLevel, StreamDescriptor};

    use super::*;

    const LADDER: [u64; 4] = [300_000, 800_000, 1_500_000, 3_000_000];

    fn manifest() -> Arc<Manifest> {
        let info = ManifestInfo {
            streams: vec![StreamDescriptor {
                kind: MediaKind::Video,
                name: "video".into(),
                language: None,
                url_template: "{bitrate}/{start_time}".into(),
                bitrates: LADDER.iter().copied().map(QualityLevel::new).collect(),
                chunks: vec![ChunkDescriptor::new(Duration::from_secs(2)); 10],
            }],
            ..ManifestInfo::default()
        };
        Arc::new(Manifest::from_info(info, Url::parse("https://example.com/").unwrap()).unwrap())
    }

    #[fixture]
    fn info() -> NetworkMediaInfo {
        NetworkMediaInfo::new(&manifest().streams()[0], &HeuristicsOptions::default())
    }

    /// Download of a 2 s chunk at `bitrate` taking `elapsed_ms`, with `buffered` seconds buffered.
    fn sample(bitrate: u64, elapsed_ms: u64, buffered: u64) -> DownloadSample {
        DownloadSample {
            bytes: bitrate * 2 / 8,
            elapsed: Duration::from_millis(elapsed_ms),
            chunk_duration: Duration::from_secs(2),
            bitrate,
            buffered: Duration::from_secs(buffered),
        }
    }

    #[rstest]
    fn cached_sample_leaves_bandwidth_kernel_unchanged(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        // 600_000 bits in 0.1 s -> 6 Mbps.
        info.process_chunk_download(&sample(300_000, 100, 2), &options);
        let before = info.bandwidth().kernel();

        // 600_000 bits in 0.02 s -> 30 Mbps, >= 3x baseline and >= 5 Mbps floor.
        let outcome = info.process_chunk_download(&sample(300_000, 20, 4), &options);
        assert!(outcome.cached);
        assert!((info.bandwidth().kernel() - before).abs() < f64::EPSILON);
        assert_eq!(info.bandwidth().len(), 1);
    }

    #[rstest]
    fn buffering_becomes_steady_once_at_midpoint(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        let mut transitions = Vec::new();
        for buffered in (2..=30).step_by(2) {
            let outcome = info.process_chunk_download(&sample(300_000, 500, buffered), &options);
            for state in outcome.entered.into_iter().flatten() {
                transitions.push((buffered, state));
            }
            if buffered < 15 {
                assert_eq!(info.state(), DownloadState::Buffering, "buffered {buffered}");
            }
        }
        assert_eq!(transitions, vec![(16, DownloadState::Steady)]);
    }

    #[rstest]
    fn buffering_picks_largest_admissible_rung(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        // 600_000 bits in 0.2 s -> 3 Mbps; 8 s buffered.
        // by_speed = 2.4 Mbps, by_fullness = 3M * 8 * 0.4 / 2 = 4.8 Mbps.
        let outcome = info.process_chunk_download(&sample(300_000, 200, 8), &options);
        assert_eq!(outcome.next_bitrate, 1_500_000);
    }

    #[rstest]
    fn steady_panics_to_lowest(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        info.state = DownloadState::Steady;
        info.next_bitrate = 1_500_000;
        let outcome = info.process_chunk_download(&sample(1_500_000, 500, 2), &options);
        assert_eq!(outcome.next_bitrate, 300_000);
        assert_eq!(outcome.entered, [None, Some(DownloadState::Buffering)]);
    }

    #[rstest]
    fn steady_growth_steps_up_when_bandwidth_allows(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        info.state = DownloadState::Steady;
        // 4 Mbps downloads of 800 kbps chunks with rising fullness.
        for (i, buffered) in [16u64, 18, 20, 22, 24, 26].into_iter().enumerate() {
            info.next_bitrate = 800_000;
            let outcome = info.process_chunk_download(&sample(800_000, 400, buffered), &options);
            if i < 4 {
                // Back-off: 10 s of downloaded stream time needed first.
                assert_eq!(outcome.next_bitrate, 800_000, "sample {i}");
            } else if i == 4 {
                assert_eq!(outcome.next_bitrate, 1_500_000);
            }
        }
    }

    #[rstest]
    fn locked_bitrate_short_circuits(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        assert_eq!(info.set_bitrate_range(700_000, 900_000), 800_000);
        for buffered in [2, 10, 20, 1] {
            let outcome = info.process_chunk_download(&sample(800_000, 50, buffered), &options);
            assert_eq!(outcome.next_bitrate, 800_000);
        }
    }

    #[rstest]
    #[case(700_000, 900_000, Some(800_000))]
    #[case(4_000_000, 5_000_000, Some(3_000_000))]
    #[case(10_000, 200_000, Some(300_000))]
    #[case(900_000, 1_000_000, Some(800_000))]
    #[case(300_000, 1_500_000, None)]
    fn bitrate_range_collapse(
        mut info: NetworkMediaInfo,
        #[case] min: u64,
        #[case] max: u64,
        #[case] locked: Option<u64>,
    ) {
        info.set_bitrate_range(min, max);
        assert_eq!(info.locked_bitrate(), locked);
    }

    #[rstest]
    fn range_clamps_adaptive_choice(mut info: NetworkMediaInfo) {
        let options = HeuristicsOptions::default();
        info.set_bitrate_range(800_000, 1_500_000);
        assert_eq!(info.next_bitrate(), 800_000);
        // Very fast network would pick 3 Mbps without the range.
        let outcome = info.process_chunk_download(&sample(800_000, 50, 14), &options);
        assert_eq!(outcome.next_bitrate, 1_500_000);
        assert_eq!(info.bitrate_range(), (800_000, 1_500_000));
    }
}
