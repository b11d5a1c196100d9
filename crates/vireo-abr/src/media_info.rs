use std::time::Duration;

use vireo_media::{MediaKind, StreamInfo};

use crate::{HeuristicsOptions, RateWindow};

/// Per-stream download state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownloadState {
    /// Ramping towards a usable bitrate.
    #[default]
    Buffering,
    /// Holding near target buffer fullness.
    Steady,
}

/// Packet-pair cache detection over the first chunks of a stream.
#[derive(Clone, Debug, Default)]
pub struct CacheDetector {
    observed: usize,
    baseline_bps: f64,
    threshold_bps: f64,
    last_was_cache: bool,
}

impl CacheDetector {
    /// Classify a bandwidth sample. Returns `true` for a cache hit.
    ///
    /// The first sample seeds the baseline. Later samples inside the detection
    /// window raise it to the highest non-cache bandwidth observed.
    pub fn classify(&mut self, bandwidth_bps: f64, options: &HeuristicsOptions) -> bool {
        let hit = self.observed > 0 && bandwidth_bps >= self.threshold_bps;
        if !hit && self.observed < options.cache_detection_chunks {
            self.baseline_bps = self.baseline_bps.max(bandwidth_bps);
            self.threshold_bps = (self.baseline_bps * options.cache_bandwidth_factor)
                .max(options.min_cache_bandwidth_bps);
        }
        self.observed = self.observed.saturating_add(1);
        self.last_was_cache = hit;
        hit
    }

    pub fn baseline_bps(&self) -> f64 {
        self.baseline_bps
    }

    pub fn threshold_bps(&self) -> f64 {
        self.threshold_bps
    }

    pub fn last_was_cache(&self) -> bool {
        self.last_was_cache
    }
}

/// Back-off bookkeeping for step-up attempts, measured in downloaded stream
/// time.
#[derive(Clone, Debug)]
pub struct ImprovementTracker {
    interval: Duration,
    since_attempt: Duration,
    since_step_up: Option<Duration>,
}

impl ImprovementTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            since_attempt: Duration::ZERO,
            since_step_up: None,
        }
    }

    pub fn record(&mut self, downloaded: Duration) {
        self.since_attempt += downloaded;
        if let Some(since) = self.since_step_up.as_mut() {
            *since += downloaded;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.since_attempt >= self.interval
    }

    pub fn attempted(&mut self, stepped_up: bool) {
        self.since_attempt = Duration::ZERO;
        if stepped_up {
            self.since_step_up = Some(Duration::ZERO);
        }
    }

    /// A step down happened. If it undoes a step up made within the current
    /// interval, the interval doubles (capped at `max`).
    pub fn stepped_down(&mut self, max: Duration) -> bool {
        let undoes = self.since_step_up.is_some_and(|t| t < self.interval);
        if undoes {
            self.interval = (self.interval * 2).min(max);
        }
        self.since_step_up = None;
        undoes
    }

    pub fn reset(&mut self, interval: Duration) {
        *self = Self::new(interval);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Live ABR state of one stream.
///
/// Owned by the heuristics engine and mutated only under its lock. The
/// bitrate rule lives in `bitrate.rs`, the scheduler reads `next_bitrate`.
#[derive(Clone, Debug)]
pub struct NetworkMediaInfo {
    pub(crate) stream: usize,
    pub(crate) kind: MediaKind,
    pub(crate) bitrates: Vec<u64>,
    pub(crate) state: DownloadState,
    pub(crate) previous_bitrate: Option<u64>,
    pub(crate) next_bitrate: u64,
    pub(crate) encoded_rates: Vec<RateWindow>,
    pub(crate) fullness: RateWindow,
    pub(crate) bandwidth: RateWindow,
    pub(crate) locked: Option<u64>,
    /// Admissible ladder indexes, inclusive.
    pub(crate) range: (usize, usize),
    pub(crate) cache: CacheDetector,
    pub(crate) improvement: ImprovementTracker,
    pub(crate) last_chunk_duration: Duration,
}

impl NetworkMediaInfo {
    pub fn new(stream: &StreamInfo, options: &HeuristicsOptions) -> Self {
        let bitrates = stream.bitrates().to_vec();
        Self {
            stream: stream.id(),
            kind: stream.kind(),
            encoded_rates: vec![RateWindow::new(options.kernel); bitrates.len()],
            range: (0, bitrates.len().saturating_sub(1)),
            next_bitrate: stream.lowest_bitrate(),
            bitrates,
            state: DownloadState::Buffering,
            previous_bitrate: None,
            fullness: RateWindow::new(options.kernel),
            bandwidth: RateWindow::new(options.kernel),
            locked: None,
            cache: CacheDetector::default(),
            improvement: ImprovementTracker::new(options.min_improvement_interval),
            last_chunk_duration: Duration::ZERO,
        }
    }

    pub fn stream(&self) -> usize {
        self.stream
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn next_bitrate(&self) -> u64 {
        self.next_bitrate
    }

    pub fn previous_bitrate(&self) -> Option<u64> {
        self.previous_bitrate
    }

    pub fn locked_bitrate(&self) -> Option<u64> {
        self.locked
    }

    /// Admissible bitrates (lowest, highest).
    pub fn bitrate_range(&self) -> (u64, u64) {
        (self.bitrates[self.range.0], self.bitrates[self.range.1])
    }

    pub fn bandwidth(&self) -> &RateWindow {
        &self.bandwidth
    }

    pub fn fullness(&self) -> &RateWindow {
        &self.fullness
    }

    pub fn encoded_rate(&self, rung: usize) -> Option<&RateWindow> {
        self.encoded_rates.get(rung)
    }

    pub fn cache(&self) -> &CacheDetector {
        &self.cache
    }

    pub fn improvement(&self) -> &ImprovementTracker {
        &self.improvement
    }

    /// Back to Buffering with an empty fullness history (after a seek).
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn reset_for_seek(&mut self) -> bool {
        self.fullness.reset();
        let changed = self.state != DownloadState::Buffering;
        self.state = DownloadState::Buffering;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chunks_seed_cache_baseline() {
        let options = HeuristicsOptions::default();
        let mut cache = CacheDetector::default();
        assert!(!cache.classify(2_000_000.0, &options));
        assert!((cache.threshold_bps() - 6_000_000.0).abs() < 1.0);
        assert!(!cache.classify(3_000_000.0, &options));
        assert!((cache.baseline_bps() - 3_000_000.0).abs() < 1.0);
        assert!((cache.threshold_bps() - 9_000_000.0).abs() < 1.0);
        assert!(cache.classify(9_000_000.0, &options));
        assert!(cache.last_was_cache());
        assert!(!cache.classify(4_000_000.0, &options));
        assert!((cache.baseline_bps() - 3_000_000.0).abs() < 1.0);
    }

    #[test]
    fn cache_threshold_has_floor() {
        let options = HeuristicsOptions::default();
        let mut cache = CacheDetector::default();
        cache.classify(100_000.0, &options);
        assert!((cache.threshold_bps() - options.min_cache_bandwidth_bps).abs() < 1.0);
        assert!(!cache.classify(400_000.0, &options));
    }

    #[test]
    fn improvement_back_off_doubles_and_caps() {
        let mut tracker = ImprovementTracker::new(Duration::from_secs(10));
        assert!(!tracker.is_ready());
        tracker.record(Duration::from_secs(10));
        assert!(tracker.is_ready());
        tracker.attempted(true);
        assert!(!tracker.is_ready());
        tracker.record(Duration::from_secs(4));
        assert!(tracker.stepped_down(Duration::from_secs(15)));
        assert_eq!(tracker.interval(), Duration::from_secs(15));
        assert!(!tracker.stepped_down(Duration::from_secs(15)));
        tracker.reset(Duration::from_secs(10));
        assert_eq!(tracker.interval(), Duration::from_secs(10));
    }
}
