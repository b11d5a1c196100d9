use std::time::Duration;

use crate::KernelOptions;

/// Heuristics engine configuration.
///
/// All values are tuning knobs; the defaults reproduce the reference policy.
#[derive(Clone, Debug, PartialEq)]
pub struct HeuristicsOptions {
    /// Trend thresholds shared by every rate window.
    pub kernel: KernelOptions,

    /// Buffer fullness below which Steady steps down.
    pub lower_fullness: Duration,
    /// Buffer fullness above which Steady tries to step up.
    pub upper_fullness: Duration,
    /// Buffer fullness below which Steady drops to the lowest rung.
    pub panic_fullness: Duration,

    /// Safety divisor applied to bandwidth in Buffering.
    pub relative_content_download_speed: f64,
    /// Fraction of bandwidth usable in Buffering.
    pub bandwidth_fraction: f64,
    /// Fraction of buffer fullness usable in Buffering.
    pub fullness_fraction: f64,
    /// Upper bound of a bandwidth sample (bits per second).
    pub max_bandwidth_bps: f64,

    /// Number of initial chunks used to establish the packet-pair baseline.
    pub cache_detection_chunks: usize,
    /// Cache threshold as a multiple of the baseline bandwidth.
    pub cache_bandwidth_factor: f64,
    /// Floor of the cache threshold (bits per second).
    pub min_cache_bandwidth_bps: f64,

    /// Downloaded stream time required between improvement attempts.
    pub min_improvement_interval: Duration,
    /// Cap of the back-off interval after failed improvements.
    pub max_improvement_interval: Duration,

    /// Concurrent downloads per stream.
    pub max_concurrent_downloads: usize,
    /// Buffered time at which a stream stops downloading.
    pub max_buffer: Duration,
    /// Buffered time kept while downloads are paused for an ad.
    pub min_paused_buffer: Duration,

    /// Pause window opens this long before an ad point.
    pub ad_pause_before: Duration,
    /// Pause window closes this long after an ad point.
    pub ad_pause_after: Duration,

    /// Re-download buffered chunks once a higher bitrate is selected.
    pub chunk_replacement: bool,
    /// Minimum distance ahead of playback for a replaced chunk.
    pub replacement_offset: Duration,
}

impl Default for HeuristicsOptions {
    fn default() -> Self {
        Self {
            kernel: KernelOptions::default(),
            lower_fullness: Duration::from_secs(10),
            upper_fullness: Duration::from_secs(20),
            panic_fullness: Duration::from_secs(3),
            relative_content_download_speed: 1.25,
            bandwidth_fraction: 0.8,
            fullness_fraction: 0.5,
            max_bandwidth_bps: 1_000_000_000.0,
            cache_detection_chunks: 2,
            cache_bandwidth_factor: 3.0,
            min_cache_bandwidth_bps: 5_000_000.0,
            min_improvement_interval: Duration::from_secs(10),
            max_improvement_interval: Duration::from_secs(60),
            max_concurrent_downloads: 1,
            max_buffer: Duration::from_secs(30),
            min_paused_buffer: Duration::from_secs(4),
            ad_pause_before: Duration::from_secs(3),
            ad_pause_after: Duration::from_secs(2),
            chunk_replacement: false,
            replacement_offset: Duration::from_secs(10),
        }
    }
}

impl HeuristicsOptions {
    /// Fullness at which Buffering becomes Steady.
    pub fn steady_fullness(&self) -> Duration {
        (self.lower_fullness + self.upper_fullness) / 2
    }

    #[must_use]
    pub fn with_fullness(mut self, panic: Duration, lower: Duration, upper: Duration) -> Self {
        self.panic_fullness = panic;
        self.lower_fullness = lower;
        self.upper_fullness = upper;
        self
    }

    #[must_use]
    pub fn with_max_buffer(mut self, max_buffer: Duration) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max.max(1);
        self
    }

    #[must_use]
    pub fn with_ad_window(mut self, before: Duration, after: Duration) -> Self {
        self.ad_pause_before = before;
        self.ad_pause_after = after;
        self
    }

    #[must_use]
    pub fn with_chunk_replacement(mut self, offset: Duration) -> Self {
        self.chunk_replacement = true;
        self.replacement_offset = offset;
        self
    }
}
