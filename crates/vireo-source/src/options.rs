use std::time::Duration;

use vireo_abr::HeuristicsOptions;
use vireo_events::EventBus;

/// Source controller configuration.
#[derive(Clone, Debug)]
pub struct SourceOptions {
    /// Sleep between two polls of a chunk that is not downloaded yet.
    pub poll_interval: Duration,
    /// Misses after which a chunk is skipped while the host is playing.
    pub playing_miss_threshold: u32,
    /// Misses after which a chunk is skipped while playback is paused.
    pub paused_miss_threshold: u32,
    /// Consecutive skipped chunks a stream may have before the session fails.
    pub max_consecutive_skips: u32,
    /// Capacity of the event bus created by [`crate::SourceController::with_transport`].
    pub event_capacity: usize,
    pub heuristics: HeuristicsOptions,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            playing_miss_threshold: 500,
            paused_miss_threshold: 3000,
            max_consecutive_skips: 3,
            event_capacity: EventBus::DEFAULT_CAPACITY,
            heuristics: HeuristicsOptions::default(),
        }
    }
}

impl SourceOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_miss_thresholds(mut self, playing: u32, paused: u32) -> Self {
        self.playing_miss_threshold = playing.max(1);
        self.paused_miss_threshold = paused.max(1);
        self
    }

    pub fn with_max_consecutive_skips(mut self, skips: u32) -> Self {
        self.max_consecutive_skips = skips;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_heuristics(mut self, heuristics: HeuristicsOptions) -> Self {
        self.heuristics = heuristics;
        self
    }

    pub(crate) fn miss_threshold(&self, paused: bool) -> u32 {
        if paused {
            self.paused_miss_threshold
        } else {
            self.playing_miss_threshold
        }
    }
}
