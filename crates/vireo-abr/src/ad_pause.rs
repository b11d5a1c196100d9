use std::time::Duration;

use tracing::{debug, trace};
use vireo_media::{AdInsertionPoint, AdInsertionPoints};

/// Pause state change produced by [`AdPauseCoordinator::on_video_sample`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdTransition {
    Paused(AdInsertionPoint),
    Resumed(AdInsertionPoint),
}

/// Pauses downloads around ad insertion points.
///
/// Driven by video sample delivery. The pause window of a point spans
/// `[timestamp - before, timestamp + after)`. A point is handled once playback
/// leaves its window and is never entered again.
#[derive(Clone, Debug)]
pub struct AdPauseCoordinator {
    before: Duration,
    after: Duration,
    cached: Option<AdInsertionPoint>,
    last_handled: Option<Duration>,
    paused: Option<AdInsertionPoint>,
}

impl AdPauseCoordinator {
    pub fn new(before: Duration, after: Duration) -> Self {
        Self {
            before,
            after,
            cached: None,
            last_handled: None,
            paused: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    pub fn paused_at(&self) -> Option<AdInsertionPoint> {
        self.paused
    }

    /// Drop the cached point and leave pause mode (seek).
    ///
    /// Handled points stay handled unless playback moved before them.
    pub fn reset(&mut self, position: Duration) -> Option<AdTransition> {
        self.cached = None;
        if self.last_handled.is_some_and(|ts| ts > position) {
            self.last_handled = None;
        }
        self.paused.take().map(AdTransition::Resumed)
    }

    /// Feed the playback position of a delivered video sample.
    ///
    /// `pausable(until)` reports whether every active stream can play through
    /// `until` from what is already buffered.
    pub fn on_video_sample(
        &mut self,
        position: Duration,
        points: &AdInsertionPoints,
        pausable: impl FnOnce(Duration) -> bool,
    ) -> Option<AdTransition> {
        if let Some(point) = self.paused {
            if position >= point.timestamp + self.after {
                debug!(?position, ad = ?point.timestamp, "ad pause: leaving");
                self.paused = None;
                self.mark_handled(point);
                return Some(AdTransition::Resumed(point));
            }
            return None;
        }

        let changed = points.take_changed();
        let stale = self
            .cached
            .is_none_or(|p| position >= p.timestamp + self.after);
        if changed || stale {
            self.cached = self.lookup(position, points);
            trace!(?position, cached = ?self.cached, changed, "ad pause: refreshed point");
        }
        let point = self.cached?;

        let window_end = point.timestamp + self.after;
        if position >= window_end {
            self.mark_handled(point);
            return None;
        }
        if position + self.before >= point.timestamp && pausable(window_end) {
            debug!(?position, ad = ?point.timestamp, "ad pause: entering");
            self.paused = Some(point);
            return Some(AdTransition::Paused(point));
        }
        None
    }

    fn lookup(&self, position: Duration, points: &AdInsertionPoints) -> Option<AdInsertionPoint> {
        let mut from = position.saturating_sub(self.after);
        loop {
            let point = points.nearest_at_or_after(from)?;
            match self.last_handled {
                Some(handled) if point.timestamp <= handled => {
                    from = point.timestamp + Duration::from_nanos(1);
                }
                _ => return Some(point),
            }
        }
    }

    fn mark_handled(&mut self, point: AdInsertionPoint) {
        self.last_handled = Some(point.timestamp);
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn points(at: &[u64]) -> AdInsertionPoints {
        let set = AdInsertionPoints::new();
        for ts in at {
            set.add(AdInsertionPoint::new(Duration::from_secs(*ts), Duration::from_secs(30)));
        }
        set
    }

    #[test]
    fn pauses_at_t_minus_before_and_resumes_at_t_plus_after_once() {
        let set = points(&[10]);
        let mut coordinator = AdPauseCoordinator::new(secs(3.0), secs(2.0));
        let mut transitions = Vec::new();
        let mut position = 0.0;
        while position < 20.0 {
            if let Some(t) = coordinator.on_video_sample(secs(position), &set, |_| true) {
                transitions.push((position, t));
            }
            position += 0.5;
        }
        let point = AdInsertionPoint::new(secs(10.0), secs(30.0));
        assert_eq!(
            transitions,
            vec![
                (7.0, AdTransition::Paused(point)),
                (12.0, AdTransition::Resumed(point)),
            ]
        );
    }

    #[test]
    fn waits_for_streams_to_become_pausable() {
        let set = points(&[10]);
        let mut coordinator = AdPauseCoordinator::new(secs(3.0), secs(2.0));
        assert_eq!(coordinator.on_video_sample(secs(7.5), &set, |_| false), None);
        let mut until = None;
        let transition = coordinator.on_video_sample(secs(8.0), &set, |u| {
            until = Some(u);
            true
        });
        assert!(matches!(transition, Some(AdTransition::Paused(_))));
        assert_eq!(until, Some(secs(12.0)));
    }

    #[test]
    fn missed_window_is_never_reentered() {
        let set = points(&[10, 40]);
        let mut coordinator = AdPauseCoordinator::new(secs(3.0), secs(2.0));
        for position in [7.0, 9.0, 11.0] {
            assert_eq!(coordinator.on_video_sample(secs(position), &set, |_| false), None);
        }
        assert_eq!(coordinator.on_video_sample(secs(12.0), &set, |_| true), None);
        assert_eq!(coordinator.on_video_sample(secs(11.0), &set, |_| true), None);
        assert!(matches!(
            coordinator.on_video_sample(secs(37.0), &set, |_| true),
            Some(AdTransition::Paused(p)) if p.timestamp == secs(40.0)
        ));
    }

    #[test]
    fn new_point_invalidates_cache() {
        let set = points(&[60]);
        let mut coordinator = AdPauseCoordinator::new(secs(3.0), secs(2.0));
        assert_eq!(coordinator.on_video_sample(secs(5.0), &set, |_| true), None);
        set.add(AdInsertionPoint::new(secs(8.0), secs(15.0)));
        assert!(matches!(
            coordinator.on_video_sample(secs(5.5), &set, |_| true),
            Some(AdTransition::Paused(p)) if p.timestamp == secs(8.0)
        ));
    }

    #[test]
    fn seek_leaves_pause() {
        let set = points(&[10]);
        let mut coordinator = AdPauseCoordinator::new(secs(3.0), secs(2.0));
        coordinator.on_video_sample(secs(8.0), &set, |_| true);
        assert!(coordinator.is_paused());
        assert!(matches!(
            coordinator.reset(secs(0.0)),
            Some(AdTransition::Resumed(_))
        ));
        assert!(!coordinator.is_paused());
    }
}
