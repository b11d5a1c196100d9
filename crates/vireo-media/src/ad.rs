use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::RwLock;

/// An advertisement break in the presentation timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdInsertionPoint {
    pub timestamp: Duration,
    pub duration: Duration,
}

impl AdInsertionPoint {
    pub fn new(timestamp: Duration, duration: Duration) -> Self {
        Self {
            timestamp,
            duration,
        }
    }
}

/// Shared, externally populated set of ad insertion points.
///
/// Points are kept sorted by timestamp. Every mutation raises a "changed"
/// flag that dependent caches consume with [`AdInsertionPoints::take_changed`].
#[derive(Debug, Default)]
pub struct AdInsertionPoints {
    points: RwLock<Vec<AdInsertionPoint>>,
    changed: AtomicBool,
}

impl AdInsertionPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a point. Exact duplicates are ignored.
    pub fn add(&self, point: AdInsertionPoint) {
        let mut points = self.points.write();
        if let Err(pos) = points.binary_search(&point) {
            points.insert(pos, point);
            self.changed.store(true, Ordering::Release);
        }
    }

    pub fn extend<I: IntoIterator<Item = AdInsertionPoint>>(&self, iter: I) {
        for point in iter {
            self.add(point);
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    /// First point whose timestamp is at or after `position`.
    pub fn nearest_at_or_after(&self, position: Duration) -> Option<AdInsertionPoint> {
        let points = self.points.read();
        let idx = points.partition_point(|p| p.timestamp < position);
        points.get(idx).copied()
    }

    /// Consume the "changed" flag.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> Vec<AdInsertionPoint> {
        self.points.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn points() -> AdInsertionPoints {
        let set = AdInsertionPoints::new();
        set.extend([
            AdInsertionPoint::new(secs(60), secs(15)),
            AdInsertionPoint::new(secs(10), secs(30)),
            AdInsertionPoint::new(secs(120), secs(30)),
        ]);
        set
    }

    #[rstest]
    #[case(0, Some(10))]
    #[case(10, Some(10))]
    #[case(11, Some(60))]
    #[case(120, Some(120))]
    #[case(121, None)]
    fn nearest_point(#[case] at: u64, #[case] expected: Option<u64>) {
        let set = points();
        assert_eq!(
            set.nearest_at_or_after(secs(at)).map(|p| p.timestamp),
            expected.map(secs)
        );
    }

    #[test]
    fn kept_sorted_and_deduplicated() {
        let set = points();
        set.add(AdInsertionPoint::new(secs(10), secs(30)));
        let snapshot = set.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn changed_flag_is_consumed() {
        let set = points();
        assert!(set.take_changed());
        assert!(!set.take_changed());
        set.add(AdInsertionPoint::new(secs(10), secs(30)));
        assert!(!set.take_changed());
        set.add(AdInsertionPoint::new(secs(300), secs(30)));
        assert!(set.take_changed());
    }
}
