use std::collections::HashMap;

/// A per-stream bitrate transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitrateChange {
    pub stream: usize,
    pub from: Option<u64>,
    pub to: u64,
}

/// Remembers the last reported bitrate of every stream so that change
/// notifications only fire when the value actually changes.
#[derive(Clone, Debug, Default)]
pub struct BitrateTracker {
    last: HashMap<usize, u64>,
}

impl BitrateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `bitrate` for `stream`, returning the change if it differs from
    /// the previously recorded value.
    pub fn update(&mut self, stream: usize, bitrate: u64) -> Option<BitrateChange> {
        let from = self.last.insert(stream, bitrate);
        (from != Some(bitrate)).then_some(BitrateChange {
            stream,
            from,
            to: bitrate,
        })
    }

    pub fn get(&self, stream: usize) -> Option<u64> {
        self.last.get(&stream).copied()
    }

    /// Forget a stream (e.g. after it was switched off).
    pub fn forget(&mut self, stream: usize) {
        self.last.remove(&stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_changes_are_reported() {
        let mut tracker = BitrateTracker::new();
        assert_eq!(
            tracker.update(0, 300_000),
            Some(BitrateChange {
                stream: 0,
                from: None,
                to: 300_000
            })
        );
        assert_eq!(tracker.update(0, 300_000), None);
        assert_eq!(
            tracker.update(0, 800_000).map(|c| c.from),
            Some(Some(300_000))
        );
        assert!(tracker.update(1, 300_000).is_some());
        assert_eq!(tracker.get(0), Some(800_000));
    }

    #[test]
    fn forget_reports_again() {
        let mut tracker = BitrateTracker::new();
        tracker.update(2, 64_000);
        tracker.forget(2);
        assert!(tracker.update(2, 64_000).is_some());
    }
}
