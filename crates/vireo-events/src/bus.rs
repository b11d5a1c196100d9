#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Fan-out channel for engine notifications.
///
/// The heuristics engine publishes from whichever thread finished a download,
/// the source worker publishes from its own thread. Neither has a runtime, so
/// publishing never awaits. A subscriber sees only events sent after it
/// subscribed, and one that falls `capacity` events behind loses the oldest
/// ones instead of stalling the engine.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventBus {
    /// Backlog kept for each subscriber when nothing else is configured.
    pub const DEFAULT_CAPACITY: usize = 64;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Send `event` to every current subscriber, returning how many got it.
    pub fn publish<E: Into<Event>>(&self, event: E) -> usize {
        self.tx.send(event.into()).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use rstest::rstest;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;
    use crate::{AbrEvent, BitrateTracker, SourceEvent};

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn closing_without_listeners_reaches_nobody() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(SourceEvent::Closed), 0);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(4096, 4096)]
    fn capacity_is_at_least_one(#[case] requested: usize, #[case] expected: usize) {
        assert_eq!(EventBus::new(requested).capacity(), expected);
    }

    #[test]
    fn engine_and_source_events_arrive_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(AbrEvent::BufferingStarted { stream: 0 });
        bus.publish(SourceEvent::SeekCompleted {
            position: Duration::from_secs(12),
        });
        bus.publish(AbrEvent::BufferingDone { stream: 0 });

        assert_eq!(
            drain(&mut rx),
            vec![
                Event::Abr(AbrEvent::BufferingStarted { stream: 0 }),
                Event::Source(SourceEvent::SeekCompleted {
                    position: Duration::from_secs(12)
                }),
                Event::Abr(AbrEvent::BufferingDone { stream: 0 }),
            ]
        );
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(16);
        let mut early = bus.subscribe();
        bus.publish(SourceEvent::Opened {
            streams: 2,
            duration: Duration::from_secs(40),
        });
        let mut late = bus.subscribe();
        assert_eq!(bus.publish(SourceEvent::EndOfStream { stream: 1 }), 2);

        assert_eq!(drain(&mut early).len(), 2);
        assert_eq!(
            drain(&mut late),
            vec![Event::Source(SourceEvent::EndOfStream { stream: 1 })]
        );
    }

    #[test]
    fn tracker_gates_bitrate_notifications() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut tracker = BitrateTracker::new();
        for bitrate in [300_000, 300_000, 750_000, 750_000, 300_000] {
            if let Some(change) = tracker.update(0, bitrate) {
                bus.publish(AbrEvent::DownloadBitrateChanged {
                    stream: change.stream,
                    from: change.from,
                    to: change.to,
                });
            }
        }

        let targets: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::Abr(AbrEvent::DownloadBitrateChanged { to, .. }) => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![300_000, 750_000, 300_000]);
    }

    #[test]
    fn slow_listener_loses_oldest_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for stream in 0..5 {
            bus.publish(AbrEvent::BufferingStarted { stream });
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Lagged(3)));
        assert_eq!(
            rx.try_recv(),
            Ok(Event::Abr(AbrEvent::BufferingStarted { stream: 3 }))
        );
    }

    #[tokio::test]
    async fn worker_thread_events_reach_async_listener() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let worker = bus.clone();
        thread::spawn(move || {
            worker.publish(SourceEvent::ChunkSkipped {
                stream: 0,
                chunk: 7,
            });
            drop(worker);
        })
        .join()
        .unwrap();
        drop(bus);

        assert_eq!(
            rx.recv().await.unwrap(),
            Event::Source(SourceEvent::ChunkSkipped {
                stream: 0,
                chunk: 7
            })
        );
        assert_eq!(rx.recv().await, Err(RecvError::Closed));
    }
}
