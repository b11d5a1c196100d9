#![forbid(unsafe_code)]

use crate::{AbrEvent, SourceEvent};

/// Unified engine event.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Heuristics (bitrate selection and scheduling) event.
    Abr(AbrEvent),
    /// Source controller event.
    Source(SourceEvent),
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}

impl From<SourceEvent> for Event {
    fn from(e: SourceEvent) -> Self {
        Self::Source(e)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(AbrEvent::BufferingStarted { stream: 1 }.into(), true)]
    #[case(AbrEvent::DownloadsPaused { ad_timestamp: Duration::from_secs(10) }.into(), true)]
    #[case(SourceEvent::Closed.into(), false)]
    #[case(SourceEvent::EndOfStream { stream: 0 }.into(), false)]
    fn sub_events_convert(#[case] event: Event, #[case] is_abr: bool) {
        assert_eq!(matches!(event, Event::Abr(_)), is_abr);
    }
}
