//! Bandwidth/buffer heuristics and download scheduling.
//!
//! ## Features
//!
//! - **Kernel estimator**: [`RateWindow`] smooths buffer fullness, download
//!   bandwidth and per-rung encoded rates and classifies their trend.
//! - **Bitrate selection**: per-stream Buffering/Steady state machine with
//!   cache-hit exclusion, improvement back-off and bitrate-range locking.
//! - **Scheduling**: decides which stream may request its next chunk, honouring
//!   the concurrent-download cap, the buffer ceiling and audio/video tracking.
//! - **Ad pauses**: [`AdPauseCoordinator`] stops downloads around ad breaks.
//!
//! [`HeuristicsEngine`] is the canonical [`Heuristics`] implementation.

#![forbid(unsafe_code)]

mod ad_pause;
mod bitrate;
mod engine;
mod kernel;
mod media_info;
mod options;
mod scheduler;

pub use ad_pause::{AdPauseCoordinator, AdTransition};
pub use bitrate::{DownloadOutcome, DownloadSample};
#[cfg(any(test, feature = "test-utils"))]
pub use engine::MockHeuristics;
pub use engine::{Heuristics, HeuristicsEngine, StreamDiagnostics};
pub use kernel::{KernelOptions, RateWindow};
pub use media_info::{CacheDetector, DownloadState, ImprovementTracker, NetworkMediaInfo};
pub use options::HeuristicsOptions;
pub use scheduler::StreamSchedule;
pub(crate) use scheduler::StreamSlot;
