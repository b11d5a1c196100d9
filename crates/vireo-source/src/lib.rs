//! Source controller: the single-threaded command/state machine between the
//! host media pipeline and the heuristics engine.
//!
//! ## Features
//!
//! - **Serialized requests**: open, sample, seek, stream switch, diagnostics,
//!   bitrate range and media replacement are queued FIFO and run on one
//!   worker thread.
//! - **Sample delivery**: frames of parsed chunks are handed to the
//!   [`MediaHost`]; chunks still downloading are polled with a bounded sleep
//!   and skipped after too many misses.
//! - **Single failure path**: fatal errors and panics close the session,
//!   answer queued requests and are reported exactly once.

#![forbid(unsafe_code)]

mod command;
mod controller;
mod error;
mod host;
mod options;
mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
mod worker;

pub use command::CommandKind;
pub use controller::{Collaborators, SourceController, SourceState};
pub use error::{SourceError, SourceResult};
pub use host::{MediaHost, Sample, SourceResponse, StreamSummary};
pub use options::SourceOptions;
pub use session::SessionContext;
