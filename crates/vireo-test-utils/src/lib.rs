#![forbid(unsafe_code)]
#![expect(
    clippy::unwrap_used,
    reason = "fixtures panic on bad input"
)]
#![expect(
    clippy::missing_panics_doc,
    reason = "fixtures are not documented for panics"
)]

//! Shared test utilities for the vireo workspace.

pub mod fixtures;
pub mod parser;
pub mod transport;

pub use fixtures::*;
pub use parser::{CORRUPT_MARKER, FixedFrameParser, FixedFrameParserFactory, StaticManifestParser};
pub use transport::{CompletionMode, RecordingTransport, StartedRequest, payload_len};

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
