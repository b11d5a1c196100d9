#![forbid(unsafe_code)]

//! # Vireo
//!
//! Facade crate for the vireo adaptive-bitrate engine.
//!
//! ## Quick start
//!
//! ```ignore
//! use vireo::prelude::*;
//!
//! let controller = SourceController::with_transport(
//!     manifest_parser,
//!     chunk_parsers,
//!     transport,
//!     host,
//!     SourceOptions::default(),
//! )?;
//! controller.open(manifest_bytes, base_url)?;
//! controller.get_sample(0)?;
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod abr {
    pub use vireo_abr::*;
}

pub mod events {
    pub use vireo_events::*;
}

pub mod media {
    pub use vireo_media::*;
}

pub mod source {
    pub use vireo_source::*;
}

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use vireo_abr::{Heuristics, HeuristicsEngine, HeuristicsOptions, StreamDiagnostics};
    pub use vireo_events::{AbrEvent, Event, EventBus, SourceEvent};
    pub use vireo_media::{
        AdInsertionPoint, Chunk, ChunkParser, ChunkParserFactory, CompletionHandler,
        DownloadRequest, Frame, Manifest, ManifestInfo, ManifestParser, MediaError, MediaKind,
        MediaResult, TemplateUrlGenerator, Transport, UrlGenerator,
    };
    pub use vireo_source::{
        MediaHost, Sample, SourceController, SourceError, SourceOptions, SourceResponse,
        SourceResult,
    };
}
