//! Stream and chunk data model for adaptive streaming.
//!
//! This crate owns everything the ABR engine knows about the presentation:
//!
//! - **Manifest ingestion**: [`Manifest::from_info`] validates parser output,
//!   sorts bitrate ladders and computes chunk start times.
//! - **Chunks**: [`Chunk`] tracks the download/parse lifecycle of one time slice
//!   of one stream. The transport writes into it from its own thread.
//! - **Chunk sequences**: [`ChunkSequence`] is the per-stream ordered chunk list
//!   with a single read cursor and buffer accounting.
//! - **Ad insertion points**: [`AdInsertionPoints`] is the shared, externally
//!   populated set of ad pauses.
//! - **Collaborator contracts**: [`ManifestParser`], [`ChunkParserFactory`],
//!   [`UrlGenerator`] and [`Transport`] are implemented outside this workspace.
//!   [`TemplateUrlGenerator`] is the canonical URL generator.

#![forbid(unsafe_code)]

mod ad;
mod chunk;
mod error;
mod manifest;
mod sequence;
mod traits;
mod types;
mod url_template;

pub use ad::{AdInsertionPoint, AdInsertionPoints};
pub use chunk::Chunk;
pub use error::{MediaError, MediaResult};
pub use manifest::{
    ChunkDescriptor, Manifest, ManifestInfo, QualityLevel, StreamDescriptor, StreamInfo,
};
pub use sequence::ChunkSequence;
#[cfg(any(test, feature = "test-utils"))]
pub use traits::{MockTransport, MockUrlGenerator};
pub use traits::{
    ChunkParser, ChunkParserFactory, ChunkRequestInfo, CompletionHandler, DownloadRequest,
    ManifestParser, Transport, UrlGenerator,
};
pub use types::{ChunkState, Frame, MediaKind};
pub use url_template::TemplateUrlGenerator;
