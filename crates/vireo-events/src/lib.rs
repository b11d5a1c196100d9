#![forbid(unsafe_code)]

//! Outward events of the vireo streaming engine.
//!
//! Every component gets a cloned [`EventBus`] and publishes its own sub-enum
//! ([`AbrEvent`], [`SourceEvent`]). Subscribers receive the unified [`Event`]
//! on their own thread or task.

mod abr;
mod bus;
mod dedup;
mod event;
mod source;

pub use abr::AbrEvent;
pub use bus::EventBus;
pub use dedup::{BitrateChange, BitrateTracker};
pub use event::Event;
pub use source::SourceEvent;
