//! Shared domain types for Echo: bus payloads, configuration, errors.

pub mod config;
pub mod error;
pub mod event;

pub use error::{Error, Result};
pub use event::{
    BlockReason, EventKind, EventSource, MatchMethod, Narration, NarrationMethod, Priority,
    RawEvent, Response,
};
