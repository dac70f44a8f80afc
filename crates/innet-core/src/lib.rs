//! innet-core — wire format, chunking, continuation records, and config.
//! All other innet crates depend on this one.

pub mod config;
pub mod continuation;
pub mod fragment;
pub mod wire;

pub use continuation::{Continuation, ContinuationError};
pub use fragment::{check, defragment, fragment, reassemble, Chunk, Fragmented, SequenceError};
pub use wire::{FormatError, MessageType, ServiceHeader};
