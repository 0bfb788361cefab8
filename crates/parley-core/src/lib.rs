//! parley-core — wire format and configuration shared by every Parley crate.
//! All other Parley crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{decode, ChunkFrame, ChunkKind, DecodeError, Frame};
