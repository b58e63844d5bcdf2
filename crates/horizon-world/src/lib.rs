//! # Horizon World
//!
//! Terrain and payload side of the extended-view-distance engine.
//!
//! This crate handles:
//! - LSB-first bit packing for palettes and heightmaps
//! - Deterministic terrain synthesis (height, biome, surface material)
//! - The wire-level chunk column model (sections, palettes, heightmaps)
//! - Column synthesis, either pure or seeded from a partially-known real chunk
//! - The regional chunk cache with TTL sweeps and emergency eviction

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod column;
pub mod packing;
pub mod synthesis;
pub mod terrain;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::*;
    pub use crate::column::*;
    pub use crate::packing::*;
    pub use crate::synthesis::*;
    pub use crate::terrain::*;
}

pub use prelude::*;
