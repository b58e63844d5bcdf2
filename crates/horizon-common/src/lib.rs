//! # Horizon Common
//!
//! Common types, utilities, and shared abstractions for Project Horizon.
//!
//! This crate provides foundational types used across all Horizon subsystems:
//! - Coordinate types (chunk, region, block position) and 64-bit chunk keys
//! - ID types (ConnectionId, WorldId)
//! - Clock abstraction for TTLs and cooldowns
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod clock;
pub mod coords;
pub mod error;
pub mod ids;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
}

pub use prelude::*;
