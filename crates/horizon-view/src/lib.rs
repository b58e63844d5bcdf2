//! # Horizon View
//!
//! Per-connection side of the extended-view-distance engine.
//!
//! This crate handles:
//! - View shapes and per-connection visibility sets with deltas
//! - Connection view state (radii, movement, counters, sent tracking)
//! - Global and per-connection send budgets
//! - Collaborator traits for the authoritative host
//! - Background synthesis workers
//! - The dispatch scheduler and the top-level [`ViewEngine`]
//! - TOML configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod budget;
pub mod config;
pub mod connection;
pub mod engine;
pub mod host;
pub mod scheduler;
pub mod shape;
pub mod visibility;
pub mod worker;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::budget::*;
    pub use crate::config::*;
    pub use crate::connection::*;
    pub use crate::engine::*;
    pub use crate::host::*;
    pub use crate::scheduler::*;
    pub use crate::shape::*;
    pub use crate::visibility::*;
    pub use crate::worker::*;
}

pub use prelude::*;
