//! Error types for Project Horizon.

use thiserror::Error;

use crate::coords::ChunkCoord;

/// Top-level error type for Horizon operations.
#[derive(Debug, Error)]
pub enum HorizonError {
    /// Terrain synthesis errors
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Packet send errors
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while producing a fake chunk payload.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Source data was present but unusable
    #[error("Malformed source data at {coord}: {reason}")]
    MalformedSource {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// What was wrong with it
        reason: String,
    },

    /// The backing world store could not be read
    #[error("Source read failed at {coord}: {reason}")]
    SourceUnavailable {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Underlying failure
        reason: String,
    },

    /// The worker pool has shut down
    #[error("Synthesis worker pool unavailable")]
    WorkerUnavailable,

    /// The worker queue is full; retry next tick
    #[error("Synthesis queue full")]
    QueueFull,
}

/// Errors raised by the host when emitting packets.
#[derive(Debug, Error)]
pub enum SendError {
    /// Connection is no longer online
    #[error("Connection closed")]
    ConnectionClosed,

    /// Real chunk could not be fetched from the world
    #[error("Fetch failed at {coord}: {reason}")]
    FetchFailed {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Underlying failure
        reason: String,
    },

    /// Transport-level failure
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Result type alias for Horizon operations.
pub type HorizonResult<T> = Result<T, HorizonError>;
