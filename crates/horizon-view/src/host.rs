//! Collaborator interfaces the engine calls into.
//!
//! The engine never talks to a network or a world store directly. Every
//! outside effect goes through these traits, bundled in an
//! [`EngineContext`] handed to the components that need them.

use horizon_common::{ChunkCoord, Clock, ConnectionId, SendError, SynthesisError, WorldId};
use horizon_world::{ChunkColumn, SourceChunk};
use std::fmt;
use std::sync::Arc;

/// The authoritative server as seen by the engine.
///
/// Calls happen on the tick thread only.
pub trait HostBridge: Send + Sync {
    /// Radius the server itself keeps resident for `connection`, or `None`
    /// if the connection is unknown to it.
    fn authoritative_radius(&self, connection: ConnectionId) -> Option<i32>;

    /// Whether `connection` can still receive packets.
    fn is_online(&self, connection: ConnectionId) -> bool;

    /// Seed of `world`.
    fn world_seed(&self, world: &WorldId) -> i64;

    /// Fetches the real chunk and sends it unmodified; returns bytes sent.
    fn forward_real(
        &self,
        connection: ConnectionId,
        world: &WorldId,
        coord: ChunkCoord,
    ) -> Result<u64, SendError>;

    /// Sends a fake column; returns bytes sent.
    fn send_chunk(&self, connection: ConnectionId, column: &ChunkColumn) -> Result<u64, SendError>;

    /// Tells the client to drop `coord`.
    fn unload_chunk(&self, connection: ConnectionId, coord: ChunkCoord) -> Result<(), SendError>;
}

/// Resolves a connection's radius ceiling.
pub trait PermissionSource: Send + Sync {
    /// Highest radius `connection` may use, or `None` for no extra limit.
    fn max_radius(&self, connection: ConnectionId) -> Option<i32>;
}

/// No per-connection ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl PermissionSource for Unrestricted {
    fn max_radius(&self, _connection: ConnectionId) -> Option<i32> {
        None
    }
}

/// Read access to partially generated real chunks.
///
/// Called from synthesis workers.
pub trait ChunkSource: Send + Sync {
    /// Whatever is known about `coord` without generating it.
    fn read_partial(
        &self,
        world: &WorldId,
        coord: ChunkCoord,
    ) -> Result<Option<SourceChunk>, SynthesisError>;
}

/// Source that knows nothing; every fake chunk is purely synthesized.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

impl ChunkSource for NoSource {
    fn read_partial(
        &self,
        _world: &WorldId,
        _coord: ChunkCoord,
    ) -> Result<Option<SourceChunk>, SynthesisError> {
        Ok(None)
    }
}

/// Handles to every collaborator.
#[derive(Clone)]
pub struct EngineContext {
    /// Authoritative server
    pub host: Arc<dyn HostBridge>,
    /// Radius ceilings
    pub permissions: Arc<dyn PermissionSource>,
    /// Partial real chunks
    pub source: Arc<dyn ChunkSource>,
    /// Time
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Context with no permission ceiling and no chunk source.
    #[must_use]
    pub fn new(host: Arc<dyn HostBridge>, clock: Arc<dyn Clock>) -> Self {
        Self {
            host,
            permissions: Arc::new(Unrestricted),
            source: Arc::new(NoSource),
            clock,
        }
    }

    /// Replaces the permission source.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionSource>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Replaces the chunk source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ChunkSource>) -> Self {
        self.source = source;
        self
    }

    /// Current time in milliseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext").finish_non_exhaustive()
    }
}
