//! In-memory host with players walking in straight lines.

use horizon_common::{BlockPosition, ChunkCoord, ConnectionId, SendError, WorldId};
use horizon_view::HostBridge;
use horizon_world::ChunkColumn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A simulated player.
#[derive(Debug, Clone)]
pub struct SimPlayer {
    /// Connection of this player
    pub id: ConnectionId,
    /// World the player is in
    pub world: WorldId,
    /// Current position
    pub position: BlockPosition,
    /// Blocks moved per step along x and z
    pub heading: (f64, f64),
}

/// Host that accepts every packet and counts it.
#[derive(Debug)]
pub struct SimulatedHost {
    seed: i64,
    authoritative_radius: i32,
    players: Mutex<Vec<SimPlayer>>,
    forwarded: AtomicU64,
    fake_sent: AtomicU64,
    unloaded: AtomicU64,
    bytes: AtomicU64,
}

impl SimulatedHost {
    /// Creates a host serving `authoritative_radius` chunks itself.
    pub fn new(seed: i64, authoritative_radius: i32) -> Self {
        Self {
            seed,
            authoritative_radius,
            players: Mutex::new(Vec::new()),
            forwarded: AtomicU64::new(0),
            fake_sent: AtomicU64::new(0),
            unloaded: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Adds `count` players spread around the origin, each walking outward.
    pub fn spawn_players(&self, world: &WorldId, count: u32, speed: f64) -> Vec<SimPlayer> {
        let mut players = self.players.lock();
        for i in 0..count {
            let angle = f64::from(i) * std::f64::consts::TAU / f64::from(count.max(1));
            let (sin, cos) = angle.sin_cos();
            players.push(SimPlayer {
                id: ConnectionId::next(),
                world: world.clone(),
                position: BlockPosition::new(cos * 64.0, 70.0, sin * 64.0),
                heading: (cos * speed, sin * speed),
            });
        }
        players.clone()
    }

    /// Moves every player one step; returns the new positions.
    pub fn step(&self) -> Vec<SimPlayer> {
        let mut players = self.players.lock();
        for player in players.iter_mut() {
            player.position.x += player.heading.0;
            player.position.z += player.heading.1;
        }
        players.clone()
    }

    /// Totals as (forwarded, fake, unloaded, bytes).
    pub fn totals(&self) -> (u64, u64, u64, u64) {
        (
            self.forwarded.load(Ordering::Relaxed),
            self.fake_sent.load(Ordering::Relaxed),
            self.unloaded.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }

    fn is_known(&self, connection: ConnectionId) -> bool {
        self.players.lock().iter().any(|p| p.id == connection)
    }
}

impl HostBridge for SimulatedHost {
    fn authoritative_radius(&self, connection: ConnectionId) -> Option<i32> {
        self.is_known(connection).then_some(self.authoritative_radius)
    }

    fn is_online(&self, connection: ConnectionId) -> bool {
        self.is_known(connection)
    }

    fn world_seed(&self, _world: &WorldId) -> i64 {
        self.seed
    }

    fn forward_real(
        &self,
        connection: ConnectionId,
        _world: &WorldId,
        _coord: ChunkCoord,
    ) -> Result<u64, SendError> {
        if !self.is_known(connection) {
            return Err(SendError::ConnectionClosed);
        }
        // Roughly what a vanilla chunk packet weighs.
        const REAL_CHUNK_BYTES: u64 = 12_288;
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(REAL_CHUNK_BYTES, Ordering::Relaxed);
        Ok(REAL_CHUNK_BYTES)
    }

    fn send_chunk(&self, connection: ConnectionId, column: &ChunkColumn) -> Result<u64, SendError> {
        if !self.is_known(connection) {
            return Err(SendError::ConnectionClosed);
        }
        let bytes = column.encoded_len();
        self.fake_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(bytes)
    }

    fn unload_chunk(&self, _connection: ConnectionId, _coord: ChunkCoord) -> Result<(), SendError> {
        self.unloaded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
