//! In-memory host for tests.

use ahash::AHashSet;
use horizon_common::{ChunkCoord, ConnectionId, SendError, WorldId};
use horizon_world::ChunkColumn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::host::HostBridge;

/// Records every host call.
#[derive(Debug, Default)]
pub struct RecordingHost {
    authoritative_radius: AtomicI32,
    offline: Mutex<AHashSet<ConnectionId>>,
    forwarded: Mutex<Vec<(u64, ChunkCoord)>>,
    fake_sent: Mutex<Vec<(u64, ChunkCoord)>>,
    unloaded: Mutex<Vec<(u64, ChunkCoord)>>,
    forward_failures: Mutex<Vec<SendError>>,
}

impl RecordingHost {
    pub fn new(authoritative_radius: i32) -> Self {
        Self {
            authoritative_radius: AtomicI32::new(authoritative_radius),
            ..Self::default()
        }
    }

    pub fn set_authoritative_radius(&self, radius: i32) {
        self.authoritative_radius.store(radius, Ordering::SeqCst);
    }

    pub fn set_online(&self, connection: ConnectionId, online: bool) {
        let mut offline = self.offline.lock();
        if online {
            offline.remove(&connection);
        } else {
            offline.insert(connection);
        }
    }

    pub fn fail_next_forward(&self, error: SendError) {
        self.forward_failures.lock().push(error);
    }

    pub fn forwarded(&self) -> Vec<(u64, ChunkCoord)> {
        self.forwarded.lock().clone()
    }

    pub fn fake_sent(&self) -> Vec<(u64, ChunkCoord)> {
        self.fake_sent.lock().clone()
    }

    pub fn unloaded(&self) -> Vec<(u64, ChunkCoord)> {
        self.unloaded.lock().clone()
    }

    pub fn sent_to(&self, connection: ConnectionId) -> usize {
        let raw = connection.raw();
        let count = |list: &Mutex<Vec<(u64, ChunkCoord)>>| {
            list.lock().iter().filter(|(id, _)| *id == raw).count()
        };
        count(&self.forwarded) + count(&self.fake_sent)
    }
}

impl HostBridge for RecordingHost {
    fn authoritative_radius(&self, connection: ConnectionId) -> Option<i32> {
        self.is_online(connection)
            .then(|| self.authoritative_radius.load(Ordering::SeqCst))
    }

    fn is_online(&self, connection: ConnectionId) -> bool {
        !self.offline.lock().contains(&connection)
    }

    fn world_seed(&self, world: &WorldId) -> i64 {
        world.name().len() as i64
    }

    fn forward_real(
        &self,
        connection: ConnectionId,
        _world: &WorldId,
        coord: ChunkCoord,
    ) -> Result<u64, SendError> {
        if let Some(error) = self.forward_failures.lock().pop() {
            return Err(error);
        }
        self.forwarded.lock().push((connection.raw(), coord));
        Ok(4_096)
    }

    fn send_chunk(&self, connection: ConnectionId, column: &ChunkColumn) -> Result<u64, SendError> {
        if !self.is_online(connection) {
            return Err(SendError::ConnectionClosed);
        }
        self.fake_sent.lock().push((connection.raw(), column.coord));
        Ok(column.encoded_len())
    }

    fn unload_chunk(&self, connection: ConnectionId, coord: ChunkCoord) -> Result<(), SendError> {
        self.unloaded.lock().push((connection.raw(), coord));
        Ok(())
    }
}
