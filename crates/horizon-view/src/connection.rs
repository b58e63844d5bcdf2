//! Per-connection view state.

use ahash::AHashSet;
use dashmap::DashMap;
use horizon_common::{BlockPosition, ChunkCoord, ConnectionId, WorldId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::visibility::VisibilityMap;

/// Live connections, each behind its own lock.
pub type ConnectionTable = DashMap<ConnectionId, Arc<Mutex<ConnectionViewState>>>;

/// Where a connection is in the dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DispatchState {
    /// Nothing left to send
    #[default]
    Idle,
    /// Coordinates are being sent this tick
    Sending,
    /// Global budget ran out; resumes next tick
    WaitingForBudget,
}

/// Lifetime send counters, readable without locking the connection.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    chunks_sent: AtomicU64,
    fake_chunks_sent: AtomicU64,
    bytes_used: AtomicU64,
}

impl ConnectionCounters {
    /// Records one delivered chunk.
    pub fn record(&self, fake: bool, bytes: u64) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        if fake {
            self.fake_chunks_sent.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_used.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Real and fake chunks delivered.
    #[must_use]
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent.load(Ordering::Relaxed)
    }

    /// Fake chunks delivered.
    #[must_use]
    pub fn fake_chunks_sent(&self) -> u64 {
        self.fake_chunks_sent.load(Ordering::Relaxed)
    }

    /// Payload bytes delivered.
    #[must_use]
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }
}

/// Serializable snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatistics {
    /// Raw connection ID
    pub connection: u64,
    /// World name
    pub world: String,
    /// Requested radius
    pub target_radius: i32,
    /// Radius in effect
    pub current_radius: i32,
    /// Permission ceiling
    pub max_allowed_radius: i32,
    /// Fake chunks allowed
    pub fake_enabled: bool,
    /// Moving faster than the fast threshold
    pub moving_fast: bool,
    /// Left waiting by global budget exhaustion
    pub waiting_for_chunks: bool,
    /// Chunks delivered
    pub chunks_sent: u64,
    /// Fake chunks delivered
    pub fake_chunks_sent: u64,
    /// Payload bytes delivered
    pub bytes_used: u64,
    /// Chunks currently marked sent
    pub sent_chunks: usize,
    /// Chunks queued for dispatch
    pub pending_chunks: usize,
    /// Visible chunks beyond the fake start distance
    pub fake_labelled_chunks: usize,
}

/// Everything the engine tracks about one connection.
#[derive(Debug)]
pub struct ConnectionViewState {
    id: ConnectionId,
    world: WorldId,
    target_radius: i32,
    current_radius: i32,
    max_allowed_radius: i32,
    fake_enabled: bool,
    moving_fast: bool,
    waiting_for_chunks: bool,
    dispatch_state: DispatchState,
    force_update: bool,
    authoritative_radius: Option<i32>,
    counters: Arc<ConnectionCounters>,
    last_position: Option<BlockPosition>,
    last_move_timestamp: u64,
    last_permission_check: Option<u64>,
    visibility: VisibilityMap,
    sent: AHashSet<ChunkCoord>,
    pending: VecDeque<ChunkCoord>,
    queued: AHashSet<ChunkCoord>,
    awaiting: AHashSet<ChunkCoord>,
}

impl ConnectionViewState {
    /// Creates state for a freshly joined connection.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        world: WorldId,
        target_radius: i32,
        max_allowed_radius: i32,
        fake_enabled: bool,
        fake_start: i32,
    ) -> Self {
        Self {
            id,
            world,
            target_radius,
            current_radius: target_radius.min(max_allowed_radius),
            max_allowed_radius,
            fake_enabled,
            moving_fast: false,
            waiting_for_chunks: false,
            dispatch_state: DispatchState::Idle,
            force_update: true,
            authoritative_radius: None,
            counters: Arc::new(ConnectionCounters::default()),
            last_position: None,
            last_move_timestamp: 0,
            last_permission_check: None,
            visibility: VisibilityMap::new(fake_start),
            sent: AHashSet::new(),
            pending: VecDeque::new(),
            queued: AHashSet::new(),
            awaiting: AHashSet::new(),
        }
    }

    /// Connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current world.
    #[must_use]
    pub const fn world(&self) -> &WorldId {
        &self.world
    }

    /// Moves the connection to another world.
    pub fn set_world(&mut self, world: WorldId) {
        if self.world != world {
            self.world = world;
            self.force_update = true;
        }
    }

    /// Requested radius.
    #[must_use]
    pub const fn target_radius(&self) -> i32 {
        self.target_radius
    }

    /// Sets the requested radius; callers clamp it first.
    pub fn set_target_radius(&mut self, radius: i32) {
        if self.target_radius != radius {
            self.target_radius = radius;
            self.force_update = true;
        }
    }

    /// Radius the visibility set was last computed with.
    #[must_use]
    pub const fn current_radius(&self) -> i32 {
        self.current_radius
    }

    /// Radius the next update should use.
    #[must_use]
    pub fn effective_radius(&self) -> i32 {
        self.target_radius.min(self.max_allowed_radius).max(0)
    }

    /// Permission ceiling.
    #[must_use]
    pub const fn max_allowed_radius(&self) -> i32 {
        self.max_allowed_radius
    }

    /// Applies a freshly read permission ceiling.
    ///
    /// Returns `true` when the target radius had to be clamped; the next
    /// tick then recomputes visibility immediately.
    pub fn apply_permission_ceiling(&mut self, ceiling: i32) -> bool {
        self.max_allowed_radius = ceiling;
        if self.target_radius > ceiling {
            self.target_radius = ceiling;
            self.force_update = true;
            return true;
        }
        false
    }

    /// Whether the permission cooldown has elapsed.
    #[must_use]
    pub fn permission_check_due(&self, now: u64, interval_millis: u64) -> bool {
        self.last_permission_check
            .map_or(true, |last| now.saturating_sub(last) >= interval_millis)
    }

    /// Records a permission check at `now`.
    pub fn mark_permission_checked(&mut self, now: u64) {
        self.last_permission_check = Some(now);
    }

    /// Fake chunks allowed for this connection.
    #[must_use]
    pub const fn fake_enabled(&self) -> bool {
        self.fake_enabled
    }

    /// Enables or disables fake chunks.
    pub fn set_fake_enabled(&mut self, enabled: bool) {
        if self.fake_enabled != enabled {
            self.fake_enabled = enabled;
            self.force_update = true;
        }
    }

    /// Moving faster than the fast threshold.
    #[must_use]
    pub const fn moving_fast(&self) -> bool {
        self.moving_fast
    }

    /// Records a movement sample and updates the fast-movement flag.
    ///
    /// Returns the horizontal speed in blocks per second, or `None` for the
    /// first sample or a zero time step.
    pub fn record_movement(
        &mut self,
        position: BlockPosition,
        now: u64,
        fast_threshold: f64,
    ) -> Option<f64> {
        let speed = self.last_position.and_then(|last| {
            let elapsed = now.saturating_sub(self.last_move_timestamp);
            (elapsed > 0)
                .then(|| last.horizontal_distance(position) / (elapsed as f64 / 1_000.0))
        });
        if let Some(speed) = speed {
            self.moving_fast = speed > fast_threshold;
        }
        self.last_position = Some(position);
        self.last_move_timestamp = now;
        speed
    }

    /// Last reported position.
    #[must_use]
    pub const fn last_position(&self) -> Option<BlockPosition> {
        self.last_position
    }

    /// Time of the last movement sample.
    #[must_use]
    pub const fn last_move_timestamp(&self) -> u64 {
        self.last_move_timestamp
    }

    /// Left waiting by global budget exhaustion.
    #[must_use]
    pub const fn waiting_for_chunks(&self) -> bool {
        self.waiting_for_chunks
    }

    /// Dispatch state.
    #[must_use]
    pub const fn dispatch_state(&self) -> DispatchState {
        self.dispatch_state
    }

    /// Sets the dispatch state; `WaitingForBudget` also raises the waiting flag.
    pub fn set_dispatch_state(&mut self, state: DispatchState) {
        self.dispatch_state = state;
        self.waiting_for_chunks = state == DispatchState::WaitingForBudget;
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<ConnectionCounters> {
        Arc::clone(&self.counters)
    }

    /// Records the host's radius for this tick.
    ///
    /// A change forces the next update, so coordinates skipped under the old
    /// classification are queued again. Returns whether it changed.
    pub fn observe_authoritative_radius(&mut self, radius: i32) -> bool {
        let changed = self.authoritative_radius.is_some_and(|last| last != radius);
        self.authoritative_radius = Some(radius);
        if changed {
            self.force_update = true;
        }
        changed
    }

    /// Takes the pending forced-update flag.
    pub fn take_force_update(&mut self) -> bool {
        std::mem::take(&mut self.force_update)
    }

    /// Visibility map.
    #[must_use]
    pub const fn visibility(&self) -> &VisibilityMap {
        &self.visibility
    }

    /// Visibility map, mutably; records the radius used.
    pub fn visibility_mut(&mut self) -> &mut VisibilityMap {
        self.current_radius = self.effective_radius();
        &mut self.visibility
    }

    /// Whether `coord` was delivered.
    #[must_use]
    pub fn is_sent(&self, coord: ChunkCoord) -> bool {
        self.sent.contains(&coord)
    }

    /// Marks `coord` delivered and counts it.
    pub fn mark_sent(&mut self, coord: ChunkCoord, fake: bool, bytes: u64) {
        self.awaiting.remove(&coord);
        if self.sent.insert(coord) {
            self.counters.record(fake, bytes);
        }
    }

    /// Clears the sent marker; `true` if it was set.
    pub fn unmark_sent(&mut self, coord: ChunkCoord) -> bool {
        self.sent.remove(&coord)
    }

    /// Number of delivered coordinates.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    /// Queues `coord` unless already sent or queued.
    pub fn enqueue(&mut self, coord: ChunkCoord) -> bool {
        if self.sent.contains(&coord) || !self.queued.insert(coord) {
            return false;
        }
        self.pending.push_back(coord);
        true
    }

    /// Puts `coord` back at the front of the queue.
    pub fn requeue_front(&mut self, coord: ChunkCoord) {
        if !self.sent.contains(&coord) && self.queued.insert(coord) {
            self.pending.push_front(coord);
        }
    }

    /// Takes the next queued coordinate.
    pub fn pop_pending(&mut self) -> Option<ChunkCoord> {
        let coord = self.pending.pop_front()?;
        self.queued.remove(&coord);
        Some(coord)
    }

    /// Drops a queued coordinate; `true` if it was queued.
    pub fn dequeue(&mut self, coord: ChunkCoord) -> bool {
        if self.queued.remove(&coord) {
            self.pending.retain(|c| *c != coord);
            return true;
        }
        false
    }

    /// Number of queued coordinates.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `coord` is queued.
    #[must_use]
    pub fn is_pending(&self, coord: ChunkCoord) -> bool {
        self.queued.contains(&coord)
    }

    /// Records that `coord` waits on a synthesis job.
    pub fn await_synthesis(&mut self, coord: ChunkCoord) -> bool {
        self.awaiting.insert(coord)
    }

    /// Clears the synthesis wait for `coord`; `true` if it was set.
    pub fn stop_awaiting(&mut self, coord: ChunkCoord) -> bool {
        self.awaiting.remove(&coord)
    }

    /// Whether `coord` waits on a synthesis job.
    #[must_use]
    pub fn is_awaiting(&self, coord: ChunkCoord) -> bool {
        self.awaiting.contains(&coord)
    }

    /// Drops queued, awaited and sent coordinates without unloading.
    pub fn clear_tracking(&mut self) {
        self.pending.clear();
        self.queued.clear();
        self.awaiting.clear();
        self.sent.clear();
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn statistics(&self) -> ConnectionStatistics {
        ConnectionStatistics {
            connection: self.id.raw(),
            world: self.world.name().to_string(),
            target_radius: self.target_radius,
            current_radius: self.current_radius,
            max_allowed_radius: self.max_allowed_radius,
            fake_enabled: self.fake_enabled,
            moving_fast: self.moving_fast,
            waiting_for_chunks: self.waiting_for_chunks,
            chunks_sent: self.counters.chunks_sent(),
            fake_chunks_sent: self.counters.fake_chunks_sent(),
            bytes_used: self.counters.bytes_used(),
            sent_chunks: self.sent.len(),
            pending_chunks: self.pending.len(),
            fake_labelled_chunks: self.visibility.fake_labelled(),
        }
    }
}
