//! Per-tick chunk dispatch.
//!
//! The scheduler turns visibility deltas into host calls. Removed
//! coordinates that were delivered are unloaded; new coordinates are queued
//! and drained under two budgets: a global token count shared by every
//! connection for the tick, and a per-connection allowance. Each drained
//! coordinate is classified against the authoritative radius. Real chunks
//! are forwarded, fake chunks come from the world's cache, and cache misses
//! are handed to the synthesis pool. Finished jobs re-enter the queue of
//! every connection waiting on them.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use horizon_common::{ChunkCoord, ConnectionId, SynthesisError, WorldId};
use horizon_world::{ColumnSynthesizer, RegionCache};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::budget::{per_connection_budget, TickBudget};
use crate::connection::{ConnectionTable, ConnectionViewState, DispatchState};
use crate::host::EngineContext;
use crate::visibility::{UpdateKind, VisibilityDelta};
use crate::worker::{SynthesisJob, SynthesisOutcome, SynthesisPool};

/// Synthesis requests a connection may issue per unit of send allowance.
const SYNTHESIS_LOOKAHEAD: u32 = 4;

/// Whether a coordinate is served by the authoritative server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkKind {
    /// Inside the authoritative radius; forwarded unmodified
    Real,
    /// Beyond it; served from the cache or synthesized
    Fake,
}

/// Classifies `coord` against the authoritative radius around `center`.
///
/// A coordinate is real when `dx² + dz² <= r²`, the same metric as a
/// circular view of radius `r`.
#[must_use]
pub const fn classify(center: ChunkCoord, coord: ChunkCoord, authoritative_radius: i32) -> ChunkKind {
    if authoritative_radius < 0 {
        return ChunkKind::Fake;
    }
    let radius = authoritative_radius as i64;
    if center.distance_squared(coord) <= radius * radius {
        ChunkKind::Real
    } else {
        ChunkKind::Fake
    }
}

/// Budget settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Chunks sent per tick across all connections
    pub max_chunks_per_tick: u32,
    /// Base chunks sent per tick for one connection
    pub per_connection_chunks_per_tick: u32,
    /// Ceiling for the waiting boost
    pub waiting_boost_cap: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_chunks_per_tick: 5,
            per_connection_chunks_per_tick: 5,
            waiting_boost_cap: 10,
        }
    }
}

/// Everything one connection's dispatch needs besides its own state.
pub struct DispatchEnv<'a> {
    /// Collaborators
    pub ctx: &'a EngineContext,
    /// Synthesis workers
    pub pool: &'a SynthesisPool,
    /// Cache of the connection's world
    pub cache: &'a Arc<RegionCache>,
    /// Synthesizer for the connection's world
    pub synthesizer: ColumnSynthesizer,
    /// Radius the server keeps resident for the connection
    pub authoritative_radius: i32,
    /// Fake chunks allowed globally, for the world, and for the connection
    pub fake_allowed: bool,
}

/// What one connection's dispatch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Real chunks forwarded
    pub real_sent: u32,
    /// Fake chunks sent
    pub fake_sent: u32,
    /// Unload actions issued
    pub unloaded: u32,
    /// Synthesis jobs submitted
    pub synthesis_requested: u32,
    /// Sends, fetches or unloads that failed
    pub failures: u32,
    /// Left waiting by global budget exhaustion
    pub waiting: bool,
}

impl DispatchReport {
    /// Chunks delivered.
    #[must_use]
    pub const fn sent(&self) -> u32 {
        self.real_sent + self.fake_sent
    }

    fn absorb(&mut self, other: Self) {
        self.real_sent += other.real_sent;
        self.fake_sent += other.fake_sent;
        self.unloaded += other.unloaded;
        self.synthesis_requested += other.synthesis_requested;
        self.failures += other.failures;
        self.waiting |= other.waiting;
    }
}

/// What handling finished synthesis jobs did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Waiting connections whose coordinate was queued for sending
    pub ready: u32,
    /// Waiters dropped because they left, moved on, or went offline
    pub discarded: u32,
    /// Waiters requeued because synthesis failed
    pub failed: u32,
}

/// Lifetime dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatistics {
    /// Real chunks forwarded
    pub real_sent: u64,
    /// Fake chunks sent
    pub fake_sent: u64,
    /// Unload actions issued
    pub unloaded: u64,
    /// Failed host calls
    pub failures: u64,
    /// Synthesis jobs submitted
    pub synthesis_requested: u64,
    /// Requests joined to a job already in flight
    pub synthesis_joined: u64,
    /// Completions nobody could use
    pub completions_discarded: u64,
    /// Times a connection was left waiting for budget
    pub budget_waits: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    real_sent: AtomicU64,
    fake_sent: AtomicU64,
    unloaded: AtomicU64,
    failures: AtomicU64,
    synthesis_requested: AtomicU64,
    synthesis_joined: AtomicU64,
    completions_discarded: AtomicU64,
    budget_waits: AtomicU64,
}

impl DispatchCounters {
    fn add(counter: &AtomicU64, value: u32) {
        if value > 0 {
            counter.fetch_add(u64::from(value), Ordering::Relaxed);
        }
    }

    fn record(&self, report: &DispatchReport) {
        Self::add(&self.real_sent, report.real_sent);
        Self::add(&self.fake_sent, report.fake_sent);
        Self::add(&self.unloaded, report.unloaded);
        Self::add(&self.failures, report.failures);
        Self::add(&self.synthesis_requested, report.synthesis_requested);
    }

    fn snapshot(&self) -> DispatchStatistics {
        DispatchStatistics {
            real_sent: self.real_sent.load(Ordering::Relaxed),
            fake_sent: self.fake_sent.load(Ordering::Relaxed),
            unloaded: self.unloaded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            synthesis_requested: self.synthesis_requested.load(Ordering::Relaxed),
            synthesis_joined: self.synthesis_joined.load(Ordering::Relaxed),
            completions_discarded: self.completions_discarded.load(Ordering::Relaxed),
            budget_waits: self.budget_waits.load(Ordering::Relaxed),
        }
    }
}

/// Drives sends for all connections of one engine.
///
/// Shared state is a token counter, a sharded waiter map and atomic
/// counters, so host threads can forget connections or read statistics
/// while a tick is dispatching. Only the tick thread dispatches.
#[derive(Debug)]
pub struct DispatchScheduler {
    config: DispatchConfig,
    budget: TickBudget,
    waiters: DashMap<(WorldId, ChunkCoord), Vec<ConnectionId>>,
    counters: DispatchCounters,
}

impl DispatchScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            budget: TickBudget::new(config.max_chunks_per_tick),
            waiters: DashMap::new(),
            counters: DispatchCounters::default(),
        }
    }

    /// Budget settings.
    #[must_use]
    pub const fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Global budget for the current tick.
    #[must_use]
    pub const fn budget(&self) -> &TickBudget {
        &self.budget
    }

    /// Lifetime counters.
    #[must_use]
    pub fn statistics(&self) -> DispatchStatistics {
        self.counters.snapshot()
    }

    /// Synthesis jobs currently awaited.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.waiters.len()
    }

    /// Resets the global budget for a new tick.
    pub fn begin_tick(&self) {
        self.budget.reset();
    }

    /// Unloads removed coordinates, queues new ones, then dispatches.
    pub fn on_visibility_delta(
        &self,
        env: &DispatchEnv<'_>,
        state: &mut ConnectionViewState,
        delta: &VisibilityDelta,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for &coord in &delta.removed_chunks {
            state.dequeue(coord);
            if state.stop_awaiting(coord) {
                self.forget_waiter(state.world(), coord, state.id());
            }
            if state.unmark_sent(coord) {
                match env.ctx.host.unload_chunk(state.id(), coord) {
                    Ok(()) => report.unloaded += 1,
                    Err(e) => {
                        warn!("Failed to unload chunk {coord} for {}: {e}", state.id());
                        report.failures += 1;
                    },
                }
            }
        }

        for &coord in &delta.new_chunks {
            state.enqueue(coord);
        }

        self.counters.record(&report);

        report.absorb(self.dispatch(env, state));
        report
    }

    /// Unloads everything delivered to `state` and drops its queue.
    pub fn retract_all(&self, env: &DispatchEnv<'_>, state: &mut ConnectionViewState) -> DispatchReport {
        let removed: Vec<ChunkCoord> = state.visibility().ordered().to_vec();
        state.visibility_mut().reset();
        let delta = VisibilityDelta {
            kind: UpdateKind::Full,
            new_chunks: Vec::new(),
            removed_chunks: removed,
            fake_chunks: Vec::new(),
        };
        let report = self.on_visibility_delta(env, state, &delta);
        state.clear_tracking();
        state.set_dispatch_state(DispatchState::Idle);
        report
    }

    /// Sends queued coordinates for one connection within both budgets.
    ///
    /// The connection is left waiting only when a coordinate it could have
    /// sent is put back for lack of a global token.
    pub fn dispatch(&self, env: &DispatchEnv<'_>, state: &mut ConnectionViewState) -> DispatchReport {
        let mut report = DispatchReport::default();
        if state.pending_count() == 0 {
            state.set_dispatch_state(DispatchState::Idle);
            return report;
        }

        let allowance = per_connection_budget(
            self.config.per_connection_chunks_per_tick,
            state.moving_fast(),
            state.waiting_for_chunks(),
            self.config.waiting_boost_cap,
        );
        let synthesis_limit = allowance.saturating_mul(SYNTHESIS_LOOKAHEAD);
        state.set_dispatch_state(DispatchState::Sending);

        let Some(center) = state.visibility().center().map(|c| c.chunk) else {
            state.set_dispatch_state(DispatchState::Idle);
            return report;
        };

        let mut retry = Vec::new();
        let mut starved = false;

        while report.sent() < allowance {
            let Some(coord) = state.pop_pending() else {
                break;
            };
            if !state.visibility().contains(coord) || state.is_sent(coord) {
                continue;
            }

            match classify(center, coord, env.authoritative_radius) {
                ChunkKind::Real => {
                    if !self.budget.try_acquire() {
                        state.requeue_front(coord);
                        starved = true;
                        break;
                    }
                    match env.ctx.host.forward_real(state.id(), state.world(), coord) {
                        Ok(bytes) => {
                            state.mark_sent(coord, false, bytes);
                            report.real_sent += 1;
                        },
                        Err(e) => {
                            warn!("Failed to forward chunk {coord} to {}: {e}", state.id());
                            self.budget.release();
                            report.failures += 1;
                            retry.push(coord);
                        },
                    }
                },
                ChunkKind::Fake if !env.fake_allowed => {},
                ChunkKind::Fake => match env.cache.get(coord) {
                    Some(column) => {
                        if !self.budget.try_acquire() {
                            state.requeue_front(coord);
                            starved = true;
                            break;
                        }
                        match env.ctx.host.send_chunk(state.id(), &column) {
                            Ok(bytes) => {
                                state.mark_sent(coord, true, bytes);
                                report.fake_sent += 1;
                            },
                            Err(e) => {
                                warn!("Failed to send fake chunk {coord} to {}: {e}", state.id());
                                self.budget.release();
                                report.failures += 1;
                                retry.push(coord);
                            },
                        }
                    },
                    None if state.is_awaiting(coord) => {},
                    None if report.synthesis_requested >= synthesis_limit => retry.push(coord),
                    None => match self.request_synthesis(env, state, coord) {
                        Ok(submitted) => {
                            if submitted {
                                report.synthesis_requested += 1;
                            }
                        },
                        Err(e) => {
                            // The pool refuses everything else this tick too.
                            debug!("Deferring synthesis of {coord}: {e}");
                            retry.push(coord);
                            break;
                        },
                    },
                },
            }
        }

        for coord in retry {
            state.enqueue(coord);
        }

        self.counters.record(&report);

        if starved {
            report.waiting = true;
            self.counters.budget_waits.fetch_add(1, Ordering::Relaxed);
            state.set_dispatch_state(DispatchState::WaitingForBudget);
        } else if state.pending_count() > 0 {
            state.set_dispatch_state(DispatchState::Sending);
        } else {
            state.set_dispatch_state(DispatchState::Idle);
        }
        report
    }

    /// Joins or submits a synthesis job; `Ok(true)` when a job was submitted.
    fn request_synthesis(
        &self,
        env: &DispatchEnv<'_>,
        state: &mut ConnectionViewState,
        coord: ChunkCoord,
    ) -> Result<bool, SynthesisError> {
        match self.waiters.entry((state.world().clone(), coord)) {
            Entry::Occupied(mut waiting) => {
                if !waiting.get().contains(&state.id()) {
                    waiting.get_mut().push(state.id());
                }
                state.await_synthesis(coord);
                self.counters.synthesis_joined.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            },
            Entry::Vacant(slot) => {
                env.pool.submit(SynthesisJob {
                    world: state.world().clone(),
                    coord,
                    synthesizer: env.synthesizer,
                    cache: Arc::clone(env.cache),
                })?;
                slot.insert(vec![state.id()]);
                state.await_synthesis(coord);
                Ok(true)
            },
        }
    }

    fn forget_waiter(&self, world: &WorldId, coord: ChunkCoord, connection: ConnectionId) {
        if let Some(mut waiting) = self.waiters.get_mut(&(world.clone(), coord)) {
            waiting.retain(|id| *id != connection);
        }
    }

    /// Drops `connection` from every in-flight job; safe from any thread.
    pub fn forget_connection(&self, connection: ConnectionId) {
        for mut waiting in self.waiters.iter_mut() {
            waiting.retain(|id| *id != connection);
        }
    }

    /// Routes finished jobs back to the connections waiting on them.
    ///
    /// Ready coordinates go to the front of each waiter's queue and are sent
    /// by the next dispatch under the normal budgets. Waiters that
    /// disconnected, went offline, changed world, or no longer see the
    /// coordinate are skipped silently.
    pub fn process_completions(
        &self,
        ctx: &EngineContext,
        outcomes: Vec<SynthesisOutcome>,
        connections: &ConnectionTable,
    ) -> CompletionReport {
        let mut report = CompletionReport::default();

        for outcome in outcomes {
            let waiting = self
                .waiters
                .remove(&(outcome.world.clone(), outcome.coord))
                .map(|(_, waiting)| waiting)
                .unwrap_or_default();

            for id in waiting {
                let Some(entry) = connections.get(&id) else {
                    report.discarded += 1;
                    continue;
                };
                let state = Arc::clone(entry.value());
                drop(entry);
                let mut state = state.lock();

                let current = ctx.host.is_online(id)
                    && state.world() == &outcome.world
                    && state.stop_awaiting(outcome.coord)
                    && state.visibility().contains(outcome.coord);
                if !current {
                    report.discarded += 1;
                    continue;
                }

                if outcome.column.is_some() {
                    state.requeue_front(outcome.coord);
                    report.ready += 1;
                } else {
                    state.enqueue(outcome.coord);
                    report.failed += 1;
                }
            }
        }

        DispatchCounters::add(&self.counters.completions_discarded, report.discarded);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ChunkSource;
    use crate::shape::ViewShape;
    use crate::testing::RecordingHost;
    use crate::visibility::ViewCenter;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use horizon_common::{ManualClock, SendError};
    use horizon_world::{CacheConfig, ColumnLayout};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Fixture {
        host: Arc<RecordingHost>,
        ctx: EngineContext,
        pool: SynthesisPool,
        cache: Arc<RegionCache>,
    }

    /// Blocks every read until the test opens the gate.
    struct GatedSource {
        gate: Receiver<()>,
    }

    impl ChunkSource for GatedSource {
        fn read_partial(
            &self,
            _world: &WorldId,
            _coord: ChunkCoord,
        ) -> Result<Option<horizon_world::SourceChunk>, SynthesisError> {
            let _ = self.gate.recv_timeout(Duration::from_secs(10));
            Ok(None)
        }
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_source(Arc::new(crate::host::NoSource))
        }

        fn gated() -> (Self, Sender<()>) {
            let (open, gate) = bounded(16);
            (Self::with_source(Arc::new(GatedSource { gate })), open)
        }

        fn with_source(source: Arc<dyn ChunkSource>) -> Self {
            let clock = Arc::new(ManualClock::new(0));
            let host = Arc::new(RecordingHost::new(10));
            let ctx = EngineContext::new(host.clone(), clock.clone()).with_source(source);
            let pool = SynthesisPool::new(1, ctx.source.clone()).expect("pool");
            let cache = Arc::new(RegionCache::new(CacheConfig::default(), clock));
            Self {
                host,
                ctx,
                pool,
                cache,
            }
        }

        fn env(&self, authoritative_radius: i32) -> DispatchEnv<'_> {
            DispatchEnv {
                ctx: &self.ctx,
                pool: &self.pool,
                cache: &self.cache,
                synthesizer: ColumnSynthesizer::new(5, ColumnLayout::default()),
                authoritative_radius,
                fake_allowed: true,
            }
        }
    }

    fn state(raw: u64, radius: i32) -> ConnectionViewState {
        ConnectionViewState::new(
            ConnectionId::from_raw(raw),
            WorldId::new("overworld"),
            radius,
            64,
            true,
            33,
        )
    }

    fn delta(new_chunks: Vec<ChunkCoord>) -> VisibilityDelta {
        VisibilityDelta {
            kind: UpdateKind::Incremental,
            new_chunks,
            removed_chunks: Vec::new(),
            fake_chunks: Vec::new(),
        }
    }

    #[test]
    fn test_classification_uses_authoritative_radius() {
        let origin = ChunkCoord::new(0, 0);
        assert_eq!(classify(origin, ChunkCoord::new(12, 0), 10), ChunkKind::Fake);
        assert_eq!(classify(origin, ChunkCoord::new(10, 0), 10), ChunkKind::Real);
        assert_eq!(classify(origin, ChunkCoord::new(7, 7), 10), ChunkKind::Real);
        assert_eq!(classify(origin, ChunkCoord::new(8, 8), 10), ChunkKind::Fake);
        assert_eq!(classify(origin, ChunkCoord::new(10, 1), 10), ChunkKind::Fake);
        assert_eq!(classify(origin, ChunkCoord::new(-6, 8), 10), ChunkKind::Real);
        for x in -12..=12 {
            for z in -12..=12 {
                let coord = ChunkCoord::new(x, z);
                let inside = ViewShape::Circle.within(origin, coord, 10);
                assert_eq!(classify(origin, coord, 10) == ChunkKind::Real, inside);
            }
        }
        assert_eq!(classify(origin, origin, 0), ChunkKind::Real);
        assert_eq!(classify(origin, origin, -1), ChunkKind::Fake);
    }

    #[test]
    fn test_distant_chunk_is_fake_despite_large_target() {
        let fx = Fixture::new();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        let mut state = state(1, 32);
        state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(0, 0)), 32, ViewShape::Circle);

        let far = ChunkCoord::new(12, 0);
        let near = ChunkCoord::new(3, 0);
        let report = scheduler.on_visibility_delta(&fx.env(10), &mut state, &delta(vec![far, near]));

        assert_eq!(report.real_sent, 1);
        assert_eq!(report.synthesis_requested, 1);
        assert_eq!(fx.host.forwarded(), vec![(1, near)]);
        assert!(state.is_awaiting(far));

        let outcome = fx.pool.recv_timeout(Duration::from_secs(10)).expect("synthesis");
        let table = ConnectionTable::new();
        table.insert(state.id(), Arc::new(Mutex::new(state)));
        let done = scheduler.process_completions(&fx.ctx, vec![outcome], &table);
        assert_eq!(done.ready, 1);

        scheduler.begin_tick();
        let entry = table.get(&ConnectionId::from_raw(1)).expect("state");
        let mut state = entry.lock();
        let report = scheduler.dispatch(&fx.env(10), &mut state);
        assert_eq!(report.fake_sent, 1);
        assert_eq!(fx.host.fake_sent(), vec![(1, far)]);
        assert_eq!(state.statistics().fake_chunks_sent, 1);
    }

    #[test]
    fn test_global_budget_leaves_one_waiting() {
        let fx = Fixture::new();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        scheduler.begin_tick();

        let mut reports = Vec::new();
        let mut states: Vec<_> = (1..=6).map(|i| state(i, 0)).collect();
        for (i, state) in states.iter_mut().enumerate() {
            let center = ChunkCoord::new(i as i32 * 100, 0);
            let d = state
                .visibility_mut()
                .update(ViewCenter::new("overworld", center), 0, ViewShape::Square);
            reports.push(scheduler.on_visibility_delta(&fx.env(10), state, &d));
        }

        let sent: u32 = reports.iter().map(DispatchReport::sent).sum();
        assert_eq!(sent, 5);
        assert_eq!(fx.host.forwarded().len(), 5);
        let waiting: Vec<_> = states.iter().filter(|s| s.waiting_for_chunks()).collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].dispatch_state(), DispatchState::WaitingForBudget);
        assert_eq!(waiting[0].pending_count(), 1);
        assert_eq!(waiting[0].id(), ConnectionId::from_raw(6));

        // The connection that took the last token has nothing left to send.
        assert!(!states[4].waiting_for_chunks());
        assert_eq!(states[4].dispatch_state(), DispatchState::Idle);

        // Next tick the waiting connection goes through and clears its flag.
        scheduler.begin_tick();
        let last = states.iter_mut().find(|s| s.waiting_for_chunks()).expect("waiting");
        let report = scheduler.dispatch(&fx.env(10), last);
        assert_eq!(report.real_sent, 1);
        assert!(!last.waiting_for_chunks());
        assert_eq!(last.dispatch_state(), DispatchState::Idle);
    }

    #[test]
    fn test_per_connection_cap_does_not_set_waiting() {
        let fx = Fixture::new();
        let config = DispatchConfig {
            max_chunks_per_tick: 100,
            per_connection_chunks_per_tick: 3,
            waiting_boost_cap: 10,
        };
        let scheduler = DispatchScheduler::new(config);
        scheduler.begin_tick();
        let mut state = state(1, 2);
        let d = state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(0, 0)), 2, ViewShape::Square);
        let report = scheduler.on_visibility_delta(&fx.env(10), &mut state, &d);
        assert_eq!(report.real_sent, 3);
        assert!(!state.waiting_for_chunks());
        assert_eq!(state.dispatch_state(), DispatchState::Sending);
        assert_eq!(state.pending_count(), 22);
    }

    #[test]
    fn test_failed_send_is_retried_and_never_unloaded() {
        let fx = Fixture::new();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        scheduler.begin_tick();
        let mut state = state(1, 0);
        fx.host.fail_next_forward(SendError::Transport("broken pipe".into()));

        let center = ViewCenter::new("overworld", ChunkCoord::new(0, 0));
        let d = state.visibility_mut().update(center, 0, ViewShape::Square);
        let report = scheduler.on_visibility_delta(&fx.env(10), &mut state, &d);
        assert_eq!(report.failures, 1);
        assert_eq!(report.real_sent, 0);
        assert!(!state.is_sent(ChunkCoord::new(0, 0)));
        assert_eq!(state.pending_count(), 1);
        assert_eq!(scheduler.budget().used(), 0);

        // Moving away before the retry must not unload the unsent chunk.
        let d = state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(50, 0)), 0, ViewShape::Square);
        scheduler.on_visibility_delta(&fx.env(10), &mut state, &d);
        assert!(fx.host.unloaded().is_empty());
    }

    #[test]
    fn test_removed_sent_chunks_are_unloaded() {
        let fx = Fixture::new();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        scheduler.begin_tick();
        let mut state = state(1, 0);
        let d = state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(0, 0)), 0, ViewShape::Square);
        scheduler.on_visibility_delta(&fx.env(10), &mut state, &d);
        assert!(state.is_sent(ChunkCoord::new(0, 0)));

        let d = state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(1, 0)), 0, ViewShape::Square);
        let report = scheduler.on_visibility_delta(&fx.env(10), &mut state, &d);
        assert_eq!(report.unloaded, 1);
        assert_eq!(fx.host.unloaded(), vec![(1, ChunkCoord::new(0, 0))]);
        assert!(!state.is_sent(ChunkCoord::new(0, 0)));
    }

    #[test]
    fn test_fake_disabled_sends_nothing_fake() {
        let fx = Fixture::new();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        scheduler.begin_tick();
        let mut state = state(1, 3);
        let d = state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(0, 0)), 3, ViewShape::Square);
        let mut env = fx.env(0);
        env.fake_allowed = false;
        let report = scheduler.on_visibility_delta(&env, &mut state, &d);
        assert_eq!(report.real_sent, 1);
        assert_eq!(report.synthesis_requested, 0);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_shared_coordinate_has_one_job() {
        let (fx, open) = Fixture::gated();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        scheduler.begin_tick();
        let target = ChunkCoord::new(20, 0);
        let table = ConnectionTable::new();

        for raw in 1..=3 {
            let mut state = state(raw, 32);
            state
                .visibility_mut()
                .update(ViewCenter::new("overworld", ChunkCoord::new(0, 0)), 32, ViewShape::Square);
            scheduler.on_visibility_delta(&fx.env(10), &mut state, &delta(vec![target]));
            table.insert(state.id(), Arc::new(Mutex::new(state)));
        }
        assert_eq!(scheduler.in_flight(), 1);
        assert_eq!(scheduler.statistics().synthesis_requested, 1);
        assert_eq!(scheduler.statistics().synthesis_joined, 2);

        // One waiter leaves before the job finishes.
        table.remove(&ConnectionId::from_raw(2));
        scheduler.forget_connection(ConnectionId::from_raw(2));

        open.send(()).expect("open gate");
        let outcome = fx.pool.recv_timeout(Duration::from_secs(10)).expect("synthesis");
        let done = scheduler.process_completions(&fx.ctx, vec![outcome], &table);
        assert_eq!(done.ready, 2);
        assert_eq!(done.discarded, 0);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_offline_waiter_is_discarded() {
        let fx = Fixture::new();
        let scheduler = DispatchScheduler::new(DispatchConfig::default());
        scheduler.begin_tick();
        let table = ConnectionTable::new();
        let mut state = state(7, 32);
        state
            .visibility_mut()
            .update(ViewCenter::new("overworld", ChunkCoord::new(0, 0)), 32, ViewShape::Square);
        let target = ChunkCoord::new(25, 25);
        scheduler.on_visibility_delta(&fx.env(10), &mut state, &delta(vec![target]));
        table.insert(state.id(), Arc::new(Mutex::new(state)));

        fx.host.set_online(ConnectionId::from_raw(7), false);
        let outcome = fx.pool.recv_timeout(Duration::from_secs(10)).expect("synthesis");
        let done = scheduler.process_completions(&fx.ctx, vec![outcome], &table);
        assert_eq!(done.discarded, 1);
        assert!(fx.host.fake_sent().is_empty());
    }
}
