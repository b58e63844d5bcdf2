//! End-to-end engine scenarios against the recording host.

use crossbeam_channel::{bounded, Receiver, Sender};
use horizon_common::{BlockPosition, ChunkCoord, ConnectionId, ManualClock, SendError, WorldId};
use horizon_world::ChunkColumn;
use proptest::prelude::*;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{HorizonConfig, WorldSettings};
use crate::engine::{TickReport, ViewEngine};
use crate::host::{EngineContext, HostBridge, PermissionSource};
use crate::scheduler::{classify, ChunkKind};
use crate::shape::ViewShape;
use crate::testing::RecordingHost;

/// Ceiling the test can change between ticks; negative means none.
#[derive(Debug)]
struct AdjustableCeiling(AtomicI32);

impl PermissionSource for AdjustableCeiling {
    fn max_radius(&self, _connection: ConnectionId) -> Option<i32> {
        let value = self.0.load(Ordering::SeqCst);
        (value >= 0).then_some(value)
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    host: Arc<RecordingHost>,
    ceiling: Arc<AdjustableCeiling>,
    engine: ViewEngine,
}

impl Harness {
    fn new(authoritative_radius: i32, tweak: impl FnOnce(&mut HorizonConfig)) -> Self {
        let mut config = HorizonConfig::default();
        config.view.min_distance = 0;
        config.performance.worker_threads = 1;
        tweak(&mut config);

        let clock = Arc::new(ManualClock::new(0));
        let host = Arc::new(RecordingHost::new(authoritative_radius));
        let ceiling = Arc::new(AdjustableCeiling(AtomicI32::new(-1)));
        let ctx = EngineContext::new(host.clone(), clock.clone()).with_permissions(ceiling.clone());
        let engine = ViewEngine::new(config, ctx).expect("engine");
        Self {
            clock,
            host,
            ceiling,
            engine,
        }
    }

    fn join(&self, raw: u64, chunk: ChunkCoord, radius: i32) -> ConnectionId {
        let id = ConnectionId::from_raw(raw);
        self.engine
            .connect(id, WorldId::new("overworld"), block_center(chunk), Some(radius));
        id
    }

    fn tick(&self) -> TickReport {
        self.clock.advance_millis(50);
        self.engine.tick()
    }

    /// Ticks until nothing is pending or awaited, waiting briefly on workers.
    fn settle(&self, max_ticks: usize) {
        for _ in 0..max_ticks {
            self.tick();
            let busy = self.engine.statistics().in_flight > 0;
            let pending: usize = self
                .engine
                .all_connection_statistics()
                .iter()
                .map(|s| s.pending_chunks)
                .sum();
            if !busy && pending == 0 {
                return;
            }
            if busy {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

fn block_center(chunk: ChunkCoord) -> BlockPosition {
    let (x, z) = chunk.block_origin();
    BlockPosition::new(x as f64 + 8.0, 64.0, z as f64 + 8.0)
}

#[test]
fn six_connections_share_a_budget_of_five() {
    let h = Harness::new(10, |_| {});
    for raw in 1..=6 {
        h.join(raw, ChunkCoord::new(raw as i32 * 100, 0), 0);
    }

    let report = h.tick();
    assert_eq!(report.dispatch.real_sent, 5);
    assert_eq!(report.waiting_connections, 1);
    assert_eq!(h.host.forwarded().len(), 5);

    let waiting: Vec<_> = h
        .engine
        .all_connection_statistics()
        .into_iter()
        .filter(|s| s.waiting_for_chunks)
        .collect();
    assert_eq!(waiting.len(), 1);

    let report = h.tick();
    assert_eq!(report.dispatch.real_sent, 1);
    assert_eq!(report.waiting_connections, 0);
    assert_eq!(h.host.forwarded().len(), 6);
}

#[test]
fn square_radius_two_sends_twenty_five() {
    let h = Harness::new(10, |c| {
        c.view.shape = ViewShape::Square;
        c.performance.max_chunks_per_tick = 100;
        c.performance.per_connection_chunks_per_tick = 100;
        c.performance.waiting_boost_cap = 100;
    });
    h.join(1, ChunkCoord::new(0, 0), 2);
    h.tick();

    let forwarded = h.host.forwarded();
    assert_eq!(forwarded.len(), 25);
    for x in -2..=2 {
        for z in -2..=2 {
            assert!(forwarded.contains(&(1, ChunkCoord::new(x, z))));
        }
    }
}

#[test]
fn circle_radius_two_excludes_corners() {
    let h = Harness::new(10, |c| {
        c.performance.max_chunks_per_tick = 100;
        c.performance.per_connection_chunks_per_tick = 100;
        c.performance.waiting_boost_cap = 100;
    });
    h.join(1, ChunkCoord::new(0, 0), 2);
    h.tick();

    let forwarded = h.host.forwarded();
    assert!(forwarded.contains(&(1, ChunkCoord::new(2, 0))));
    assert!(!forwarded.contains(&(1, ChunkCoord::new(2, 2))));
    assert_eq!(forwarded.len(), 13);
}

#[test]
fn beyond_authoritative_radius_is_synthesized() {
    let h = Harness::new(1, |c| {
        c.performance.max_chunks_per_tick = 50;
        c.performance.per_connection_chunks_per_tick = 50;
        c.performance.waiting_boost_cap = 50;
    });
    h.join(1, ChunkCoord::new(0, 0), 3);
    h.settle(200);

    let origin = ChunkCoord::new(0, 0);
    let forwarded = h.host.forwarded();
    let fake = h.host.fake_sent();
    assert!(forwarded
        .iter()
        .all(|(_, c)| classify(origin, *c, 1) == ChunkKind::Real));
    assert!(fake
        .iter()
        .all(|(_, c)| classify(origin, *c, 1) == ChunkKind::Fake));
    assert_eq!(forwarded.len() + fake.len(), 29);
    assert!(fake.contains(&(1, ChunkCoord::new(3, 0))));

    let stats = h.engine.connection_statistics(ConnectionId::from_raw(1)).expect("stats");
    assert_eq!(stats.fake_chunks_sent, fake.len() as u64);
    assert_eq!(stats.sent_chunks, 29);

    let cache = h.engine.statistics().caches["overworld"];
    assert_eq!(cache.synthesized, fake.len() as u64);
}

#[test]
fn disconnect_discards_inflight_synthesis() {
    let h = Harness::new(0, |_| {});
    let id = h.join(1, ChunkCoord::new(0, 0), 2);

    let report = h.tick();
    assert!(report.dispatch.synthesis_requested > 0);
    assert!(h.engine.disconnect(id));
    assert!(!h.engine.is_connected(id));

    // Let workers finish, then route their results.
    std::thread::sleep(Duration::from_millis(50));
    for _ in 0..20 {
        h.tick();
        if h.engine.statistics().in_flight == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(h.host.fake_sent().is_empty());
    assert!(h.host.unloaded().is_empty());
    assert_eq!(h.engine.statistics().in_flight, 0);
}

#[test]
fn failed_send_is_retried_next_tick() {
    let h = Harness::new(10, |_| {});
    let id = h.join(1, ChunkCoord::new(0, 0), 0);
    h.host.fail_next_forward(SendError::FetchFailed {
        coord: ChunkCoord::new(0, 0),
        reason: "not loaded".into(),
    });

    let report = h.tick();
    assert_eq!(report.dispatch.failures, 1);
    let stats = h.engine.connection_statistics(id).expect("stats");
    assert_eq!(stats.chunks_sent, 0);
    assert_eq!(stats.sent_chunks, 0);
    assert_eq!(stats.pending_chunks, 1);

    h.tick();
    let stats = h.engine.connection_statistics(id).expect("stats");
    assert_eq!(stats.chunks_sent, 1);
    assert_eq!(stats.bytes_used, 4_096);
}

#[test]
fn permission_refresh_clamps_radius() {
    let h = Harness::new(10, |c| {
        c.performance.max_chunks_per_tick = 500;
        c.performance.per_connection_chunks_per_tick = 500;
        c.performance.waiting_boost_cap = 500;
    });
    let id = h.join(1, ChunkCoord::new(0, 0), 4);
    h.tick();
    assert_eq!(h.host.forwarded().len(), ViewShape::Circle.enumerate(ChunkCoord::new(0, 0), 4).len());

    h.ceiling.0.store(2, Ordering::SeqCst);
    h.tick();
    assert_eq!(h.engine.connection_statistics(id).expect("stats").target_radius, 4);

    h.clock.advance_secs(61);
    let report = h.tick();
    assert_eq!(report.clamped_connections, 1);
    let stats = h.engine.connection_statistics(id).expect("stats");
    assert_eq!(stats.target_radius, 2);
    assert_eq!(stats.current_radius, 2);
    assert_eq!(stats.sent_chunks, 13);
    assert_eq!(report.dispatch.unloaded as usize, h.host.unloaded().len());
    assert!(!h.host.unloaded().is_empty());

    // Requests above the ceiling are clamped too.
    assert_eq!(h.engine.set_target_radius(id, 30), Ok(2));
}

#[test]
fn world_change_unloads_previous_world() {
    let h = Harness::new(10, |c| {
        c.performance.max_chunks_per_tick = 50;
        c.performance.per_connection_chunks_per_tick = 50;
    });
    let id = h.join(1, ChunkCoord::new(0, 0), 1);
    h.tick();
    assert_eq!(h.host.forwarded().len(), 5);

    h.engine
        .submit_movement(id, WorldId::new("the_nether"), block_center(ChunkCoord::new(0, 0)));
    let report = h.tick();
    assert_eq!(report.movements, 1);
    assert_eq!(report.dispatch.unloaded, 5);
    assert_eq!(report.dispatch.real_sent, 5);
    let stats = h.engine.connection_statistics(id).expect("stats");
    assert_eq!(stats.world, "the_nether");
    assert_eq!(stats.sent_chunks, 5);
}

#[test]
fn intercepted_column_is_served_from_cache() {
    let h = Harness::new(0, |c| {
        c.performance.max_chunks_per_tick = 50;
        c.performance.per_connection_chunks_per_tick = 50;
    });
    let world = WorldId::new("overworld");
    let coord = ChunkCoord::new(1, 0);
    let synth = horizon_world::ColumnSynthesizer::new(0, horizon_world::ColumnLayout::default());
    h.engine.intercept(&world, synth.synthesize(coord));

    h.join(1, ChunkCoord::new(0, 0), 1);
    let report = h.tick();
    assert!(h.host.fake_sent().contains(&(1, coord)));
    assert_eq!(report.dispatch.fake_sent, 1);
    assert_eq!(report.dispatch.synthesis_requested, 3);

    let cache = h.engine.statistics().caches["overworld"];
    assert_eq!(cache.intercepted, 1);
    assert!(h.engine.clear_world(&world) >= 1);
}

#[test]
fn disabled_world_receives_nothing() {
    let h = Harness::new(10, |c| {
        c.worlds.insert(
            "overworld".into(),
            WorldSettings {
                enabled: false,
                ..WorldSettings::default()
            },
        );
    });
    h.join(1, ChunkCoord::new(0, 0), 3);
    h.tick();
    assert!(h.host.forwarded().is_empty());
    assert!(h.host.fake_sent().is_empty());
}

#[test]
fn fake_chunks_can_be_disabled_per_connection() {
    let h = Harness::new(0, |c| {
        c.performance.max_chunks_per_tick = 50;
        c.performance.per_connection_chunks_per_tick = 50;
    });
    let id = h.join(1, ChunkCoord::new(0, 0), 2);
    h.engine.set_fake_enabled(id, false).expect("known connection");
    let report = h.tick();
    assert_eq!(report.dispatch.real_sent, 1);
    assert_eq!(report.dispatch.synthesis_requested, 0);

    h.engine.set_fake_enabled(id, true).expect("known connection");
    let report = h.tick();
    assert!(report.dispatch.synthesis_requested > 0);
}

#[test]
fn fast_movement_halves_connection_budget() {
    let h = Harness::new(10, |c| {
        c.performance.max_chunks_per_tick = 100;
        c.performance.per_connection_chunks_per_tick = 4;
    });
    let id = h.join(1, ChunkCoord::new(0, 0), 3);
    assert_eq!(h.tick().dispatch.real_sent, 4);

    // Seven blocks in 100ms, still inside chunk (0, 0).
    h.engine.submit_movement(
        id,
        WorldId::new("overworld"),
        BlockPosition::new(15.0, 64.0, 8.0),
    );
    let report = h.tick();
    assert_eq!(report.movements, 1);
    assert_eq!(report.dispatch.real_sent, 2);
    assert!(h.engine.connection_statistics(id).expect("stats").moving_fast);

    // Standing still restores the full allowance.
    h.engine.submit_movement(
        id,
        WorldId::new("overworld"),
        BlockPosition::new(15.0, 64.0, 8.0),
    );
    assert_eq!(h.tick().dispatch.real_sent, 4);
}

#[test]
fn growing_authoritative_radius_forwards_skipped_chunks() {
    let h = Harness::new(0, |c| {
        c.view.enable_fake_chunks = false;
        c.performance.max_chunks_per_tick = 50;
        c.performance.per_connection_chunks_per_tick = 50;
    });
    let id = h.join(1, ChunkCoord::new(0, 0), 2);
    let report = h.tick();
    assert_eq!(report.dispatch.real_sent, 1);
    assert_eq!(report.dispatch.synthesis_requested, 0);

    h.host.set_authoritative_radius(5);
    let report = h.tick();
    assert_eq!(report.dispatch.real_sent, 12);
    let stats = h.engine.connection_statistics(id).expect("stats");
    assert_eq!(stats.sent_chunks, 13);
    assert_eq!(stats.pending_chunks, 0);
    assert_eq!(h.host.forwarded().len(), 13);
}

#[test]
fn statistics_report_fake_labelled_chunks() {
    let h = Harness::new(10, |c| c.view.fake_start_distance = 1);
    let id = h.join(1, ChunkCoord::new(0, 0), 3);
    h.tick();
    let stats = h.engine.connection_statistics(id).expect("stats");
    // 29 visible in a radius-3 circle, 5 of them within distance 1.
    assert_eq!(stats.fake_labelled_chunks, 24);
}

/// Recording host whose real sends block until the test opens a gate.
struct BlockingHost {
    inner: RecordingHost,
    entered: Sender<()>,
    gate: Receiver<()>,
}

impl HostBridge for BlockingHost {
    fn authoritative_radius(&self, connection: ConnectionId) -> Option<i32> {
        self.inner.authoritative_radius(connection)
    }

    fn is_online(&self, connection: ConnectionId) -> bool {
        self.inner.is_online(connection)
    }

    fn world_seed(&self, world: &WorldId) -> i64 {
        self.inner.world_seed(world)
    }

    fn forward_real(
        &self,
        connection: ConnectionId,
        world: &WorldId,
        coord: ChunkCoord,
    ) -> Result<u64, SendError> {
        let _ = self.entered.try_send(());
        let _ = self.gate.recv_timeout(Duration::from_secs(10));
        self.inner.forward_real(connection, world, coord)
    }

    fn send_chunk(&self, connection: ConnectionId, column: &ChunkColumn) -> Result<u64, SendError> {
        self.inner.send_chunk(connection, column)
    }

    fn unload_chunk(&self, connection: ConnectionId, coord: ChunkCoord) -> Result<(), SendError> {
        self.inner.unload_chunk(connection, coord)
    }
}

#[test]
fn host_threads_do_not_wait_on_a_dispatching_tick() {
    let (entered_tx, entered_rx) = bounded(16);
    let (open, gate) = bounded(16);
    let host = Arc::new(BlockingHost {
        inner: RecordingHost::new(10),
        entered: entered_tx,
        gate,
    });
    let mut config = HorizonConfig::default();
    config.view.min_distance = 0;
    config.performance.worker_threads = 1;
    let ctx = EngineContext::new(host.clone(), Arc::new(ManualClock::new(0)));
    let engine = ViewEngine::new(config, ctx).expect("engine");
    for raw in 1..=2 {
        engine.connect(
            ConnectionId::from_raw(raw),
            WorldId::new("overworld"),
            block_center(ChunkCoord::new(raw as i32 * 100, 0)),
            Some(0),
        );
    }

    std::thread::scope(|scope| {
        let ticking = scope.spawn(|| engine.tick());
        entered_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("tick reached the host");

        let (done_tx, done_rx) = bounded(1);
        let engine = &engine;
        scope.spawn(move || {
            let stats = engine.statistics();
            let left = engine.disconnect(ConnectionId::from_raw(2));
            let _ = done_tx.send((stats.connections, left));
        });
        let done = done_rx.recv_timeout(Duration::from_secs(2));

        for _ in 0..2 {
            let _ = open.send(());
        }
        let report = ticking.join().expect("tick thread");
        assert_eq!(report.tick, 1);
        assert_eq!(done.expect("host calls finished during the tick"), (2, true));
    });

    assert!(!engine.is_connected(ConnectionId::from_raw(2)));
    assert_eq!(engine.statistics().connections, 1);
}

#[test]
fn unknown_connection_is_an_error() {
    let h = Harness::new(10, |_| {});
    assert!(h.engine.set_target_radius(ConnectionId::from_raw(99), 5).is_err());
    assert!(!h.engine.disconnect(ConnectionId::from_raw(99)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_global_budget_never_exceeded(
        budget in 1u32..8,
        radii in prop::collection::vec(0i32..3, 1..8),
    ) {
        let h = Harness::new(64, |c| {
            c.performance.max_chunks_per_tick = budget;
            c.performance.per_connection_chunks_per_tick = 3;
        });
        for (i, radius) in radii.iter().enumerate() {
            h.join(i as u64 + 1, ChunkCoord::new(i as i32 * 50, 0), *radius);
        }
        for _ in 0..6 {
            let before = h.host.forwarded().len();
            let report = h.tick();
            let sent = h.host.forwarded().len() - before;
            prop_assert!(sent as u32 <= budget);
            prop_assert_eq!(report.dispatch.real_sent as usize, sent);
        }
    }
}
