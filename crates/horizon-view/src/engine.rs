//! Top-level view engine.
//!
//! [`ViewEngine`] owns the connection table, one cache per world, the
//! synthesis pool and the dispatch scheduler. Hosts feed it joins, leaves,
//! movement and intercepted columns from any thread, and call
//! [`ViewEngine::tick`] from the one thread allowed to send packets. Only
//! per-connection locks are held while a tick dispatches, so joins, leaves
//! and statistics never wait on host sends.

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use horizon_common::{BlockPosition, ConnectionId, HorizonResult, WorldId};
use horizon_world::{CacheStatistics, ChunkColumn, ColumnSynthesizer, RegionCache, SweepReport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::HorizonConfig;
use crate::connection::{ConnectionStatistics, ConnectionTable, ConnectionViewState};
use crate::host::EngineContext;
use crate::scheduler::{
    CompletionReport, DispatchEnv, DispatchReport, DispatchScheduler, DispatchStatistics,
};
use crate::visibility::ViewCenter;
use crate::worker::SynthesisPool;

/// Errors returned to hosts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// No state for this connection
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// A movement sample from the host.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementEvent {
    /// Connection that moved
    pub connection: ConnectionId,
    /// World it is in now
    pub world: WorldId,
    /// New position
    pub position: BlockPosition,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Movement samples applied
    pub movements: u32,
    /// Synthesis completions routed
    pub completions: CompletionReport,
    /// Sends, unloads and requests across all connections
    pub dispatch: DispatchReport,
    /// Connections left waiting for budget
    pub waiting_connections: u32,
    /// Connections whose radius was clamped by a permission refresh
    pub clamped_connections: u32,
    /// Sweeps that ran, per world
    pub sweeps: BTreeMap<String, SweepReport>,
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Ticks run
    pub ticks: u64,
    /// Live connections
    pub connections: usize,
    /// Synthesis jobs awaited
    pub in_flight: usize,
    /// Lifetime dispatch counters
    pub dispatch: DispatchStatistics,
    /// Cache statistics per world
    pub caches: BTreeMap<String, CacheStatistics>,
}

/// The extended-view-distance engine.
pub struct ViewEngine {
    config: HorizonConfig,
    ctx: EngineContext,
    connections: ConnectionTable,
    caches: DashMap<WorldId, Arc<RegionCache>>,
    scheduler: DispatchScheduler,
    pool: SynthesisPool,
    tick_guard: Mutex<()>,
    movement_tx: Sender<MovementEvent>,
    movement_rx: Receiver<MovementEvent>,
    ticks: AtomicU64,
}

impl std::fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEngine")
            .field("connections", &self.connections.len())
            .field("worlds", &self.caches.len())
            .field("ticks", &self.ticks.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ViewEngine {
    /// Creates an engine and starts its synthesis workers.
    pub fn new(mut config: HorizonConfig, ctx: EngineContext) -> HorizonResult<Self> {
        config.validate();
        let pool = SynthesisPool::new(config.performance.worker_threads, Arc::clone(&ctx.source))?;
        let (movement_tx, movement_rx) = unbounded();
        info!(
            "View engine started with {} synthesis workers, {} chunks per tick",
            pool.worker_count(),
            config.performance.max_chunks_per_tick
        );
        Ok(Self {
            scheduler: DispatchScheduler::new(config.dispatch()),
            config,
            ctx,
            connections: ConnectionTable::new(),
            caches: DashMap::new(),
            pool,
            tick_guard: Mutex::new(()),
            movement_tx,
            movement_rx,
            ticks: AtomicU64::new(0),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &HorizonConfig {
        &self.config
    }

    /// Collaborator handles.
    #[must_use]
    pub const fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Clamps `radius` into what `connection` may use in `world`.
    fn clamp_radius(&self, world: &WorldId, ceiling: i32, radius: i32) -> i32 {
        let view = &self.config.view;
        let upper = self
            .config
            .world_max_distance(world.name())
            .min(ceiling)
            .max(view.min_distance);
        radius.clamp(view.min_distance, upper)
    }

    fn ceiling_for(&self, connection: ConnectionId) -> i32 {
        self.ctx
            .permissions
            .max_radius(connection)
            .unwrap_or(self.config.view.max_distance)
    }

    /// Registers a connection.
    ///
    /// `preferred_radius` (for example a stored preference) replaces the
    /// configured default; either is clamped. Returns the radius in effect.
    pub fn connect(
        &self,
        connection: ConnectionId,
        world: WorldId,
        position: BlockPosition,
        preferred_radius: Option<i32>,
    ) -> i32 {
        let now = self.ctx.now();
        let ceiling = self.ceiling_for(connection);
        let requested = preferred_radius.unwrap_or(self.config.view.default_distance);
        let radius = self.clamp_radius(&world, ceiling, requested);

        let mut state = ConnectionViewState::new(
            connection,
            world.clone(),
            radius,
            ceiling,
            true,
            self.config.view.fake_start_distance,
        );
        state.mark_permission_checked(now);
        state.record_movement(position, now, self.config.movement.fast_speed_blocks_per_sec);

        if self
            .connections
            .insert(connection, Arc::new(Mutex::new(state)))
            .is_some()
        {
            self.scheduler.forget_connection(connection);
        }
        info!("{connection} joined {world} with view distance {radius}");
        radius
    }

    /// Forgets a connection. Nothing is unloaded; in-flight synthesis for it
    /// is discarded when it completes.
    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        let Some((_, state)) = self.connections.remove(&connection) else {
            return false;
        };
        self.scheduler.forget_connection(connection);
        let stats = state.lock().statistics();
        info!(
            "{connection} left after {} chunks ({} fake, {} bytes)",
            stats.chunks_sent, stats.fake_chunks_sent, stats.bytes_used
        );
        true
    }

    /// Whether `connection` is registered.
    #[must_use]
    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    /// Queues a movement sample; safe from any thread.
    pub fn submit_movement(&self, connection: ConnectionId, world: WorldId, position: BlockPosition) {
        // The receiver lives as long as the engine.
        let _ = self.movement_tx.send(MovementEvent {
            connection,
            world,
            position,
        });
    }

    /// Sender for movement samples, for host threads.
    #[must_use]
    pub fn movement_sender(&self) -> Sender<MovementEvent> {
        self.movement_tx.clone()
    }

    fn state(&self, connection: ConnectionId) -> Result<Arc<Mutex<ConnectionViewState>>, ViewError> {
        self.connections
            .get(&connection)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ViewError::UnknownConnection(connection))
    }

    /// Sets the requested radius; returns the clamped value in effect.
    pub fn set_target_radius(&self, connection: ConnectionId, radius: i32) -> Result<i32, ViewError> {
        let state = self.state(connection)?;
        let mut state = state.lock();
        let clamped = self.clamp_radius(state.world(), state.max_allowed_radius(), radius);
        state.set_target_radius(clamped);
        debug!("{connection} view distance set to {clamped}");
        Ok(clamped)
    }

    /// Enables or disables fake chunks for one connection.
    pub fn set_fake_enabled(&self, connection: ConnectionId, enabled: bool) -> Result<(), ViewError> {
        self.state(connection)?.lock().set_fake_enabled(enabled);
        Ok(())
    }

    /// Stores a real column seen on the authoritative path.
    pub fn intercept(&self, world: &WorldId, column: ChunkColumn) {
        self.cache(world).intercept(column);
    }

    /// Cache for `world`, created on first use.
    pub fn cache(&self, world: &WorldId) -> Arc<RegionCache> {
        self.caches
            .entry(world.clone())
            .or_insert_with(|| {
                Arc::new(RegionCache::new(
                    self.config.cache_config(),
                    Arc::clone(&self.ctx.clock),
                ))
            })
            .value()
            .clone()
    }

    /// Drops the cache of `world`; returns how many entries it held.
    pub fn clear_world(&self, world: &WorldId) -> usize {
        match self.caches.remove(world) {
            Some((_, cache)) => {
                let entries = cache.clear_all();
                info!("Cleared {entries} cached chunks for {world}");
                entries
            },
            None => 0,
        }
    }

    /// Snapshot of one connection.
    pub fn connection_statistics(&self, connection: ConnectionId) -> Result<ConnectionStatistics, ViewError> {
        Ok(self.state(connection)?.lock().statistics())
    }

    /// Snapshots of every connection, ordered by ID.
    #[must_use]
    pub fn all_connection_statistics(&self) -> Vec<ConnectionStatistics> {
        self.ordered_connections()
            .into_iter()
            .map(|(_, state)| state.lock().statistics())
            .collect()
    }

    /// Engine-wide statistics.
    #[must_use]
    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            ticks: self.ticks.load(Ordering::Relaxed),
            connections: self.connections.len(),
            in_flight: self.scheduler.in_flight(),
            dispatch: self.scheduler.statistics(),
            caches: self
                .caches
                .iter()
                .map(|entry| (entry.key().name().to_string(), entry.value().statistics()))
                .collect(),
        }
    }

    fn ordered_connections(&self) -> Vec<(ConnectionId, Arc<Mutex<ConnectionViewState>>)> {
        let mut all: Vec<_> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    fn apply_movements(&self) -> u32 {
        let now = self.ctx.now();
        let mut applied = 0;
        for event in self.movement_rx.try_iter() {
            let Ok(state) = self.state(event.connection) else {
                continue;
            };
            let mut state = state.lock();
            state.set_world(event.world);
            state.record_movement(
                event.position,
                now,
                self.config.movement.fast_speed_blocks_per_sec,
            );
            applied += 1;
        }
        applied
    }

    /// Runs one tick: movement, completions, permission refresh,
    /// visibility updates, dispatch, and cache sweeps.
    ///
    /// A call that overlaps a running tick returns an empty report.
    pub fn tick(&self) -> TickReport {
        let Some(_running) = self.tick_guard.try_lock() else {
            debug!("Skipping overlapping tick");
            return TickReport::default();
        };
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let scheduler = &self.scheduler;
        scheduler.begin_tick();

        report.movements = self.apply_movements();
        report.completions =
            scheduler.process_completions(&self.ctx, self.pool.drain(), &self.connections);

        let now = self.ctx.now();
        let permission_interval = self.config.permission_interval_millis();

        for (id, state) in self.ordered_connections() {
            let Some(authoritative_radius) = self.ctx.host.authoritative_radius(id) else {
                continue;
            };
            if !self.ctx.host.is_online(id) {
                continue;
            }
            let mut state = state.lock();
            if state.observe_authoritative_radius(authoritative_radius) {
                debug!("{id} authoritative radius now {authoritative_radius}");
            }

            if state.permission_check_due(now, permission_interval) {
                state.mark_permission_checked(now);
                if state.apply_permission_ceiling(self.ceiling_for(id)) {
                    debug!("{id} view distance clamped to {}", state.target_radius());
                    report.clamped_connections += 1;
                }
            }

            let world = state.world().clone();
            let settings = self.config.world(world.name());
            let cache = self.cache(&world);
            let env = DispatchEnv {
                ctx: &self.ctx,
                pool: &self.pool,
                cache: &cache,
                synthesizer: ColumnSynthesizer::new(
                    self.ctx.host.world_seed(&world),
                    self.config.column,
                ),
                authoritative_radius,
                fake_allowed: self.config.fake_chunks_allowed(world.name()) && state.fake_enabled(),
            };

            let result = if settings.enabled {
                Self::update_connection(scheduler, &env, &mut state, self.config.view.shape)
            } else if !state.visibility().is_empty() {
                scheduler.retract_all(&env, &mut state)
            } else {
                DispatchReport::default()
            };

            if result.waiting {
                report.waiting_connections += 1;
            }
            report.dispatch.real_sent += result.real_sent;
            report.dispatch.fake_sent += result.fake_sent;
            report.dispatch.unloaded += result.unloaded;
            report.dispatch.synthesis_requested += result.synthesis_requested;
            report.dispatch.failures += result.failures;
            report.dispatch.waiting |= result.waiting;
        }
        for entry in &self.caches {
            if let Some(sweep) = entry.value().maybe_sweep() {
                report.sweeps.insert(entry.key().name().to_string(), sweep);
            }
        }

        report
    }

    fn update_connection(
        scheduler: &DispatchScheduler,
        env: &DispatchEnv<'_>,
        state: &mut ConnectionViewState,
        shape: crate::shape::ViewShape,
    ) -> DispatchReport {
        let Some(position) = state.last_position() else {
            return scheduler.dispatch(env, state);
        };
        let center = ViewCenter {
            world: state.world().clone(),
            chunk: position.chunk(),
        };
        let forced = state.take_force_update();
        let radius = state.effective_radius();
        let delta = state.visibility_mut().update(center, radius, shape);

        if forced {
            // Parameters changed without moving the set; pick up anything
            // skipped under the old ones (fake chunks that were disabled, or
            // chunks the host now serves itself).
            let visible: Vec<_> = state.visibility().ordered().to_vec();
            for coord in visible {
                state.enqueue(coord);
            }
        }

        scheduler.on_visibility_delta(env, state, &delta)
    }
}

impl Drop for ViewEngine {
    fn drop(&mut self) {
        self.pool.shutdown();
        debug!("View engine stopped after {} ticks", self.ticks.load(Ordering::Relaxed));
    }
}
