//! # Horizon
//!
//! Drives the extended-view-distance engine against a simulated host.
//!
//! Usage: `horizon [config.toml] [ticks] [players]`. Without a tick count
//! the loop runs until Ctrl-C. Final statistics are printed as JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod sim;

use anyhow::{Context, Result};
use horizon_common::{SystemClock, WorldId};
use horizon_view::{EngineContext, HorizonConfig, ViewEngine, CONFIG_FILE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::sim::SimulatedHost;

const DEFAULT_PLAYERS: u32 = 8;
const AUTHORITATIVE_RADIUS: i32 = 10;
const WALK_BLOCKS_PER_TICK: f64 = 0.2;
const WORLD_SEED: i64 = 0x5EED;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("horizon=info".parse()?))
        .init();

    info!("Horizon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| CONFIG_FILE.to_string());
    let ticks = args
        .next()
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .context("tick count must be a number")?;
    let players = args
        .next()
        .map(|raw| raw.parse::<u32>())
        .transpose()
        .context("player count must be a number")?
        .unwrap_or(DEFAULT_PLAYERS);

    let config = HorizonConfig::load_from(&config_path);
    let period = Duration::from_millis(config.performance.tick_interval_ms);

    let host = Arc::new(SimulatedHost::new(WORLD_SEED, AUTHORITATIVE_RADIUS));
    let ctx = EngineContext::new(host.clone(), Arc::new(SystemClock::new()));
    let engine = ViewEngine::new(config, ctx).context("failed to start view engine")?;

    let world = WorldId::new("overworld");
    for player in host.spawn_players(&world, players, WALK_BLOCKS_PER_TICK) {
        engine.connect(player.id, player.world, player.position, None);
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ran = 0u64;

    loop {
        if ticks.is_some_and(|limit| ran >= limit) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                for player in host.step() {
                    engine.submit_movement(player.id, player.world, player.position);
                }
                let report = engine.tick();
                ran = report.tick;
                if report.dispatch.sent() > 0 || report.dispatch.unloaded > 0 {
                    debug!(
                        "Tick {}: {} real, {} fake, {} unloaded, {} waiting",
                        report.tick,
                        report.dispatch.real_sent,
                        report.dispatch.fake_sent,
                        report.dispatch.unloaded,
                        report.waiting_connections
                    );
                }
                for (world, sweep) in &report.sweeps {
                    info!(
                        "Swept {world}: {} expired, {} regions removed",
                        sweep.expired_entries, sweep.removed_regions
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let (forwarded, fake, unloaded, bytes) = host.totals();
    info!("{ran} ticks: {forwarded} real, {fake} fake, {unloaded} unloaded, {bytes} bytes");
    println!("{}", serde_json::to_string_pretty(&engine.statistics())?);

    info!("Horizon shutdown complete");
    Ok(())
}
