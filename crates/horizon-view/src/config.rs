//! Engine configuration.
//!
//! Loaded from a TOML file; every section and field falls back to its
//! default when missing.

use horizon_world::{CacheConfig, ColumnLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::scheduler::DispatchConfig;
use crate::shape::ViewShape;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "horizon.toml";

/// View radius settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// Smallest radius a connection may request
    pub min_distance: i32,
    /// Largest radius a connection may request
    pub max_distance: i32,
    /// Radius given to new connections
    pub default_distance: i32,
    /// Footprint of the visible area
    pub shape: ViewShape,
    /// Global fake chunk switch
    pub enable_fake_chunks: bool,
    /// Distance beyond which visible chunks are labeled fake in statistics
    pub fake_start_distance: i32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            min_distance: 2,
            max_distance: 64,
            default_distance: 16,
            shape: ViewShape::Circle,
            enable_fake_chunks: true,
            fake_start_distance: 33,
        }
    }
}

/// Send budget and threading settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Chunks sent per tick across all connections
    pub max_chunks_per_tick: u32,
    /// Base chunks sent per tick for one connection
    pub per_connection_chunks_per_tick: u32,
    /// Ceiling for the waiting boost
    pub waiting_boost_cap: u32,
    /// Synthesis threads (0 = one per CPU core)
    pub worker_threads: usize,
    /// Tick period in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_chunks_per_tick: 5,
            per_connection_chunks_per_tick: 5,
            waiting_boost_cap: 10,
            worker_threads: 0,
            tick_interval_ms: 50,
        }
    }
}

/// Chunk cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Seconds an untouched entry survives
    pub ttl_secs: u64,
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
    /// Entry count that triggers emergency eviction
    pub max_entries: usize,
    /// Rough per-entry size for memory estimates
    pub estimated_entry_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 60,
            max_entries: 65_536,
            estimated_entry_bytes: 1_024,
        }
    }
}

/// Permission refresh settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    /// Seconds between ceiling refreshes per connection
    pub check_interval_secs: u64,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
        }
    }
}

/// Movement detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementSettings {
    /// Horizontal speed above which a connection counts as moving fast
    pub fast_speed_blocks_per_sec: f64,
}

impl Default for MovementSettings {
    fn default() -> Self {
        Self {
            fast_speed_blocks_per_sec: 20.0,
        }
    }
}

/// Per-world overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Whether the engine serves this world at all
    pub enabled: bool,
    /// Radius ceiling for this world
    pub max_distance: Option<i32>,
    /// Fake chunk switch for this world
    pub fake_chunks_enabled: bool,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_distance: None,
            fake_chunks_enabled: true,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// View radius settings
    pub view: ViewSettings,
    /// Budgets and threads
    pub performance: PerformanceSettings,
    /// Chunk cache
    pub cache: CacheSettings,
    /// Permission refresh
    pub permissions: PermissionSettings,
    /// Movement detection
    pub movement: MovementSettings,
    /// Synthesized column layout
    pub column: ColumnLayout,
    /// Per-world overrides keyed by world name
    pub worlds: BTreeMap<String, WorldSettings>,
}

impl HorizonConfig {
    /// Loads configuration from `path`.
    /// Returns defaults if the file is missing or invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            },
        };

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Saves configuration to `path` as pretty TOML.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamps values into sane ranges.
    pub fn validate(&mut self) {
        let view = &mut self.view;
        view.min_distance = view.min_distance.clamp(0, 256);
        view.max_distance = view.max_distance.clamp(view.min_distance, 256);
        view.default_distance = view
            .default_distance
            .clamp(view.min_distance, view.max_distance);
        view.fake_start_distance = view.fake_start_distance.max(0);

        let perf = &mut self.performance;
        perf.max_chunks_per_tick = perf.max_chunks_per_tick.max(1);
        perf.per_connection_chunks_per_tick = perf.per_connection_chunks_per_tick.max(1);
        perf.waiting_boost_cap = perf
            .waiting_boost_cap
            .max(perf.per_connection_chunks_per_tick);
        perf.tick_interval_ms = perf.tick_interval_ms.clamp(1, 1_000);

        self.cache.ttl_secs = self.cache.ttl_secs.max(1);
        self.cache.sweep_interval_secs = self.cache.sweep_interval_secs.max(1);
        self.cache.max_entries = self.cache.max_entries.max(1);

        self.movement.fast_speed_blocks_per_sec = self.movement.fast_speed_blocks_per_sec.max(0.0);

        self.column = self.column.normalized();

        for world in self.worlds.values_mut() {
            if let Some(max) = world.max_distance.as_mut() {
                *max = (*max).max(0);
            }
        }
    }

    /// Settings for `world`, falling back to defaults for unlisted worlds.
    #[must_use]
    pub fn world(&self, world: &str) -> WorldSettings {
        self.worlds.get(world).cloned().unwrap_or_default()
    }

    /// Largest radius allowed in `world`.
    #[must_use]
    pub fn world_max_distance(&self, world: &str) -> i32 {
        self.world(world)
            .max_distance
            .map_or(self.view.max_distance, |max| max.min(self.view.max_distance))
    }

    /// Whether fake chunks are allowed in `world`.
    #[must_use]
    pub fn fake_chunks_allowed(&self, world: &str) -> bool {
        let settings = self.world(world);
        self.view.enable_fake_chunks && settings.enabled && settings.fake_chunks_enabled
    }

    /// Dispatch budgets.
    #[must_use]
    pub const fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            max_chunks_per_tick: self.performance.max_chunks_per_tick,
            per_connection_chunks_per_tick: self.performance.per_connection_chunks_per_tick,
            waiting_boost_cap: self.performance.waiting_boost_cap,
        }
    }

    /// Cache settings in milliseconds.
    #[must_use]
    pub const fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl_millis: self.cache.ttl_secs * 1_000,
            sweep_interval_millis: self.cache.sweep_interval_secs * 1_000,
            max_entries: self.cache.max_entries,
            estimated_entry_bytes: self.cache.estimated_entry_bytes,
        }
    }

    /// Permission refresh interval in milliseconds.
    #[must_use]
    pub const fn permission_interval_millis(&self) -> u64 {
        self.permissions.check_interval_secs * 1_000
    }
}
