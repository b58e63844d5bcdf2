//! Regional cache of synthesized and intercepted chunk columns.
//!
//! Entries are grouped into 32x32-chunk regions so that aging and eviction
//! operate on whole regions. Reads validate the stored payload; a corrupt
//! entry is dropped and reported as a miss.

use dashmap::DashMap;
use horizon_common::{ChunkCoord, Clock, RegionCoord, SynthesisError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::column::ChunkColumn;

/// Cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries untouched for this long are dropped by a sweep
    pub ttl_millis: u64,
    /// Minimum time between sweeps
    pub sweep_interval_millis: u64,
    /// Entry count that triggers emergency eviction
    pub max_entries: usize,
    /// Rough per-entry size used for memory estimates
    pub estimated_entry_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_millis: 300_000,
            sweep_interval_millis: 60_000,
            max_entries: 65_536,
            estimated_entry_bytes: 1_024,
        }
    }
}

/// Where a cached payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Built by the synthesizer
    Synthesized,
    /// Captured from an outgoing real chunk packet
    Intercepted,
}

/// One cached column.
#[derive(Debug)]
pub struct CachedChunkEntry {
    payload: Arc<ChunkColumn>,
    provenance: Provenance,
    created_at: u64,
    last_access: AtomicU64,
}

impl CachedChunkEntry {
    fn new(payload: Arc<ChunkColumn>, provenance: Provenance, now: u64) -> Self {
        Self {
            payload,
            provenance,
            created_at: now,
            last_access: AtomicU64::new(now),
        }
    }

    /// Shared payload.
    #[must_use]
    pub fn payload(&self) -> &Arc<ChunkColumn> {
        &self.payload
    }

    /// Where the payload came from.
    #[must_use]
    pub const fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Insertion time.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last read or write time.
    #[must_use]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }
}

/// A 32x32-chunk group of cache entries.
#[derive(Debug)]
pub struct Region {
    coord: RegionCoord,
    created_at: u64,
    last_access: AtomicU64,
    entries: DashMap<ChunkCoord, CachedChunkEntry>,
}

impl Region {
    fn new(coord: RegionCoord, now: u64) -> Self {
        Self {
            coord,
            created_at: now,
            last_access: AtomicU64::new(now),
            entries: DashMap::new(),
        }
    }

    /// Region coordinate.
    #[must_use]
    pub const fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Most recent access to the region or any of its entries.
    #[must_use]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the region holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `coord` is cached here.
    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.entries.contains_key(&coord)
    }

    fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }

    fn get(&self, coord: ChunkCoord, now: u64) -> Option<Arc<ChunkColumn>> {
        let entry = self.entries.get(&coord)?;
        entry.touch(now);
        self.touch(now);
        Some(Arc::clone(&entry.payload))
    }

    fn insert(&self, coord: ChunkCoord, entry: CachedChunkEntry, now: u64) {
        self.entries.insert(coord, entry);
        self.touch(now);
    }

    fn remove(&self, coord: ChunkCoord) -> bool {
        self.entries.remove(&coord).is_some()
    }

    /// Drops entries last touched before `cutoff`; returns how many.
    fn sweep_expired(&self, cutoff: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_access() >= cutoff);
        before.saturating_sub(self.entries.len())
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Entries dropped for exceeding the TTL
    pub expired_entries: usize,
    /// Empty regions dropped
    pub removed_regions: usize,
    /// Regions dropped by emergency eviction
    pub emergency_regions: usize,
    /// Entries dropped by emergency eviction
    pub emergency_entries: usize,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Live regions
    pub regions: usize,
    /// Live entries
    pub entries: usize,
    /// Approximate memory held by entries
    pub estimated_bytes: usize,
    /// Reads that found a valid entry
    pub hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Entries stored from the synthesizer
    pub synthesized: u64,
    /// Entries stored from intercepted packets
    pub intercepted: u64,
    /// Entries dropped by TTL sweeps
    pub ttl_evicted: u64,
    /// Entries dropped by emergency eviction
    pub emergency_evicted: u64,
    /// Entries dropped because validation failed on read
    pub corrupt_dropped: u64,
    /// hits / (hits + misses), 0 when idle
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    synthesized: AtomicU64,
    intercepted: AtomicU64,
    ttl_evicted: AtomicU64,
    emergency_evicted: AtomicU64,
    corrupt_dropped: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Region-keyed cache of chunk columns for one world.
pub struct RegionCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    regions: DashMap<RegionCoord, Arc<Region>>,
    last_sweep: AtomicU64,
    counters: CacheCounters,
}

impl std::fmt::Debug for RegionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionCache")
            .field("config", &self.config)
            .field("regions", &self.regions.len())
            .finish_non_exhaustive()
    }
}

impl RegionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            config,
            clock,
            regions: DashMap::new(),
            last_sweep: AtomicU64::new(now),
            counters: CacheCounters::default(),
        }
    }

    /// Cache configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up a column, refreshing its access time.
    ///
    /// A stored column that fails validation is removed and counted as a
    /// miss.
    pub fn get(&self, coord: ChunkCoord) -> Option<Arc<ChunkColumn>> {
        let now = self.clock.now_millis();
        let found = self
            .regions
            .get(&coord.region())
            .and_then(|region| region.get(coord, now).map(|c| (Arc::clone(&region), c)));

        match found {
            Some((region, column)) => {
                if let Err(e) = column.validate() {
                    warn!("Dropping corrupt cache entry {coord}: {e}");
                    region.remove(coord);
                    CacheCounters::bump(&self.counters.corrupt_dropped, 1);
                    CacheCounters::bump(&self.counters.misses, 1);
                    return None;
                }
                CacheCounters::bump(&self.counters.hits, 1);
                Some(column)
            },
            None => {
                CacheCounters::bump(&self.counters.misses, 1);
                None
            },
        }
    }

    /// Whether `coord` has an entry, without touching it.
    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.regions
            .get(&coord.region())
            .is_some_and(|region| region.contains(coord))
    }

    /// Returns the region at `coord`, creating it if absent.
    ///
    /// Concurrent callers for the same coordinate observe the same region.
    pub fn get_or_create(&self, coord: RegionCoord) -> Arc<Region> {
        let now = self.clock.now_millis();
        let region = self
            .regions
            .entry(coord)
            .or_insert_with(|| {
                debug!("Created cache region {coord}");
                Arc::new(Region::new(coord, now))
            })
            .value()
            .clone();
        region.touch(now);
        region
    }

    /// Existing region at `coord`.
    #[must_use]
    pub fn region(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        self.regions.get(&coord).map(|r| Arc::clone(r.value()))
    }

    /// Stores a column, replacing any previous entry.
    pub fn insert(
        &self,
        coord: ChunkCoord,
        column: ChunkColumn,
        provenance: Provenance,
    ) -> Arc<ChunkColumn> {
        let now = self.clock.now_millis();
        let payload = Arc::new(column);
        let region = self.get_or_create(coord.region());
        region.insert(
            coord,
            CachedChunkEntry::new(Arc::clone(&payload), provenance, now),
            now,
        );
        let counter = match provenance {
            Provenance::Synthesized => &self.counters.synthesized,
            Provenance::Intercepted => &self.counters.intercepted,
        };
        CacheCounters::bump(counter, 1);
        payload
    }

    /// Stores a real column captured on its way to a client.
    pub fn intercept(&self, column: ChunkColumn) -> Arc<ChunkColumn> {
        let coord = column.coord;
        self.insert(coord, column, Provenance::Intercepted)
    }

    /// Returns the cached column or runs `produce` and caches its result.
    ///
    /// A failed producer leaves the cache untouched and yields `None`.
    pub fn fill_with<F>(&self, coord: ChunkCoord, produce: F) -> Option<Arc<ChunkColumn>>
    where
        F: FnOnce() -> Result<ChunkColumn, SynthesisError>,
    {
        if let Some(column) = self.get(coord) {
            return Some(column);
        }
        match produce() {
            Ok(column) => Some(self.insert(coord, column, Provenance::Synthesized)),
            Err(e) => {
                warn!("Failed to produce chunk {coord}: {e}");
                None
            },
        }
    }

    /// Removes a single entry.
    pub fn remove(&self, coord: ChunkCoord) -> bool {
        self.regions
            .get(&coord.region())
            .is_some_and(|region| region.remove(coord))
    }

    /// Drops a whole region; returns how many entries it held.
    pub fn evict_region(&self, coord: RegionCoord) -> usize {
        match self.regions.remove(&coord) {
            Some((_, region)) => {
                debug!("Evicted cache region {coord} ({} entries)", region.len());
                region.len()
            },
            None => 0,
        }
    }

    /// Drops every region.
    pub fn clear_all(&self) -> usize {
        let entries = self.entry_count();
        self.regions.clear();
        entries
    }

    /// Runs [`Self::sweep`] if the sweep interval has elapsed.
    pub fn maybe_sweep(&self) -> Option<SweepReport> {
        let now = self.clock.now_millis();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.config.sweep_interval_millis {
            return None;
        }
        // Only one caller wins the interval.
        self.last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        Some(self.sweep())
    }

    /// Drops expired entries and empty regions, then evicts the oldest
    /// regions while over the entry cap.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(self.config.ttl_millis);
        let mut report = SweepReport::default();

        for region in &self.regions {
            report.expired_entries += region.sweep_expired(cutoff);
        }

        let before = self.regions.len();
        self.regions
            .retain(|_, region| !region.is_empty() || region.last_access() >= cutoff);
        report.removed_regions = before.saturating_sub(self.regions.len());

        CacheCounters::bump(&self.counters.ttl_evicted, report.expired_entries as u64);

        let total = self.entry_count();
        if total > self.config.max_entries {
            warn!(
                "Chunk cache over capacity ({total} > {}), evicting oldest regions",
                self.config.max_entries
            );
            self.emergency_evict(&mut report);
            info!(
                "Emergency eviction dropped {} regions ({} entries)",
                report.emergency_regions, report.emergency_entries
            );
        }

        if report.expired_entries > 0 || report.removed_regions > 0 {
            debug!(
                "Cache sweep: {} expired entries, {} empty regions",
                report.expired_entries, report.removed_regions
            );
        }
        report
    }

    fn emergency_evict(&self, report: &mut SweepReport) {
        while self.entry_count() > self.config.max_entries && !self.regions.is_empty() {
            let mut by_age: Vec<(RegionCoord, u64)> = self
                .regions
                .iter()
                .map(|r| (*r.key(), r.last_access()))
                .collect();
            by_age.sort_by_key(|&(coord, last_access)| (last_access, coord));

            let quartile = (by_age.len() / 4).max(1);
            for (coord, _) in by_age.into_iter().take(quartile) {
                if let Some((_, region)) = self.regions.remove(&coord) {
                    report.emergency_regions += 1;
                    report.emergency_entries += region.len();
                }
            }
        }
        CacheCounters::bump(
            &self.counters.emergency_evicted,
            report.emergency_entries as u64,
        );
    }

    /// Live entries across all regions.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.regions.iter().map(|r| r.len()).sum()
    }

    /// Live regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Approximate memory held by entries.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.entry_count() * self.config.estimated_entry_bytes
    }

    /// Snapshot of counters and sizes.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let hits = load(&self.counters.hits);
        let misses = load(&self.counters.misses);
        let lookups = hits + misses;
        let entries = self.entry_count();
        CacheStatistics {
            regions: self.region_count(),
            entries,
            estimated_bytes: entries * self.config.estimated_entry_bytes,
            hits,
            misses,
            synthesized: load(&self.counters.synthesized),
            intercepted: load(&self.counters.intercepted),
            ttl_evicted: load(&self.counters.ttl_evicted),
            emergency_evicted: load(&self.counters.emergency_evicted),
            corrupt_dropped: load(&self.counters.corrupt_dropped),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
