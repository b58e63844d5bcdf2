//! Per-connection visible chunk sets and their deltas.

use ahash::AHashSet;
use horizon_common::{ChunkCoord, WorldId};

use crate::shape::ViewShape;

/// Chunk displacement on either axis beyond which an update is treated as a
/// jump (teleport) rather than a walk.
pub const INCREMENTAL_THRESHOLD: i32 = 2;

/// Where a connection is looking from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewCenter {
    /// World the connection is in
    pub world: WorldId,
    /// Chunk the connection stands in
    pub chunk: ChunkCoord,
}

impl ViewCenter {
    /// Creates a view center.
    #[must_use]
    pub fn new(world: impl Into<WorldId>, chunk: ChunkCoord) -> Self {
        Self {
            world: world.into(),
            chunk,
        }
    }
}

/// How an update was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// Cold start, jump, world change, or parameter change
    Full,
    /// Short walk from the previous center
    Incremental,
    /// Nothing changed
    Unchanged,
}

/// Changes produced by one [`VisibilityMap::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityDelta {
    /// How the new set was computed
    pub kind: UpdateKind,
    /// Coordinates that became visible, in enumeration order
    pub new_chunks: Vec<ChunkCoord>,
    /// Coordinates no longer visible
    pub removed_chunks: Vec<ChunkCoord>,
    /// Visible coordinates beyond the fake-start distance
    pub fake_chunks: Vec<ChunkCoord>,
}

impl VisibilityDelta {
    fn unchanged() -> Self {
        Self {
            kind: UpdateKind::Unchanged,
            new_chunks: Vec::new(),
            removed_chunks: Vec::new(),
            fake_chunks: Vec::new(),
        }
    }

    /// Whether the update added or removed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_chunks.is_empty() && self.removed_chunks.is_empty()
    }
}

/// Visible chunk set for one connection.
#[derive(Debug, Clone)]
pub struct VisibilityMap {
    center: Option<ViewCenter>,
    radius: i32,
    shape: ViewShape,
    fake_start: i32,
    fake_labelled: usize,
    visible: AHashSet<ChunkCoord>,
    order: Vec<ChunkCoord>,
}

impl VisibilityMap {
    /// Creates an empty map.
    ///
    /// `fake_start` only labels coordinates for statistics; real/fake
    /// dispatch uses the authoritative radius.
    #[must_use]
    pub fn new(fake_start: i32) -> Self {
        Self {
            center: None,
            radius: 0,
            shape: ViewShape::default(),
            fake_start,
            fake_labelled: 0,
            visible: AHashSet::new(),
            order: Vec::new(),
        }
    }

    /// Recomputes the visible set around `center`.
    pub fn update(&mut self, center: ViewCenter, radius: i32, shape: ViewShape) -> VisibilityDelta {
        let radius = radius.max(0);
        let kind = match &self.center {
            Some(prev)
                if prev == &center && radius == self.radius && shape == self.shape =>
            {
                return VisibilityDelta::unchanged();
            },
            Some(prev) if Self::is_walk(prev, &center) && radius == self.radius && shape == self.shape => {
                UpdateKind::Incremental
            },
            _ => UpdateKind::Full,
        };

        let world_changed = self.center.as_ref().is_some_and(|prev| prev.world != center.world);
        let next_order = shape.enumerate(center.chunk, radius);
        let next: AHashSet<ChunkCoord> = next_order.iter().copied().collect();

        let (new_chunks, removed_chunks) = if world_changed {
            (next_order.clone(), std::mem::take(&mut self.order))
        } else {
            let added = next_order
                .iter()
                .copied()
                .filter(|c| !self.visible.contains(c))
                .collect();
            let removed = self
                .order
                .iter()
                .copied()
                .filter(|c| !next.contains(c))
                .collect();
            (added, removed)
        };

        let fake_chunks = self.fake_subset(center.chunk, &next_order);

        self.fake_labelled = fake_chunks.len();
        self.center = Some(center);
        self.radius = radius;
        self.shape = shape;
        self.visible = next;
        self.order = next_order;

        VisibilityDelta {
            kind,
            new_chunks,
            removed_chunks,
            fake_chunks,
        }
    }

    fn is_walk(prev: &ViewCenter, next: &ViewCenter) -> bool {
        prev.world == next.world
            && (i64::from(prev.chunk.x) - i64::from(next.chunk.x)).abs()
                <= i64::from(INCREMENTAL_THRESHOLD)
            && (i64::from(prev.chunk.z) - i64::from(next.chunk.z)).abs()
                <= i64::from(INCREMENTAL_THRESHOLD)
    }

    fn fake_subset(&self, center: ChunkCoord, coords: &[ChunkCoord]) -> Vec<ChunkCoord> {
        let start = i64::from(self.fake_start.max(0));
        coords
            .iter()
            .copied()
            .filter(|c| center.distance_squared(*c) > start * start)
            .collect()
    }

    /// Currently visible coordinates.
    #[must_use]
    pub const fn current_set(&self) -> &AHashSet<ChunkCoord> {
        &self.visible
    }

    /// Currently visible coordinates in enumeration order.
    #[must_use]
    pub fn ordered(&self) -> &[ChunkCoord] {
        &self.order
    }

    /// Whether `coord` is visible.
    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.visible.contains(&coord)
    }

    /// Number of visible coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether nothing is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Visible coordinates beyond the fake start distance.
    #[must_use]
    pub const fn fake_labelled(&self) -> usize {
        self.fake_labelled
    }

    /// Last center, if any.
    #[must_use]
    pub const fn center(&self) -> Option<&ViewCenter> {
        self.center.as_ref()
    }

    /// Radius of the last update.
    #[must_use]
    pub const fn radius(&self) -> i32 {
        self.radius
    }

    /// Shape of the last update.
    #[must_use]
    pub const fn shape(&self) -> ViewShape {
        self.shape
    }

    /// Forgets everything; the next update is a cold start.
    pub fn reset(&mut self) {
        self.center = None;
        self.fake_labelled = 0;
        self.visible.clear();
        self.order.clear();
    }
}
