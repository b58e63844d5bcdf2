//! Coordinate types for block positions, chunks, and regions.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Horizontal footprint of a chunk in blocks (16x16).
pub const CHUNK_WIDTH: i32 = 16;

/// Chunks per region edge (32x32 chunks per region).
pub const CHUNKS_PER_REGION: i32 = 32;

/// Block-space position of a connection (global position).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BlockPosition {
    /// X coordinate in block space
    pub x: f64,
    /// Y coordinate in block space
    pub y: f64,
    /// Z coordinate in block space
    pub z: f64,
}

impl BlockPosition {
    /// Creates a new block position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the chunk containing this position.
    #[must_use]
    pub fn chunk(self) -> ChunkCoord {
        ChunkCoord::from_block(self.x.floor() as i32, self.z.floor() as i32)
    }

    /// Horizontal (XZ-plane) distance to another position.
    #[must_use]
    pub fn horizontal_distance(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// Chunk coordinate (identifies a 16x16 column in the world grid).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Pod,
    Zeroable,
    Default,
)]
#[repr(C)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the chunk containing the given block column.
    #[must_use]
    pub const fn from_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x >> 4,
            z: block_z >> 4,
        }
    }

    /// Packs the coordinate into a 64-bit key: low word X, high word Z.
    #[must_use]
    pub const fn key(self) -> u64 {
        (self.x as u32 as u64) | ((self.z as u32 as u64) << 32)
    }

    /// Inverse of [`ChunkCoord::key`].
    #[must_use]
    pub const fn from_key(key: u64) -> Self {
        Self {
            x: key as u32 as i32,
            z: (key >> 32) as u32 as i32,
        }
    }

    /// Returns the region owning this chunk.
    #[must_use]
    pub const fn region(self) -> RegionCoord {
        RegionCoord::from_chunk(self)
    }

    /// Returns this coordinate shifted by the given chunk offsets.
    #[must_use]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Squared Euclidean distance in chunk space.
    #[must_use]
    pub const fn distance_squared(self, other: Self) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dz * dz
    }

    /// Chebyshev distance in chunk space.
    #[must_use]
    pub const fn chebyshev_distance(self, other: Self) -> i64 {
        let dx = (self.x as i64 - other.x as i64).abs();
        let dz = (self.z as i64 - other.z as i64).abs();
        if dx > dz {
            dx
        } else {
            dz
        }
    }

    /// Block coordinate of the chunk's minimum corner.
    #[must_use]
    pub const fn block_origin(self) -> (i64, i64) {
        (
            self.x as i64 * CHUNK_WIDTH as i64,
            self.z as i64 * CHUNK_WIDTH as i64,
        )
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Region coordinate (a 32x32 block of chunks).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct RegionCoord {
    /// Region X.
    pub x: i32,
    /// Region Z.
    pub z: i32,
}

impl RegionCoord {
    /// Creates a new region coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region owning the given chunk.
    #[must_use]
    pub const fn from_chunk(chunk: ChunkCoord) -> Self {
        Self {
            x: chunk.x >> 5,
            z: chunk.z >> 5,
        }
    }

    /// Returns true if the chunk belongs to this region.
    #[must_use]
    pub const fn contains(self, chunk: ChunkCoord) -> bool {
        chunk.x >> 5 == self.x && chunk.z >> 5 == self.z
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r.{}.{}", self.x, self.z)
    }
}
