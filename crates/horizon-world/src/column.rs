//! Wire-level chunk column model.
//!
//! A column is keyed by its chunk coordinate and holds an ordered array of
//! 16x16x16 sections. Each section stores a block palette and a packed
//! index array (see [`crate::packing`]); single-valued sections carry no
//! index data. Heightmaps are 256 entries packed at 9 bits per entry, with
//! each entry holding `top_y - min_y + 1` (0 for an empty column).

use horizon_common::ChunkCoord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::packing::{self, PackingError, HEIGHTMAP_ENTRIES};

/// Blocks along one edge of a section.
pub const SECTION_EDGE: usize = 16;

/// Blocks in one section.
pub const SECTION_VOLUME: usize = SECTION_EDGE * SECTION_EDGE * SECTION_EDGE;

/// Minimum bits per entry for indirect block palettes.
pub const MIN_BLOCK_BITS: u32 = 4;

/// Heightmap key for the motion-blocking surface.
pub const MOTION_BLOCKING: &str = "MOTION_BLOCKING";

/// Heightmap key for the topmost non-air surface.
pub const WORLD_SURFACE: &str = "WORLD_SURFACE";

/// Column errors.
#[derive(Debug, Error)]
pub enum ColumnError {
    /// Serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    /// Deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    /// Structurally invalid column
    #[error("Invalid column at {coord}: {reason}")]
    Invalid {
        /// Column coordinate
        coord: ChunkCoord,
        /// What is wrong
        reason: String,
    },
    /// Packed data error
    #[error("Packing error: {0}")]
    Packing(#[from] PackingError),
}

/// Result type for column operations.
pub type ColumnResult<T> = Result<T, ColumnError>;

/// Linear index of a block inside a section (Y-major, then Z, then X).
#[must_use]
pub const fn block_index(x: usize, y: usize, z: usize) -> usize {
    (y << 8) | (z << 4) | x
}

/// One 16-block-tall slice of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSection {
    /// Section Y index (block Y / 16)
    pub y: i32,
    /// Number of non-air, non-fluid blocks
    pub block_count: u16,
    /// Bits per packed index (0 for single-valued sections)
    pub bits_per_entry: u8,
    /// Block state IDs referenced by index
    pub palette: Vec<u32>,
    /// Packed palette indices
    pub data: Vec<u64>,
}

impl ChunkSection {
    /// Builds a section from 4096 block state IDs in [`block_index`] order.
    ///
    /// `solid` decides which states count toward `block_count`.
    pub fn from_blocks(
        y: i32,
        blocks: &[u32],
        solid: impl Fn(u32) -> bool,
    ) -> ColumnResult<Self> {
        if blocks.len() != SECTION_VOLUME {
            return Err(ColumnError::Invalid {
                coord: ChunkCoord::default(),
                reason: format!("section {y} has {} blocks", blocks.len()),
            });
        }

        let mut palette: Vec<u32> = Vec::new();
        let mut indices = Vec::with_capacity(SECTION_VOLUME);
        let mut block_count = 0u16;

        for &state in blocks {
            let index = match palette.iter().position(|&id| id == state) {
                Some(index) => index,
                None => {
                    palette.push(state);
                    palette.len() - 1
                },
            };
            indices.push(index as u32);
            if solid(state) {
                block_count += 1;
            }
        }

        if palette.len() == 1 {
            return Ok(Self {
                y,
                block_count,
                bits_per_entry: 0,
                palette,
                data: Vec::new(),
            });
        }

        let bits = packing::bits_needed(palette.len() as u32 - 1).max(MIN_BLOCK_BITS);
        let data = packing::pack(&indices, bits)?;

        Ok(Self {
            y,
            block_count,
            bits_per_entry: bits as u8,
            palette,
            data,
        })
    }

    /// Builds a section filled with one block state.
    #[must_use]
    pub fn uniform(y: i32, state: u32, solid: bool) -> Self {
        Self {
            y,
            block_count: if solid { SECTION_VOLUME as u16 } else { 0 },
            bits_per_entry: 0,
            palette: vec![state],
            data: Vec::new(),
        }
    }

    /// Decodes all 4096 block state IDs.
    pub fn blocks(&self) -> ColumnResult<Vec<u32>> {
        if self.bits_per_entry == 0 {
            let state = self.palette.first().copied().unwrap_or_default();
            return Ok(vec![state; SECTION_VOLUME]);
        }

        let indices = packing::unpack(&self.data, u32::from(self.bits_per_entry), SECTION_VOLUME)?;
        indices
            .into_iter()
            .map(|index| {
                self.palette
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| ColumnError::Invalid {
                        coord: ChunkCoord::default(),
                        reason: format!("palette index {index} out of range in section {}", self.y),
                    })
            })
            .collect()
    }

    /// Block state at local coordinates.
    #[must_use]
    pub fn block_at(&self, x: usize, y: usize, z: usize) -> Option<u32> {
        if x >= SECTION_EDGE || y >= SECTION_EDGE || z >= SECTION_EDGE {
            return None;
        }
        if self.bits_per_entry == 0 {
            return self.palette.first().copied();
        }
        let bits = u32::from(self.bits_per_entry);
        let index = block_index(x, y, z);
        let word_bits = index * bits as usize;
        let word = *self.data.get(word_bits / 64)?;
        let offset = word_bits % 64;
        let mut value = word >> offset;
        if offset + bits as usize > 64 {
            value |= self.data.get(word_bits / 64 + 1)? << (64 - offset);
        }
        let palette_index = (value & ((1u64 << bits) - 1)) as usize;
        self.palette.get(palette_index).copied()
    }

    /// Cheap structural check: palette and data lengths agree.
    fn check(&self) -> Result<(), String> {
        if self.palette.is_empty() {
            return Err(format!("section {} has an empty palette", self.y));
        }
        if self.bits_per_entry == 0 {
            if self.palette.len() != 1 || !self.data.is_empty() {
                return Err(format!("single-valued section {} is inconsistent", self.y));
            }
            return Ok(());
        }
        if u32::from(self.bits_per_entry) > 32 {
            return Err(format!("section {} has {} bits per entry", self.y, self.bits_per_entry));
        }
        let expected = packing::packed_len(SECTION_VOLUME, u32::from(self.bits_per_entry));
        if self.data.len() != expected {
            return Err(format!(
                "section {} has {} data words, expected {expected}",
                self.y,
                self.data.len()
            ));
        }
        if (1usize << self.bits_per_entry) < self.palette.len() {
            return Err(format!("section {} palette too large for width", self.y));
        }
        Ok(())
    }
}

/// Packed surface heightmaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heightmaps {
    /// Topmost motion-blocking block (solids and fluids)
    pub motion_blocking: Vec<u64>,
    /// Topmost non-air block
    pub world_surface: Vec<u64>,
}

impl Heightmaps {
    /// Packs identical motion-blocking and world-surface maps.
    pub fn from_entries(entries: &[u32]) -> ColumnResult<Self> {
        let packed = packing::pack_heightmap(entries)?;
        Ok(Self {
            motion_blocking: packed.clone(),
            world_surface: packed,
        })
    }

    /// Looks up a heightmap by its wire key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u64]> {
        match key {
            MOTION_BLOCKING => Some(&self.motion_blocking),
            WORLD_SURFACE => Some(&self.world_surface),
            _ => None,
        }
    }

    /// Unpacked motion-blocking entries.
    pub fn motion_blocking_entries(&self) -> ColumnResult<Vec<u32>> {
        Ok(packing::unpack_heightmap(&self.motion_blocking)?)
    }
}

/// A full chunk column as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkColumn {
    /// Column coordinate
    pub coord: ChunkCoord,
    /// Sections ordered bottom to top
    pub sections: Vec<ChunkSection>,
    /// Surface heightmaps
    pub heightmaps: Heightmaps,
    /// Optional biome IDs (one per 4x4 horizontal cell)
    pub biomes: Option<Vec<u32>>,
}

impl ChunkColumn {
    /// Serializes the column to bytes.
    pub fn encode(&self) -> ColumnResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ColumnError::SerializationFailed(e.to_string()))
    }

    /// Deserializes a column from bytes.
    pub fn decode(bytes: &[u8]) -> ColumnResult<Self> {
        let column: Self = bincode::deserialize(bytes)
            .map_err(|e| ColumnError::DeserializationFailed(e.to_string()))?;
        column.validate()?;
        Ok(column)
    }

    /// Size of the encoded payload in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }

    /// Section containing block Y, if any.
    #[must_use]
    pub fn section_at(&self, block_y: i32) -> Option<&ChunkSection> {
        let section_y = block_y >> 4;
        self.sections.iter().find(|s| s.y == section_y)
    }

    /// Absolute surface heights decoded from the motion-blocking map.
    pub fn surface_heights(&self, min_y: i32) -> ColumnResult<Vec<i32>> {
        Ok(self
            .heightmaps
            .motion_blocking_entries()?
            .into_iter()
            .map(|entry| entry as i32 + min_y - 1)
            .collect())
    }

    /// Structural validation; cheap enough to run on every cache read.
    pub fn validate(&self) -> ColumnResult<()> {
        let invalid = |reason: String| ColumnError::Invalid {
            coord: self.coord,
            reason,
        };

        if self.sections.is_empty() {
            return Err(invalid("no sections".into()));
        }
        for pair in self.sections.windows(2) {
            if pair[1].y != pair[0].y + 1 {
                return Err(invalid(format!(
                    "sections {} and {} are not contiguous",
                    pair[0].y, pair[1].y
                )));
            }
        }
        for section in &self.sections {
            section.check().map_err(invalid)?;
        }

        let expected = packing::packed_len(HEIGHTMAP_ENTRIES, packing::HEIGHTMAP_BITS);
        for (key, map) in [
            (MOTION_BLOCKING, &self.heightmaps.motion_blocking),
            (WORLD_SURFACE, &self.heightmaps.world_surface),
        ] {
            if map.len() != expected {
                return Err(invalid(format!(
                    "{key} heightmap has {} words, expected {expected}",
                    map.len()
                )));
            }
        }
        Ok(())
    }
}
