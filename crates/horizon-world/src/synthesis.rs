//! Column synthesis for fake chunks.
//!
//! Two entry points:
//! - [`ColumnSynthesizer::synthesize`] builds a column purely from the
//!   terrain approximation.
//! - [`ColumnSynthesizer::synthesize_from_source`] starts from a partially
//!   known real chunk and reuses its packed heightmap. Unusable source data
//!   falls back to a flat sea-level heightmap instead of failing.

use horizon_common::{ChunkCoord, SynthesisError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::column::{
    block_index, ChunkColumn, ChunkSection, ColumnResult, Heightmaps, SECTION_EDGE,
    SECTION_VOLUME,
};
use crate::packing::{self, HEIGHTMAP_ENTRIES};
use crate::terrain::{Biome, Material, TerrainSample, SEA_LEVEL};

/// Depth of the subsurface layer below the surface block.
const SUBSURFACE_DEPTH: i32 = 3;

/// Tallest column whose heightmap entries still fit in 9 bits.
pub const MAX_COLUMN_HEIGHT: i32 = ((1 << packing::HEIGHTMAP_BITS) - 1) / 16 * 16;

/// Lowest supported `min_y`.
pub const MIN_COLUMN_Y: i32 = -2_048;

/// Vertical extent of synthesized columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnLayout {
    /// Lowest block Y (multiple of 16)
    pub min_y: i32,
    /// Total height in blocks (multiple of 16)
    pub height: i32,
    /// Water fills up to this Y
    pub sea_level: i32,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            min_y: -64,
            height: 384,
            sea_level: SEA_LEVEL,
        }
    }
}

impl ColumnLayout {
    /// Highest block Y (inclusive).
    #[must_use]
    pub const fn max_y(&self) -> i32 {
        self.min_y + self.height - 1
    }

    /// Number of 16-block sections.
    #[must_use]
    pub const fn section_count(&self) -> usize {
        (self.height / SECTION_EDGE as i32) as usize
    }

    /// Clamps a Y value into the column.
    #[must_use]
    pub fn clamp_y(&self, y: i32) -> i32 {
        y.clamp(self.min_y, self.max_y())
    }

    /// Section-aligned copy whose heightmap entries fit in 9 bits.
    ///
    /// An entry is `top - min_y + 1` with `top <= max_y`, so it never
    /// exceeds `height`.
    #[must_use]
    pub fn normalized(self) -> Self {
        let min_y = self.min_y.clamp(MIN_COLUMN_Y, -MIN_COLUMN_Y).div_euclid(16) * 16;
        let height = self.height.clamp(16, MAX_COLUMN_HEIGHT) / 16 * 16;
        let mut layout = Self {
            min_y,
            height,
            sea_level: self.sea_level,
        };
        layout.sea_level = layout.clamp_y(self.sea_level);
        layout
    }

    /// Flat heightmap at sea level, used when source data is unusable.
    #[must_use]
    pub fn flat_heights(&self) -> Vec<i32> {
        vec![self.clamp_y(self.sea_level); HEIGHTMAP_ENTRIES]
    }
}

/// Partially known real chunk data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceChunk {
    /// Chunk coordinate
    pub coord: ChunkCoord,
    /// Whether generation reached the final status
    pub fully_generated: bool,
    /// Packed `MOTION_BLOCKING` heightmap, if present
    pub motion_blocking: Option<Vec<u64>>,
    /// Packed `WORLD_SURFACE` heightmap, if present
    pub world_surface: Option<Vec<u64>>,
}

/// Builds wire columns for a single world seed.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSynthesizer {
    seed: i64,
    layout: ColumnLayout,
}

impl ColumnSynthesizer {
    /// Creates a synthesizer for `seed`; `layout` is normalized first.
    #[must_use]
    pub fn new(seed: i64, layout: ColumnLayout) -> Self {
        Self {
            seed,
            layout: layout.normalized(),
        }
    }

    /// World seed.
    #[must_use]
    pub const fn seed(&self) -> i64 {
        self.seed
    }

    /// Column layout.
    #[must_use]
    pub const fn layout(&self) -> ColumnLayout {
        self.layout
    }

    /// Terrain sample at `coord`.
    #[must_use]
    pub fn sample(&self, coord: ChunkCoord) -> TerrainSample {
        TerrainSample::at(self.seed, coord)
    }

    /// Builds a column purely from the terrain approximation.
    #[must_use]
    pub fn synthesize(&self, coord: ChunkCoord) -> ChunkColumn {
        let sample = self.sample(coord);
        let heights = vec![self.layout.clamp_y(sample.surface_height); HEIGHTMAP_ENTRIES];
        self.build_or_flat(coord, &heights, sample.biome)
    }

    /// Builds a column from a partially known real chunk.
    #[must_use]
    pub fn synthesize_from_source(&self, source: &SourceChunk) -> ChunkColumn {
        let coord = source.coord;
        let heights = match self.decode_source_heights(source) {
            Ok(heights) => heights,
            Err(e) => {
                debug!("Using default heightmap for chunk {coord}: {e}");
                self.layout.flat_heights()
            },
        };
        self.build_or_flat(coord, &heights, self.sample(coord).biome)
    }

    /// Decodes absolute surface heights from a source chunk.
    pub fn decode_source_heights(&self, source: &SourceChunk) -> Result<Vec<i32>, SynthesisError> {
        let malformed = |reason: String| SynthesisError::MalformedSource {
            coord: source.coord,
            reason,
        };

        if !source.fully_generated {
            return Err(malformed("chunk not fully generated".into()));
        }

        let packed = source
            .motion_blocking
            .as_deref()
            .or(source.world_surface.as_deref())
            .ok_or_else(|| malformed("missing heightmap".into()))?;

        let entries = packing::unpack_heightmap(packed).map_err(|e| malformed(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|entry| self.layout.clamp_y(entry as i32 + self.layout.min_y - 1))
            .collect())
    }

    fn build_or_flat(&self, coord: ChunkCoord, heights: &[i32], biome: Biome) -> ChunkColumn {
        match self.build_column(coord, heights, biome) {
            Ok(column) => column,
            Err(e) => {
                debug!("Falling back to flat column for chunk {coord}: {e}");
                self.flat_column(coord, biome)
            },
        }
    }

    /// Fills a column from per-block-column surface heights.
    ///
    /// `heights` is indexed by `(z << 4) | x` and holds absolute Y values.
    pub fn build_column(
        &self,
        coord: ChunkCoord,
        heights: &[i32],
        biome: Biome,
    ) -> ColumnResult<ChunkColumn> {
        let layout = self.layout;
        let min_section = layout.min_y >> 4;
        let mut sections = Vec::with_capacity(layout.section_count());
        let mut blocks = vec![0u32; SECTION_VOLUME];

        for offset in 0..layout.section_count() as i32 {
            let section_y = min_section + offset;
            for ly in 0..SECTION_EDGE {
                let y = section_y * SECTION_EDGE as i32 + ly as i32;
                for z in 0..SECTION_EDGE {
                    for x in 0..SECTION_EDGE {
                        let surface = heights.get((z << 4) | x).copied().unwrap_or(layout.sea_level);
                        let material = self.material_at(y, surface, biome);
                        blocks[block_index(x, ly, z)] = material.block_state_id();
                    }
                }
            }
            sections.push(ChunkSection::from_blocks(section_y, &blocks, is_solid_state)?);
        }

        let entries: Vec<u32> = (0..HEIGHTMAP_ENTRIES)
            .map(|i| {
                let surface = heights.get(i).copied().unwrap_or(layout.sea_level);
                let top = surface.max(layout.sea_level).min(layout.max_y());
                (top - layout.min_y + 1) as u32
            })
            .collect();

        Ok(ChunkColumn {
            coord,
            sections,
            heightmaps: Heightmaps::from_entries(&entries)?,
            biomes: Some(vec![biome.registry_id(); 16]),
        })
    }

    fn material_at(&self, y: i32, surface: i32, biome: Biome) -> Material {
        if y == self.layout.min_y {
            Material::Bedrock
        } else if y > surface {
            if y <= self.layout.sea_level {
                Material::Water
            } else {
                Material::Air
            }
        } else if y == surface {
            crate::terrain::surface_material(biome, surface)
        } else if y >= surface - SUBSURFACE_DEPTH {
            biome.subsurface()
        } else {
            Material::Stone
        }
    }

    /// Column of uniform sections split at sea level; cannot fail.
    fn flat_column(&self, coord: ChunkCoord, biome: Biome) -> ChunkColumn {
        let layout = self.layout;
        let min_section = layout.min_y >> 4;
        let sea_section = layout.clamp_y(layout.sea_level) >> 4;
        let sections = (0..layout.section_count() as i32)
            .map(|offset| {
                let y = min_section + offset;
                if y <= sea_section {
                    ChunkSection::uniform(y, Material::Stone.block_state_id(), true)
                } else {
                    ChunkSection::uniform(y, Material::Air.block_state_id(), false)
                }
            })
            .collect();
        let top = ((sea_section + 1) * SECTION_EDGE as i32 - 1).min(layout.max_y());
        let entry = (top - layout.min_y + 1) as u32;
        let packed = packing::pack_heightmap(&[entry; HEIGHTMAP_ENTRIES]).unwrap_or_default();
        ChunkColumn {
            coord,
            sections,
            heightmaps: Heightmaps {
                motion_blocking: packed.clone(),
                world_surface: packed,
            },
            biomes: Some(vec![biome.registry_id(); 16]),
        }
    }
}

fn is_solid_state(state: u32) -> bool {
    state != Material::Air.block_state_id() && state != Material::Water.block_state_id()
}
