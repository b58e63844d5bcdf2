//! Deterministic terrain approximation.
//!
//! Every function here is pure: the same `(seed, x, z)` always yields the
//! same result, so connections requesting the same coordinate agree without
//! coordination.

use horizon_common::ChunkCoord;
use serde::{Deserialize, Serialize};

/// Base surface height the octaves oscillate around.
pub const BASE_HEIGHT: i32 = 64;

/// Amplitude multiplier applied to the summed octaves.
pub const HEIGHT_AMPLITUDE: f64 = 32.0;

/// Default sea level.
pub const SEA_LEVEL: i32 = 63;

/// Biome tags produced by the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Biome {
    /// Hot and dry
    Desert,
    /// Hot and humid
    Jungle,
    /// Cold and humid
    SnowyTaiga,
    /// Cold and dry
    SnowyPlains,
    /// Temperate and humid
    Forest,
    /// Temperate and dry
    Plains,
}

impl Biome {
    /// Numeric ID written into biome arrays.
    #[must_use]
    pub const fn registry_id(self) -> u32 {
        match self {
            Self::Plains => 1,
            Self::Desert => 3,
            Self::Forest => 7,
            Self::SnowyPlains => 13,
            Self::SnowyTaiga => 33,
            Self::Jungle => 23,
        }
    }

    /// Block placed just below the surface block.
    #[must_use]
    pub const fn subsurface(self) -> Material {
        match self {
            Self::Desert => Material::Sand,
            _ => Material::Dirt,
        }
    }
}

/// Block materials used in synthesized columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Material {
    /// Empty space
    Air,
    /// Default fill
    Stone,
    /// Below the surface
    Dirt,
    /// Temperate surface
    GrassBlock,
    /// Desert and shore surface
    Sand,
    /// Snowy surface
    SnowBlock,
    /// Fluid up to sea level
    Water,
    /// Floor of the column
    Bedrock,
}

impl Material {
    /// Block state ID written into section palettes.
    #[must_use]
    pub const fn block_state_id(self) -> u32 {
        match self {
            Self::Air => 0,
            Self::Stone => 1,
            Self::GrassBlock => 9,
            Self::Dirt => 10,
            Self::Bedrock => 79,
            Self::Water => 80,
            Self::Sand => 112,
            Self::SnowBlock => 5_765,
        }
    }

    /// Whether the block counts toward a section's non-air count.
    #[must_use]
    pub const fn is_solid(self) -> bool {
        !matches!(self, Self::Air | Self::Water)
    }
}

/// Hashes `(seed, x, z)` into the scalar the octaves are evaluated on.
#[must_use]
pub const fn coordinate_hash(seed: i64, x: i32, z: i32) -> i64 {
    seed.wrapping_mul(31)
        .wrapping_add(x as i64)
        .wrapping_mul(31)
        .wrapping_add(z as i64)
}

/// Approximate surface height at a chunk coordinate.
#[must_use]
pub fn height(seed: i64, x: i32, z: i32) -> i32 {
    let h = coordinate_hash(seed, x, z) as f64;

    let mut noise = (h * 0.01).sin() * (h * 0.013).cos();
    noise += (h * 0.007).sin() * (h * 0.011).cos() * 0.5;
    noise += (h * 0.003).sin() * (h * 0.009).cos() * 0.25;

    (f64::from(BASE_HEIGHT) + noise * HEIGHT_AMPLITUDE) as i32
}

/// Biome at a chunk coordinate, from thresholded temperature and humidity.
#[must_use]
pub fn biome(seed: i64, x: i32, z: i32) -> Biome {
    let h = coordinate_hash(seed, x, z) as f64;

    let temperature = (h * 0.005).sin() * 0.5 + 0.5;
    let humidity = (h * 0.007).cos() * 0.5 + 0.5;
    let humid = humidity > 0.5;

    if temperature > 0.8 {
        if humid {
            Biome::Jungle
        } else {
            Biome::Desert
        }
    } else if temperature < 0.2 {
        if humid {
            Biome::SnowyTaiga
        } else {
            Biome::SnowyPlains
        }
    } else if humid {
        Biome::Forest
    } else {
        Biome::Plains
    }
}

/// Top block for a biome at the given surface height.
#[must_use]
pub const fn surface_material(biome: Biome, height: i32) -> Material {
    match biome {
        Biome::Desert => Material::Sand,
        Biome::SnowyPlains | Biome::SnowyTaiga => Material::SnowBlock,
        Biome::Jungle | Biome::Forest | Biome::Plains => {
            if height < SEA_LEVEL {
                Material::Sand
            } else {
                Material::GrassBlock
            }
        },
    }
}

/// Everything the synthesizer knows about one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainSample {
    /// Chunk coordinate
    pub coord: ChunkCoord,
    /// Surface height
    pub surface_height: i32,
    /// Biome tag
    pub biome: Biome,
    /// Top block
    pub surface_material: Material,
}

impl TerrainSample {
    /// Samples the synthesizer at `coord`.
    #[must_use]
    pub fn at(seed: i64, coord: ChunkCoord) -> Self {
        let surface_height = height(seed, coord.x, coord.z);
        let biome = biome(seed, coord.x, coord.z);
        Self {
            coord,
            surface_height,
            biome,
            surface_material: surface_material(biome, surface_height),
        }
    }

    /// Surface lies below sea level.
    #[must_use]
    pub const fn has_water(&self) -> bool {
        self.surface_height < SEA_LEVEL
    }

    /// Surface is close to the base height.
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        (self.surface_height - BASE_HEIGHT).abs() < 5
    }

    /// Surface is well above the base height.
    #[must_use]
    pub const fn is_mountainous(&self) -> bool {
        self.surface_height > 80
    }
}
