//! World terrain: noise channels classified into a static biome grid.

mod biome;
mod field;

use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, WorldGenError};
use crate::rng::WorldSeed;

pub use biome::{classify, Biome, BiomeCatalog, BiomeWarning, HazardWeight};
pub use field::{sample, NoiseChannel, NoiseField, NoiseLayerConfig};

fn default_dimension() -> u32 {
    100
}

fn default_sea_level() -> f64 {
    -0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    pub seed: WorldSeed,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    /// Tiles at or below this elevation are water and never host settlements.
    #[serde(default = "default_sea_level")]
    pub sea_level: f64,
    #[serde(default)]
    pub elevation: NoiseLayerConfig,
    #[serde(default)]
    pub precipitation: NoiseLayerConfig,
    #[serde(default)]
    pub temperature: NoiseLayerConfig,
}

impl TerrainConfig {
    pub fn new(seed: impl Into<WorldSeed>, width: u32, height: u32) -> Self {
        Self {
            seed: seed.into(),
            width,
            height,
            sea_level: default_sea_level(),
            elevation: NoiseLayerConfig::default(),
            precipitation: NoiseLayerConfig::default(),
            temperature: NoiseLayerConfig::default(),
        }
    }

    pub fn layer(&self, channel: NoiseChannel) -> &NoiseLayerConfig {
        match channel {
            NoiseChannel::Elevation => &self.elevation,
            NoiseChannel::Precipitation => &self.precipitation,
            NoiseChannel::Temperature => &self.temperature,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Dimensions {
                width: self.width,
                height: self.height,
            });
        }
        for channel in NoiseChannel::ALL {
            self.layer(channel).validate(channel)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainSample {
    pub elevation: f64,
    pub precipitation: f64,
    pub temperature: f64,
}

impl TerrainSample {
    pub fn channel(&self, channel: NoiseChannel) -> f64 {
        match channel {
            NoiseChannel::Elevation => self.elevation,
            NoiseChannel::Precipitation => self.precipitation,
            NoiseChannel::Temperature => self.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub x: u32,
    pub y: u32,
    pub sample: TerrainSample,
    pub biome_id: String,
}

/// The immutable tile table of a world, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainGrid {
    pub width: u32,
    pub height: u32,
    pub sea_level: f64,
    tiles: Vec<TileRecord>,
}

impl TerrainGrid {
    pub fn tiles(&self) -> &[TileRecord] {
        &self.tiles
    }

    pub fn tile(&self, x: u32, y: u32) -> Option<&TileRecord> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.tiles.get(y as usize * self.width as usize + x as usize)
    }

    /// One channel as a row-major grid of `width * height` values.
    pub fn channel(&self, channel: NoiseChannel) -> Vec<f64> {
        self.tiles.iter().map(|t| t.sample.channel(channel)).collect()
    }

    pub fn biome_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for tile in &self.tiles {
            *counts.entry(tile.biome_id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_land(&self, tile: &TileRecord) -> bool {
        tile.sample.elevation > self.sea_level
    }

    /// Pick a random land tile not in `occupied`, using the caller's
    /// generator so placement is reproducible.
    pub fn select_spawn_tile<R: Rng + ?Sized>(
        &self,
        occupied: &HashSet<(u32, u32)>,
        rng: &mut R,
    ) -> Option<&TileRecord> {
        let eligible: Vec<&TileRecord> = self
            .tiles
            .iter()
            .filter(|tile| self.is_land(tile) && !occupied.contains(&(tile.x, tile.y)))
            .collect();
        eligible.choose(rng).copied()
    }
}

/// Sample all three channels over the configured grid and classify every
/// tile. Any uncovered point is a world-generation defect unless the catalog
/// designates a default biome.
pub fn generate_terrain(
    config: &TerrainConfig,
    biomes: &BiomeCatalog,
) -> Result<TerrainGrid, WorldGenError> {
    config.validate()?;

    let elevation = NoiseField::new(config.seed, NoiseChannel::Elevation, config.elevation)?
        .sample_grid(config.width, config.height);
    let precipitation =
        NoiseField::new(config.seed, NoiseChannel::Precipitation, config.precipitation)?
            .sample_grid(config.width, config.height);
    let temperature = NoiseField::new(config.seed, NoiseChannel::Temperature, config.temperature)?
        .sample_grid(config.width, config.height);

    let mut tiles = Vec::with_capacity(elevation.len());
    for (index, ((&e, &p), &t)) in elevation
        .iter()
        .zip(&precipitation)
        .zip(&temperature)
        .enumerate()
    {
        let x = (index % config.width as usize) as u32;
        let y = (index / config.width as usize) as u32;
        let biome = biomes
            .classify_or_default(p, t)
            .map_err(|source| WorldGenError::Unclassified { x, y, source })?;
        tiles.push(TileRecord {
            x,
            y,
            sample: TerrainSample {
                elevation: e,
                precipitation: p,
                temperature: t,
            },
            biome_id: biome.id.clone(),
        });
    }

    let grid = TerrainGrid {
        width: config.width,
        height: config.height,
        sea_level: config.sea_level,
        tiles,
    };
    for (biome, count) in grid.biome_counts() {
        debug!(target: "frontier::terrain", biome, count, "biome coverage");
    }
    info!(
        target: "frontier::terrain",
        seed = %config.seed,
        width = config.width,
        height = config.height,
        "terrain generated"
    );
    Ok(grid)
}
