//! JSON export of terrain grids and tick reports

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::engine::TickResult;
use crate::terrain::{NoiseChannel, TerrainGrid};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct TerrainExport<'a> {
    width: u32,
    height: u32,
    sea_level: f64,
    elevation: Vec<f64>,
    precipitation: Vec<f64>,
    temperature: Vec<f64>,
    /// Row-major biome id per tile.
    biomes: Vec<&'a str>,
}

/// Write the tile table as `<dir>/<name>_terrain.json`.
pub fn export_terrain(
    dir: impl AsRef<Path>,
    name: &str,
    grid: &TerrainGrid,
) -> Result<PathBuf, SnapshotError> {
    let export = TerrainExport {
        width: grid.width,
        height: grid.height,
        sea_level: grid.sea_level,
        elevation: grid.channel(NoiseChannel::Elevation),
        precipitation: grid.channel(NoiseChannel::Precipitation),
        temperature: grid.channel(NoiseChannel::Temperature),
        biomes: grid.tiles().iter().map(|t| t.biome_id.as_str()).collect(),
    };
    write_json(dir.as_ref(), &format!("{name}_terrain.json"), &export)
}

/// Write one pass result as `<dir>/tick_<window>.json`.
pub fn write_tick_report(dir: impl AsRef<Path>, result: &TickResult) -> Result<PathBuf, SnapshotError> {
    write_json(
        dir.as_ref(),
        &format!("tick_{:010}.json", result.tick_window.raw()),
        result,
    )
}

fn write_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir).map_err(|source| SnapshotError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file);
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&path, json).map_err(|source| SnapshotError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
