//! Seeded fractal noise fields
//!
//! Each terrain channel is a sum of Perlin octaves. Octave `i` is weighted by
//! `amplitude * persistence^i` and sampled at `frequency * 2^i`; the sum is
//! divided by the total weight so the field stays in [-1, 1] whatever the
//! octave count.

use std::fmt;

use noise::{NoiseFn, Perlin};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rng::{derive_seed, WorldSeed};

const LACUNARITY: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseChannel {
    Elevation,
    Precipitation,
    Temperature,
}

impl NoiseChannel {
    pub const ALL: [NoiseChannel; 3] = [
        NoiseChannel::Elevation,
        NoiseChannel::Precipitation,
        NoiseChannel::Temperature,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NoiseChannel::Elevation => "elevation",
            NoiseChannel::Precipitation => "precipitation",
            NoiseChannel::Temperature => "temperature",
        }
    }

    fn stream(self) -> u64 {
        match self {
            NoiseChannel::Elevation => 1,
            NoiseChannel::Precipitation => 2,
            NoiseChannel::Temperature => 3,
        }
    }

    /// Seed of the Perlin basis for this channel of a world.
    pub fn basis_seed(self, seed: WorldSeed) -> u32 {
        let mixed = derive_seed(seed.raw(), self.stream(), 0, 0);
        (mixed >> 32) as u32 ^ mixed as u32
    }
}

impl fmt::Display for NoiseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_frequency() -> f64 {
    0.04
}

fn default_octaves() -> u32 {
    8
}

fn default_persistence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseLayerConfig {
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default = "default_octaves")]
    pub octaves: u32,
    #[serde(default = "default_persistence")]
    pub persistence: f64,
}

impl Default for NoiseLayerConfig {
    fn default() -> Self {
        Self {
            amplitude: default_amplitude(),
            frequency: default_frequency(),
            octaves: default_octaves(),
            persistence: default_persistence(),
        }
    }
}

impl NoiseLayerConfig {
    pub fn validate(&self, channel: NoiseChannel) -> Result<(), ConfigError> {
        if !(self.amplitude.is_finite() && self.amplitude > 0.0) {
            return Err(ConfigError::Amplitude {
                channel,
                value: self.amplitude,
            });
        }
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(ConfigError::Frequency {
                channel,
                value: self.frequency,
            });
        }
        if self.octaves < 1 {
            return Err(ConfigError::Octaves {
                channel,
                value: self.octaves,
            });
        }
        if !(self.persistence > 0.0 && self.persistence <= 1.0) {
            return Err(ConfigError::Persistence {
                channel,
                value: self.persistence,
            });
        }
        Ok(())
    }

    /// Sum of all octave weights, the largest magnitude the raw sum can reach.
    fn total_weight(&self) -> f64 {
        (0..self.octaves)
            .map(|i| self.amplitude * self.persistence.powi(i as i32))
            .sum()
    }
}

/// A validated, seeded scalar field for one channel of one world.
#[derive(Clone)]
pub struct NoiseField {
    channel: NoiseChannel,
    basis: Perlin,
    config: NoiseLayerConfig,
    total_weight: f64,
}

impl fmt::Debug for NoiseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseField")
            .field("channel", &self.channel)
            .field("config", &self.config)
            .finish()
    }
}

impl NoiseField {
    pub fn new(
        seed: WorldSeed,
        channel: NoiseChannel,
        config: NoiseLayerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate(channel)?;
        Ok(Self {
            channel,
            basis: Perlin::new(channel.basis_seed(seed)),
            total_weight: config.total_weight(),
            config,
        })
    }

    pub fn channel(&self) -> NoiseChannel {
        self.channel
    }

    pub fn config(&self) -> &NoiseLayerConfig {
        &self.config
    }

    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let mut total = 0.0;
        let mut weight = self.config.amplitude;
        let mut frequency = self.config.frequency;

        for _ in 0..self.config.octaves {
            total += weight * self.basis.get([x * frequency, y * frequency]);
            weight *= self.config.persistence;
            frequency *= LACUNARITY;
        }

        (total / self.total_weight).clamp(-1.0, 1.0)
    }

    /// Row-major samples for every integer coordinate of a `width x height`
    /// grid. Rows are sampled in parallel.
    pub fn sample_grid(&self, width: u32, height: u32) -> Vec<f64> {
        let mut values = vec![0.0; width as usize * height as usize];
        if width == 0 {
            return values;
        }
        values
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, value) in row.iter_mut().enumerate() {
                    *value = self.sample(x as f64, y as f64);
                }
            });
        values
    }
}

/// One-shot sample of a channel. Prefer [`NoiseField`] when sampling many
/// points with the same config.
pub fn sample(
    seed: WorldSeed,
    channel: NoiseChannel,
    x: f64,
    y: f64,
    config: &NoiseLayerConfig,
) -> Result<f64, ConfigError> {
    Ok(NoiseField::new(seed, channel, *config)?.sample(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(octaves: u32, persistence: f64) -> NoiseLayerConfig {
        NoiseLayerConfig {
            amplitude: 1.0,
            frequency: 0.04,
            octaves,
            persistence,
        }
    }

    #[test]
    fn test_sample_is_deterministic() {
        let seed = WorldSeed::from(7u64);
        let a = sample(seed, NoiseChannel::Elevation, 12.0, 31.0, &config(8, 0.5)).unwrap();
        let b = sample(seed, NoiseChannel::Elevation, 12.0, 31.0, &config(8, 0.5)).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_channels_use_distinct_bases() {
        let seed = WorldSeed::from(7u64);
        let field_e = NoiseField::new(seed, NoiseChannel::Elevation, config(4, 0.5)).unwrap();
        let field_t = NoiseField::new(seed, NoiseChannel::Temperature, config(4, 0.5)).unwrap();
        let differs = (0..20).any(|i| {
            let x = i as f64 * 3.7;
            field_e.sample(x, 5.3) != field_t.sample(x, 5.3)
        });
        assert!(differs);
    }

    #[test]
    fn test_single_octave_matches_basis() {
        let seed = WorldSeed::from(99u64);
        let field = NoiseField::new(seed, NoiseChannel::Precipitation, config(1, 0.5)).unwrap();
        let basis = Perlin::new(NoiseChannel::Precipitation.basis_seed(seed));
        let expected = basis.get([10.5 * 0.04, 3.25 * 0.04]).clamp(-1.0, 1.0);
        assert!((field.sample(10.5, 3.25) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_full_persistence_stays_in_range() {
        let field =
            NoiseField::new(WorldSeed::from(3u64), NoiseChannel::Elevation, config(12, 1.0)).unwrap();
        for value in field.sample_grid(40, 40) {
            assert!((-1.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_rejects_non_positive_frequency() {
        let mut bad = config(4, 0.5);
        bad.frequency = 0.0;
        let err = NoiseField::new(WorldSeed::from(1u64), NoiseChannel::Temperature, bad).unwrap_err();
        assert!(matches!(err, ConfigError::Frequency { .. }));
    }

    #[test]
    fn test_rejects_zero_octaves_and_bad_persistence() {
        let mut bad = config(0, 0.5);
        assert!(matches!(
            bad.validate(NoiseChannel::Elevation),
            Err(ConfigError::Octaves { .. })
        ));
        bad.octaves = 2;
        bad.persistence = 1.5;
        assert!(matches!(
            bad.validate(NoiseChannel::Elevation),
            Err(ConfigError::Persistence { .. })
        ));
    }

    #[test]
    fn test_grid_matches_pointwise_samples() {
        let field =
            NoiseField::new(WorldSeed::from(5u64), NoiseChannel::Elevation, config(3, 0.5)).unwrap();
        let grid = field.sample_grid(6, 4);
        assert_eq!(grid.len(), 24);
        assert_eq!(grid[2 * 6 + 5], field.sample(5.0, 2.0));
    }
}
