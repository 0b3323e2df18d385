//! Biome catalog and (precipitation, temperature) classification

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::disaster::DisasterType;
use crate::economy::ResourceKind;
use crate::error::{CatalogError, UnclassifiedTileError};

const RANGE_MIN: f64 = -1.0;
const RANGE_MAX: f64 = 1.0;
/// Lattice resolution used when probing the catalog for coverage gaps.
const COVERAGE_PROBES: usize = 64;

fn default_disaster_risk() -> f64 {
    0.02
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardWeight {
    pub disaster: DisasterType,
    pub weight: f64,
}

/// A named rectangle of the (precipitation, temperature) square.
///
/// Ranges are half-open, `[min, max)`, except that a bound of exactly 1.0 is
/// inclusive so the top and right edges of the square are still covered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biome {
    pub id: String,
    pub name: String,
    pub precipitation_min: f64,
    pub precipitation_max: f64,
    pub temperature_min: f64,
    pub temperature_max: f64,
    /// Base chance per tick that a settlement here suffers a disaster.
    #[serde(default = "default_disaster_risk")]
    pub disaster_risk: f64,
    #[serde(default)]
    pub hazards: Vec<HazardWeight>,
    /// Production multipliers; resources not listed yield 1.0.
    #[serde(default)]
    pub yields: BTreeMap<ResourceKind, f64>,
}

impl Biome {
    pub fn new(
        id: &str,
        name: &str,
        precipitation: (f64, f64),
        temperature: (f64, f64),
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            precipitation_min: precipitation.0,
            precipitation_max: precipitation.1,
            temperature_min: temperature.0,
            temperature_max: temperature.1,
            disaster_risk: default_disaster_risk(),
            hazards: Vec::new(),
            yields: BTreeMap::new(),
        }
    }

    pub fn with_risk(mut self, risk: f64, hazards: &[(DisasterType, f64)]) -> Self {
        self.disaster_risk = risk;
        self.hazards = hazards
            .iter()
            .map(|&(disaster, weight)| HazardWeight { disaster, weight })
            .collect();
        self
    }

    pub fn with_yield(mut self, resource: ResourceKind, multiplier: f64) -> Self {
        self.yields.insert(resource, multiplier);
        self
    }

    pub fn contains(&self, precipitation: f64, temperature: f64) -> bool {
        in_range(precipitation, self.precipitation_min, self.precipitation_max)
            && in_range(temperature, self.temperature_min, self.temperature_max)
    }

    pub fn yield_multiplier(&self, resource: ResourceKind) -> f64 {
        self.yields.get(&resource).copied().unwrap_or(1.0)
    }

    fn overlaps(&self, other: &Biome) -> bool {
        self.precipitation_min < other.precipitation_max
            && other.precipitation_min < self.precipitation_max
            && self.temperature_min < other.temperature_max
            && other.temperature_min < self.temperature_max
    }

    fn check_ranges(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidBiome {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        let bounds = [
            self.precipitation_min,
            self.precipitation_max,
            self.temperature_min,
            self.temperature_max,
        ];
        if bounds
            .iter()
            .any(|b| !b.is_finite() || *b < RANGE_MIN || *b > RANGE_MAX)
        {
            return Err(invalid("bounds must lie within [-1, 1]"));
        }
        if self.precipitation_min >= self.precipitation_max {
            return Err(invalid("precipitation_min must be below precipitation_max"));
        }
        if self.temperature_min >= self.temperature_max {
            return Err(invalid("temperature_min must be below temperature_max"));
        }
        if !(0.0..=1.0).contains(&self.disaster_risk) {
            return Err(invalid("disaster_risk must lie in [0, 1]"));
        }
        if self
            .hazards
            .iter()
            .any(|h| !h.weight.is_finite() || h.weight < 0.0)
        {
            return Err(invalid("hazard weights must be finite and non-negative"));
        }
        if !self.hazards.is_empty() && self.hazards.iter().all(|h| h.weight == 0.0) {
            return Err(invalid("at least one hazard weight must be positive"));
        }
        Ok(())
    }
}

fn in_range(value: f64, min: f64, max: f64) -> bool {
    value >= min && (value < max || (max >= RANGE_MAX && value <= max))
}

/// First biome whose rectangle contains the point, in declaration order.
pub fn classify(
    precipitation: f64,
    temperature: f64,
    biomes: &[Biome],
) -> Result<&Biome, UnclassifiedTileError> {
    biomes
        .iter()
        .find(|biome| biome.contains(precipitation, temperature))
        .ok_or(UnclassifiedTileError {
            precipitation,
            temperature,
        })
}

/// Configuration problems that do not stop the catalog from loading but
/// should be fixed.
#[derive(Debug, Clone, PartialEq)]
pub enum BiomeWarning {
    /// Both rectangles claim some points; `first` wins them.
    Overlap { first: String, second: String },
    /// A probed point no biome covers.
    Gap { precipitation: f64, temperature: f64 },
}

#[derive(Debug, Clone)]
pub struct BiomeCatalog {
    biomes: Vec<Biome>,
    default_biome: Option<usize>,
}

impl BiomeCatalog {
    pub fn new(biomes: Vec<Biome>, default_biome: Option<&str>) -> Result<Self, CatalogError> {
        if biomes.is_empty() {
            return Err(CatalogError::EmptyBiomes);
        }

        let mut seen = HashSet::new();
        for biome in &biomes {
            if !seen.insert(biome.id.as_str()) {
                return Err(CatalogError::DuplicateBiome(biome.id.clone()));
            }
            biome.check_ranges()?;
        }

        let default_biome = match default_biome {
            Some(id) => Some(
                biomes
                    .iter()
                    .position(|b| b.id == id)
                    .ok_or_else(|| CatalogError::UnknownDefaultBiome(id.to_string()))?,
            ),
            None => None,
        };

        let catalog = Self {
            biomes,
            default_biome,
        };
        for warning in catalog.validate() {
            match warning {
                BiomeWarning::Overlap { first, second } => warn!(
                    target: "frontier::biome",
                    first = %first,
                    second = %second,
                    "biome ranges overlap; the first declared biome wins"
                ),
                BiomeWarning::Gap {
                    precipitation,
                    temperature,
                } => warn!(
                    target: "frontier::biome",
                    precipitation,
                    temperature,
                    "biome catalog leaves a point uncovered"
                ),
            }
        }
        Ok(catalog)
    }

    /// A 3x3 partition of the square into dry/moderate/wet by
    /// cold/temperate/hot bands.
    pub fn with_defaults() -> Self {
        use DisasterType::*;
        use ResourceKind::*;

        const DRY: (f64, f64) = (-1.0, -0.2);
        const MODERATE: (f64, f64) = (-0.2, 0.2);
        const WET: (f64, f64) = (0.2, 1.0);
        const COLD: (f64, f64) = (-1.0, -0.2);
        const TEMPERATE: (f64, f64) = (-0.2, 0.2);
        const HOT: (f64, f64) = (0.2, 1.0);

        let biomes = vec![
            Biome::new("tundra", "Tundra", DRY, COLD)
                .with_risk(0.03, &[(Blizzard, 3.0), (Earthquake, 1.0)])
                .with_yield(Food, 0.5)
                .with_yield(Stone, 1.2),
            Biome::new("taiga", "Taiga", MODERATE, COLD)
                .with_risk(0.025, &[(Blizzard, 2.0), (Wildfire, 1.0)])
                .with_yield(Wood, 1.4)
                .with_yield(Food, 0.7),
            Biome::new("snowfield", "Snowfield", WET, COLD)
                .with_risk(0.04, &[(Blizzard, 4.0), (Flood, 1.0)])
                .with_yield(Food, 0.3)
                .with_yield(Water, 1.5),
            Biome::new("steppe", "Steppe", DRY, TEMPERATE)
                .with_risk(0.02, &[(Drought, 2.0), (Wildfire, 1.0)])
                .with_yield(Water, 0.7),
            Biome::new("grassland", "Grassland", MODERATE, TEMPERATE)
                .with_risk(0.015, &[(Drought, 1.0), (Flood, 1.0), (Plague, 0.5)])
                .with_yield(Food, 1.3),
            Biome::new("forest", "Temperate Forest", WET, TEMPERATE)
                .with_risk(0.02, &[(Wildfire, 2.0), (Flood, 1.0)])
                .with_yield(Wood, 1.5),
            Biome::new("desert", "Desert", DRY, HOT)
                .with_risk(0.03, &[(Drought, 4.0), (Earthquake, 1.0)])
                .with_yield(Food, 0.4)
                .with_yield(Water, 0.4)
                .with_yield(Ore, 1.3)
                .with_yield(Gold, 1.5),
            Biome::new("savanna", "Savanna", MODERATE, HOT)
                .with_risk(0.025, &[(Wildfire, 3.0), (Drought, 2.0)])
                .with_yield(Food, 1.1),
            Biome::new("rainforest", "Rainforest", WET, HOT)
                .with_risk(0.03, &[(Flood, 3.0), (Plague, 2.0)])
                .with_yield(Wood, 1.6)
                .with_yield(Food, 1.2),
        ];

        Self {
            biomes,
            default_biome: Some(4),
        }
    }

    pub fn biomes(&self) -> &[Biome] {
        &self.biomes
    }

    pub fn get(&self, id: &str) -> Option<&Biome> {
        self.biomes.iter().find(|b| b.id == id)
    }

    pub fn default_biome(&self) -> Option<&Biome> {
        self.default_biome.map(|index| &self.biomes[index])
    }

    pub fn classify(
        &self,
        precipitation: f64,
        temperature: f64,
    ) -> Result<&Biome, UnclassifiedTileError> {
        classify(precipitation, temperature, &self.biomes)
    }

    /// Like [`classify`](Self::classify) but falls back to the designated
    /// default biome, logging the uncovered point.
    pub fn classify_or_default(
        &self,
        precipitation: f64,
        temperature: f64,
    ) -> Result<&Biome, UnclassifiedTileError> {
        match self.classify(precipitation, temperature) {
            Ok(biome) => Ok(biome),
            Err(err) => match self.default_biome() {
                Some(fallback) => {
                    warn!(
                        target: "frontier::biome",
                        precipitation,
                        temperature,
                        fallback = %fallback.id,
                        "unclassified terrain point; using default biome"
                    );
                    Ok(fallback)
                }
                None => Err(err),
            },
        }
    }

    pub fn validate(&self) -> Vec<BiomeWarning> {
        let mut warnings = Vec::new();
        for (i, first) in self.biomes.iter().enumerate() {
            for second in &self.biomes[i + 1..] {
                if first.overlaps(second) {
                    warnings.push(BiomeWarning::Overlap {
                        first: first.id.clone(),
                        second: second.id.clone(),
                    });
                }
            }
        }

        let step = (RANGE_MAX - RANGE_MIN) / COVERAGE_PROBES as f64;
        for pi in 0..=COVERAGE_PROBES {
            for ti in 0..=COVERAGE_PROBES {
                let precipitation = RANGE_MIN + pi as f64 * step;
                let temperature = RANGE_MIN + ti as f64 * step;
                if self.classify(precipitation, temperature).is_err() {
                    warnings.push(BiomeWarning::Gap {
                        precipitation,
                        temperature,
                    });
                }
            }
        }
        warnings
    }
}
