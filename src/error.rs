use thiserror::Error;

use crate::economy::StructureType;
use crate::terrain::NoiseChannel;
use crate::world::SettlementId;

/// Invalid world-generation configuration. Fatal to world creation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{channel} amplitude must be positive and finite, got {value}")]
    Amplitude { channel: NoiseChannel, value: f64 },

    #[error("{channel} frequency must be positive and finite, got {value}")]
    Frequency { channel: NoiseChannel, value: f64 },

    #[error("{channel} octaves must be at least 1, got {value}")]
    Octaves { channel: NoiseChannel, value: u32 },

    #[error("{channel} persistence must lie in (0, 1], got {value}")]
    Persistence { channel: NoiseChannel, value: f64 },

    #[error("terrain grid must have non-zero dimensions, got {width}x{height}")]
    Dimensions { width: u32, height: u32 },
}

/// Invalid biome or structure catalog, detected once at load time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("prerequisite cycle: {}", format_cycle(.path))]
    Cycle { path: Vec<StructureType> },

    #[error("{structure} references unknown structure type '{missing}'")]
    UnknownReference {
        structure: StructureType,
        missing: StructureType,
    },

    #[error("structure type '{0}' defined more than once")]
    DuplicateStructure(StructureType),

    #[error("unknown structure type '{0}'")]
    UnknownStructure(StructureType),

    #[error("{structure} level {level} exceeds maximum {max}")]
    LevelOutOfRange {
        structure: StructureType,
        level: u32,
        max: u32,
    },

    #[error("invalid modifier on {structure}: {reason}")]
    InvalidModifier {
        structure: StructureType,
        reason: String,
    },

    #[error("biome catalog is empty")]
    EmptyBiomes,

    #[error("biome '{0}' defined more than once")]
    DuplicateBiome(String),

    #[error("biome '{id}' has invalid ranges: {reason}")]
    InvalidBiome { id: String, reason: String },

    #[error("default biome '{0}' is not in the catalog")]
    UnknownDefaultBiome(String),
}

fn format_cycle(path: &[StructureType]) -> String {
    path.iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A terrain point no biome rectangle contains: the biome catalog does not
/// cover the valid (precipitation, temperature) square.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("no biome covers precipitation {precipitation:.4}, temperature {temperature:.4}")]
pub struct UnclassifiedTileError {
    pub precipitation: f64,
    pub temperature: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorldGenError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("tile ({x}, {y}): {source}")]
    Unclassified {
        x: u32,
        y: u32,
        #[source]
        source: UnclassifiedTileError,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("{0} no longer exists")]
    NotFound(SettlementId),

    #[error("concurrent write rejected: {0}")]
    Conflict(String),
}

impl PersistenceError {
    /// Whether the settlement should be picked up again on the next
    /// scheduled tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Transient(_) | PersistenceError::Conflict(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("{0} was not initialized")]
    NotInitialized(&'static str),

    #[error("invalid {section} config: {reason}")]
    InvalidConfig {
        section: &'static str,
        reason: String,
    },
}

/// Failure of a single settlement inside a tick pass, or of the pass setup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TickError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("unknown biome '{0}'")]
    UnknownBiome(String),
}

impl TickError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TickError::Persistence(err) => err.is_retryable(),
            TickError::Catalog(_) | TickError::UnknownBiome(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_the_path() {
        let err = CatalogError::Cycle {
            path: vec![
                StructureType::from("Forge"),
                StructureType::from("Mine"),
                StructureType::from("Forge"),
            ],
        };
        assert_eq!(err.to_string(), "prerequisite cycle: Forge -> Mine -> Forge");
    }

    #[test]
    fn test_missing_settlement_is_not_retried() {
        assert!(!PersistenceError::NotFound(SettlementId(4)).is_retryable());
        assert!(PersistenceError::Transient("timeout".into()).is_retryable());
    }
}
