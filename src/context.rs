//! Validated catalogs and tuning shared by every tick pass.
//!
//! Built once, explicitly, then handed to the orchestrator by reference.

use crate::config::{DisasterConfig, EconomyConfig};
use crate::disaster::DisasterEngine;
use crate::economy::StructureCatalog;
use crate::error::ContextError;
use crate::rng::{RngManager, WorldSeed};
use crate::terrain::BiomeCatalog;

#[derive(Debug, Clone)]
pub struct SimulationContext {
    biomes: BiomeCatalog,
    structures: StructureCatalog,
    disasters: DisasterEngine,
    economy: EconomyConfig,
    rng: RngManager,
}

impl SimulationContext {
    pub fn builder() -> SimulationContextBuilder {
        SimulationContextBuilder::default()
    }

    /// Default catalogs and tuning, seeded with `seed`.
    pub fn with_defaults(seed: impl Into<WorldSeed>) -> Self {
        Self {
            biomes: BiomeCatalog::with_defaults(),
            structures: StructureCatalog::with_defaults(),
            disasters: DisasterEngine::default(),
            economy: EconomyConfig::default(),
            rng: RngManager::new(seed),
        }
    }

    pub fn biomes(&self) -> &BiomeCatalog {
        &self.biomes
    }

    pub fn structures(&self) -> &StructureCatalog {
        &self.structures
    }

    pub fn disasters(&self) -> &DisasterEngine {
        &self.disasters
    }

    pub fn economy(&self) -> &EconomyConfig {
        &self.economy
    }

    pub fn rng(&self) -> &RngManager {
        &self.rng
    }
}

#[derive(Debug, Default)]
pub struct SimulationContextBuilder {
    biomes: Option<BiomeCatalog>,
    structures: Option<StructureCatalog>,
    disasters: DisasterConfig,
    economy: EconomyConfig,
    seed: Option<WorldSeed>,
}

impl SimulationContextBuilder {
    pub fn with_biomes(mut self, biomes: BiomeCatalog) -> Self {
        self.biomes = Some(biomes);
        self
    }

    pub fn with_structures(mut self, structures: StructureCatalog) -> Self {
        self.structures = Some(structures);
        self
    }

    pub fn with_disaster_config(mut self, config: DisasterConfig) -> Self {
        self.disasters = config;
        self
    }

    pub fn with_economy_config(mut self, config: EconomyConfig) -> Self {
        self.economy = config;
        self
    }

    pub fn with_seed(mut self, seed: impl Into<WorldSeed>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn build(self) -> Result<SimulationContext, ContextError> {
        let biomes = self
            .biomes
            .ok_or(ContextError::NotInitialized("biome catalog"))?;
        let structures = self
            .structures
            .ok_or(ContextError::NotInitialized("structure catalog"))?;
        self.disasters
            .validate()
            .map_err(|reason| ContextError::InvalidConfig {
                section: "disasters",
                reason,
            })?;

        Ok(SimulationContext {
            biomes,
            structures,
            disasters: DisasterEngine::new(self.disasters),
            economy: self.economy,
            rng: self.seed.map(RngManager::new).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_catalog_is_reported() {
        let err = SimulationContext::builder()
            .with_biomes(BiomeCatalog::with_defaults())
            .build()
            .unwrap_err();
        assert_eq!(err, ContextError::NotInitialized("structure catalog"));
        assert_eq!(err.to_string(), "structure catalog was not initialized");
    }

    #[test]
    fn test_invalid_disaster_tuning_is_rejected() {
        let err = SimulationContext::builder()
            .with_biomes(BiomeCatalog::with_defaults())
            .with_structures(StructureCatalog::with_defaults())
            .with_disaster_config(DisasterConfig {
                casualty_rate: 2.0,
                ..DisasterConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidConfig { section: "disasters", .. }));
    }

    #[test]
    fn test_builder_carries_seed() {
        let context = SimulationContext::builder()
            .with_biomes(BiomeCatalog::with_defaults())
            .with_structures(StructureCatalog::with_defaults())
            .with_seed(99u64)
            .build()
            .unwrap();
        assert_eq!(context.rng().master_seed(), 99);
    }
}
