use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::{
    config::{DisasterConfig, EconomyConfig, LoggingConfig, OrchestratorConfig},
    context::SimulationContext,
    economy::{PrerequisiteEdge, ResourceKind, StructureCatalog, StructureDefinition, StructureInstance},
    rng::RngManager,
    store::{InMemoryStore, SettlementStore},
    terrain::{generate_terrain, Biome, BiomeCatalog, TerrainConfig, TerrainGrid},
    world::{SettlementId, SettlementState, WorldId},
};

fn default_world_id() -> WorldId {
    WorldId(1)
}

/// A world, its catalogs and its starting settlements. Catalog sections that
/// are left out fall back to the built-in defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_world_id")]
    pub world_id: WorldId,
    pub world: TerrainConfig,
    #[serde(default)]
    pub biomes: Option<Vec<Biome>>,
    #[serde(default)]
    pub default_biome: Option<String>,
    #[serde(default)]
    pub structures: Option<Vec<StructureDefinition>>,
    /// Only valid together with `structures`.
    #[serde(default)]
    pub prerequisites: Vec<PrerequisiteEdge>,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub disasters: DisasterConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub settlements: Vec<ScenarioSettlement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSettlement {
    pub name: String,
    /// Random free land tile when omitted.
    #[serde(default)]
    pub tile: Option<(u32, u32)>,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub structures: Vec<StructureInstance>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceKind, f64>,
    #[serde(default)]
    pub resilience: f64,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    pub fn build_context(&self) -> Result<SimulationContext> {
        let biomes = match &self.biomes {
            Some(biomes) => BiomeCatalog::new(biomes.clone(), self.default_biome.as_deref())
                .with_context(|| format!("Invalid biome catalog in scenario '{}'", self.name))?,
            None => BiomeCatalog::with_defaults(),
        };
        let structures = match &self.structures {
            Some(definitions) => {
                StructureCatalog::new(definitions.clone(), self.prerequisites.clone())
                    .with_context(|| {
                        format!("Invalid structure catalog in scenario '{}'", self.name)
                    })?
            }
            None if !self.prerequisites.is_empty() => bail!(
                "Scenario '{}' lists prerequisites without a structures table",
                self.name
            ),
            None => StructureCatalog::with_defaults(),
        };

        let context = SimulationContext::builder()
            .with_biomes(biomes)
            .with_structures(structures)
            .with_disaster_config(self.disasters.clone())
            .with_economy_config(self.economy.clone())
            .with_seed(self.world.seed)
            .build()?;
        Ok(context)
    }

    pub fn generate_terrain(&self, context: &SimulationContext) -> Result<TerrainGrid> {
        generate_terrain(&self.world, context.biomes())
            .with_context(|| format!("World generation failed for scenario '{}'", self.name))
    }

    /// Store the terrain and place every settlement on it. Settlements
    /// without a fixed tile get a random free land tile drawn from the world
    /// seed, so placement is reproducible.
    pub fn seed_store(
        &self,
        context: &SimulationContext,
        grid: &TerrainGrid,
        store: &InMemoryStore,
    ) -> Result<Vec<SettlementId>> {
        store.store_terrain(self.world_id, grid.clone())?;

        let mut rng = RngManager::new(self.world.seed).create_entity_rng(
            "placement",
            self.world_id.raw(),
            0,
        );
        let mut occupied = HashSet::new();
        let mut ids = Vec::with_capacity(self.settlements.len());

        for (index, settlement) in self.settlements.iter().enumerate() {
            let tile = match settlement.tile {
                Some((x, y)) => grid.tile(x, y).with_context(|| {
                    format!("Settlement '{}' placed outside the map", settlement.name)
                })?,
                None => grid
                    .select_spawn_tile(&occupied, &mut rng)
                    .with_context(|| format!("No free land tile for '{}'", settlement.name))?,
            };
            if !occupied.insert((tile.x, tile.y)) {
                bail!("Settlement '{}' shares tile ({}, {})", settlement.name, tile.x, tile.y);
            }

            for structure in &settlement.structures {
                let definition = context.structures().definition(&structure.structure_type)?;
                if structure.level > definition.max_level {
                    bail!(
                        "{} in '{}' is level {}, maximum is {}",
                        structure.structure_type,
                        settlement.name,
                        structure.level,
                        definition.max_level
                    );
                }
            }

            let id = SettlementId(index as u64 + 1);
            let mut state = SettlementState::new(id, settlement.name.clone(), tile.biome_id.clone())
                .with_tile(tile.x, tile.y)
                .with_population(settlement.population);
            state.structures = settlement.structures.clone();
            state.resilience = settlement.resilience;
            for (&resource, &amount) in &settlement.resources {
                state.ledger.set(resource, amount);
            }

            info!(
                target: "frontier::scenario",
                settlement = %id,
                name = %settlement.name,
                x = tile.x,
                y = tile.y,
                biome = %tile.biome_id,
                "settlement placed"
            );
            store.insert_settlement(self.world_id, state)?;
            ids.push(id);
        }
        Ok(ids)
    }
}
