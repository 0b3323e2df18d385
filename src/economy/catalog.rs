//! Structure definitions, their modifiers and the prerequisite graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ledger::ResourceKind;
use super::modifier::{calculate_modifier_value, ModifierKind, ModifierSpec, ResolvedModifier};
use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureType(String);

impl StructureType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StructureType {
    fn from(value: &str) -> Self {
        StructureType(value.to_string())
    }
}

impl From<String> for StructureType {
    fn from(value: String) -> Self {
        StructureType(value)
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureInstance {
    pub structure_type: StructureType,
    pub level: u32,
}

impl StructureInstance {
    pub fn new(structure_type: &str, level: u32) -> Self {
        Self {
            structure_type: structure_type.into(),
            level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureDefinition {
    pub name: StructureType,
    pub max_level: u32,
    #[serde(default)]
    pub modifiers: Vec<ModifierSpec>,
}

impl StructureDefinition {
    pub fn new(name: &str, max_level: u32, modifiers: Vec<ModifierSpec>) -> Self {
        Self {
            name: name.into(),
            max_level,
            modifiers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteEdge {
    pub structure_type: StructureType,
    pub required_structure_type: StructureType,
    pub required_level: u32,
}

impl PrerequisiteEdge {
    pub fn new(structure_type: &str, required: &str, required_level: u32) -> Self {
        Self {
            structure_type: structure_type.into(),
            required_structure_type: required.into(),
            required_level,
        }
    }

    pub fn is_met(&self, structures: &[StructureInstance]) -> bool {
        structures.iter().any(|s| {
            s.structure_type == self.required_structure_type && s.level >= self.required_level
        })
    }
}

/// Why a structure cannot be built or raised a level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpgradeBlocked {
    #[error("{0} is already at its maximum level")]
    AtMaxLevel(StructureType),

    #[error("{structure} needs {}", describe_edges(.missing))]
    MissingPrerequisites {
        structure: StructureType,
        missing: Vec<PrerequisiteEdge>,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

fn describe_edges(edges: &[PrerequisiteEdge]) -> String {
    edges
        .iter()
        .map(|e| format!("{} level {}", e.required_structure_type, e.required_level))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validated catalog. Construction fails on duplicates, invalid modifiers,
/// dangling prerequisite references and prerequisite cycles, so nothing
/// downstream re-checks the graph.
#[derive(Debug, Clone)]
pub struct StructureCatalog {
    definitions: BTreeMap<StructureType, StructureDefinition>,
    prerequisites: BTreeMap<StructureType, Vec<PrerequisiteEdge>>,
}

impl StructureCatalog {
    pub fn new(
        definitions: Vec<StructureDefinition>,
        edges: Vec<PrerequisiteEdge>,
    ) -> Result<Self, CatalogError> {
        let mut by_name = BTreeMap::new();
        for definition in definitions {
            if definition.max_level == 0 {
                return Err(CatalogError::LevelOutOfRange {
                    structure: definition.name.clone(),
                    level: 0,
                    max: 0,
                });
            }
            for spec in &definition.modifiers {
                spec.validate()
                    .map_err(|reason| CatalogError::InvalidModifier {
                        structure: definition.name.clone(),
                        reason,
                    })?;
            }
            if by_name.contains_key(&definition.name) {
                return Err(CatalogError::DuplicateStructure(definition.name));
            }
            by_name.insert(definition.name.clone(), definition);
        }

        let mut prerequisites: BTreeMap<StructureType, Vec<PrerequisiteEdge>> = BTreeMap::new();
        for edge in edges {
            for referenced in [&edge.structure_type, &edge.required_structure_type] {
                if !by_name.contains_key(referenced) {
                    return Err(CatalogError::UnknownReference {
                        structure: edge.structure_type.clone(),
                        missing: referenced.clone(),
                    });
                }
            }
            let required_max = by_name[&edge.required_structure_type].max_level;
            if edge.required_level > required_max {
                return Err(CatalogError::LevelOutOfRange {
                    structure: edge.required_structure_type.clone(),
                    level: edge.required_level,
                    max: required_max,
                });
            }
            prerequisites
                .entry(edge.structure_type.clone())
                .or_default()
                .push(edge);
        }

        let catalog = Self {
            definitions: by_name,
            prerequisites,
        };
        if let Some(path) = catalog.find_cycle() {
            return Err(CatalogError::Cycle { path });
        }
        Ok(catalog)
    }

    /// The standard structure set for new worlds.
    pub fn with_defaults() -> Self {
        use ModifierKind::*;
        use ResourceKind::*;

        let definitions = vec![
            StructureDefinition::new(
                "Town Hall",
                10,
                vec![
                    ModifierSpec::linear(Happiness, 2.0, 1.0),
                    ModifierSpec::linear(Storage { resource: Food }, 200.0, 50.0),
                    ModifierSpec::linear(Storage { resource: Water }, 200.0, 50.0),
                    ModifierSpec::linear(Storage { resource: Wood }, 150.0, 40.0),
                    ModifierSpec::linear(Storage { resource: Stone }, 150.0, 40.0),
                    ModifierSpec::linear(Storage { resource: Ore }, 100.0, 25.0),
                    ModifierSpec::linear(Storage { resource: Gold }, 100.0, 25.0),
                    ModifierSpec::linear(Production { resource: Gold }, 1.0, 0.5),
                ],
            ),
            StructureDefinition::new(
                "Farm",
                10,
                vec![
                    ModifierSpec::linear(Production { resource: Food }, 6.0, 3.0),
                    ModifierSpec::linear(Consumption { resource: Water }, 1.0, 0.5),
                ],
            ),
            StructureDefinition::new(
                "Well",
                10,
                vec![ModifierSpec::linear(Production { resource: Water }, 8.0, 3.0)],
            ),
            StructureDefinition::new(
                "Lumber Mill",
                10,
                vec![ModifierSpec::linear(Production { resource: Wood }, 5.0, 2.5)],
            ),
            StructureDefinition::new(
                "Quarry",
                10,
                vec![ModifierSpec::linear(Production { resource: Stone }, 4.0, 2.0)],
            ),
            StructureDefinition::new(
                "Workshop",
                10,
                vec![
                    ModifierSpec::diminishing(ProductionEfficiency { resource: Wood }, 25.0, 0.9),
                    ModifierSpec::diminishing(
                        ProductionEfficiency { resource: Stone },
                        25.0,
                        0.9,
                    ),
                    ModifierSpec::linear(Consumption { resource: Wood }, 1.0, 0.5),
                ],
            ),
            StructureDefinition::new(
                "Mine",
                10,
                vec![
                    ModifierSpec::linear(Production { resource: Ore }, 3.0, 1.5),
                    ModifierSpec::linear(Consumption { resource: Wood }, 1.0, 0.25),
                ],
            ),
            StructureDefinition::new(
                "Granary",
                5,
                vec![
                    ModifierSpec::linear(Storage { resource: Food }, 300.0, 150.0),
                    ModifierSpec::diminishing(ProductionEfficiency { resource: Food }, 20.0, 0.8),
                ],
            ),
            StructureDefinition::new(
                "Warehouse",
                5,
                vec![
                    ModifierSpec::linear(Storage { resource: Wood }, 250.0, 100.0),
                    ModifierSpec::linear(Storage { resource: Stone }, 250.0, 100.0),
                    ModifierSpec::linear(Storage { resource: Ore }, 150.0, 75.0),
                ],
            ),
            StructureDefinition::new(
                "Tavern",
                5,
                vec![
                    ModifierSpec::diminishing(Happiness, 25.0, 0.9),
                    ModifierSpec::linear(Consumption { resource: Food }, 2.0, 1.0),
                    ModifierSpec::linear(Consumption { resource: Water }, 2.0, 1.0),
                ],
            ),
            StructureDefinition::new(
                "Watchtower",
                5,
                vec![ModifierSpec::diminishing(Resilience, 15.0, 0.7)],
            ),
            StructureDefinition::new(
                "Market",
                5,
                vec![
                    ModifierSpec::linear(Production { resource: Gold }, 3.0, 2.0),
                    ModifierSpec::diminishing(ProductionEfficiency { resource: Gold }, 30.0, 0.85),
                ],
            ),
        ];

        let edges = vec![
            PrerequisiteEdge::new("Workshop", "Town Hall", 1),
            PrerequisiteEdge::new("Mine", "Workshop", 1),
            PrerequisiteEdge::new("Mine", "Quarry", 2),
            PrerequisiteEdge::new("Granary", "Farm", 2),
            PrerequisiteEdge::new("Warehouse", "Town Hall", 2),
            PrerequisiteEdge::new("Tavern", "Town Hall", 2),
            PrerequisiteEdge::new("Watchtower", "Town Hall", 3),
            PrerequisiteEdge::new("Market", "Town Hall", 3),
            PrerequisiteEdge::new("Market", "Warehouse", 1),
        ];

        // The table above is a fixed, acyclic set of references.
        Self::new(definitions, edges).unwrap_or_else(|err| {
            unreachable!("default structure catalog is invalid: {err}")
        })
    }

    pub fn definition(&self, structure_type: &StructureType) -> Result<&StructureDefinition, CatalogError> {
        self.definitions
            .get(structure_type)
            .ok_or_else(|| CatalogError::UnknownStructure(structure_type.clone()))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &StructureDefinition> {
        self.definitions.values()
    }

    pub fn calculate_structure_modifiers(
        &self,
        structure_type: &StructureType,
        level: u32,
    ) -> Result<Vec<ResolvedModifier>, CatalogError> {
        let definition = self.definition(structure_type)?;
        if level > definition.max_level {
            return Err(CatalogError::LevelOutOfRange {
                structure: structure_type.clone(),
                level,
                max: definition.max_level,
            });
        }
        Ok(definition
            .modifiers
            .iter()
            .map(|spec| ResolvedModifier {
                kind: spec.kind,
                value: calculate_modifier_value(spec, level),
            })
            .collect())
    }

    pub fn get_prerequisites_for_structure(
        &self,
        structure_type: &StructureType,
    ) -> &[PrerequisiteEdge] {
        self.prerequisites
            .get(structure_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn structure_has_prerequisites(&self, structure_type: &StructureType) -> bool {
        !self.get_prerequisites_for_structure(structure_type).is_empty()
    }

    pub fn unmet_prerequisites(
        &self,
        structure_type: &StructureType,
        structures: &[StructureInstance],
    ) -> Vec<PrerequisiteEdge> {
        self.get_prerequisites_for_structure(structure_type)
            .iter()
            .filter(|edge| !edge.is_met(structures))
            .cloned()
            .collect()
    }

    /// Level the structure would reach if built or upgraded now.
    pub fn check_upgrade(
        &self,
        structure_type: &StructureType,
        structures: &[StructureInstance],
    ) -> Result<u32, UpgradeBlocked> {
        let definition = self.definition(structure_type)?;
        let current = structures
            .iter()
            .filter(|s| &s.structure_type == structure_type)
            .map(|s| s.level)
            .max()
            .unwrap_or(0);
        if current >= definition.max_level {
            return Err(UpgradeBlocked::AtMaxLevel(structure_type.clone()));
        }
        let missing = self.unmet_prerequisites(structure_type, structures);
        if !missing.is_empty() {
            return Err(UpgradeBlocked::MissingPrerequisites {
                structure: structure_type.clone(),
                missing,
            });
        }
        Ok(current + 1)
    }

    pub fn can_upgrade(&self, structure_type: &StructureType, structures: &[StructureInstance]) -> bool {
        self.check_upgrade(structure_type, structures).is_ok()
    }

    /// Depth-first search over structure -> required structure. Returns the
    /// first cycle found as a closed path, e.g. `[A, B, A]`.
    fn find_cycle(&self) -> Option<Vec<StructureType>> {
        let mut finished = BTreeSet::new();
        for start in self.definitions.keys() {
            if finished.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = self.visit(start, &mut path, &mut finished) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        node: &StructureType,
        path: &mut Vec<StructureType>,
        finished: &mut BTreeSet<StructureType>,
    ) -> Option<Vec<StructureType>> {
        if let Some(pos) = path.iter().position(|p| p == node) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(node.clone());
            return Some(cycle);
        }
        if finished.contains(node) {
            return None;
        }
        path.push(node.clone());
        for edge in self.get_prerequisites_for_structure(node) {
            if let Some(cycle) = self.visit(&edge.required_structure_type, path, finished) {
                return Some(cycle);
            }
        }
        path.pop();
        finished.insert(node.clone());
        None
    }
}
