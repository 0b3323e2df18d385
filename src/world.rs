use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::disaster::DisasterEvent;
use crate::economy::{ResourceKind, ResourceLedger, StructureInstance};

const SECONDS_PER_WINDOW: i64 = 3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub u64);

impl WorldId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub u64);

impl SettlementId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "settlement-{}", self.0)
    }
}

/// Hour bucket a tick pass is applied to. Used as the idempotency key
/// together with the world id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickWindow(pub i64);

impl TickWindow {
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self(at.timestamp().div_euclid(SECONDS_PER_WINDOW))
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Start of the bucket. Falls back to the epoch for buckets chrono
    /// cannot represent.
    pub fn start(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0.saturating_mul(SECONDS_PER_WINDOW), 0)
            .single()
            .unwrap_or_default()
    }

    pub fn windows_since(self, earlier: TickWindow) -> i64 {
        self.0 - earlier.0
    }
}

impl fmt::Display for TickWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Everything the persistence collaborator hands the tick engine about one
/// settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementState {
    pub id: SettlementId,
    pub name: String,
    pub biome_id: String,
    pub tile: (u32, u32),
    pub population: u64,
    pub structures: Vec<StructureInstance>,
    pub ledger: ResourceLedger,
    #[serde(default)]
    pub resilience: f64,
    #[serde(default)]
    pub happiness: f64,
    #[serde(default)]
    pub unmet_demand: BTreeMap<ResourceKind, f64>,
    #[serde(default)]
    pub disaster_history: Vec<DisasterEvent>,
    #[serde(default)]
    pub last_tick_window: Option<TickWindow>,
    /// Bumped by the store on every commit.
    #[serde(default)]
    pub version: u64,
}

impl SettlementState {
    pub fn new(id: SettlementId, name: impl Into<String>, biome_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            biome_id: biome_id.into(),
            tile: (0, 0),
            population: 0,
            structures: Vec::new(),
            ledger: ResourceLedger::new(),
            resilience: 0.0,
            happiness: 0.0,
            unmet_demand: BTreeMap::new(),
            disaster_history: Vec::new(),
            last_tick_window: None,
            version: 0,
        }
    }

    pub fn with_population(mut self, population: u64) -> Self {
        self.population = population;
        self
    }

    pub fn with_structure(mut self, structure_type: &str, level: u32) -> Self {
        self.structures
            .push(StructureInstance::new(structure_type, level));
        self
    }

    pub fn with_resource(mut self, resource: ResourceKind, amount: f64) -> Self {
        self.ledger.set(resource, amount);
        self
    }

    pub fn with_tile(mut self, x: u32, y: u32) -> Self {
        self.tile = (x, y);
        self
    }

    /// Disasters recorded within the last `lookback` windows before `window`.
    pub fn recent_disasters(&self, window: TickWindow, lookback: i64) -> u32 {
        self.disaster_history
            .iter()
            .filter(|event| {
                let age = window.windows_since(event.tick_window);
                (0..=lookback).contains(&age)
            })
            .count() as u32
    }

    pub fn built_structures(&self) -> impl Iterator<Item = &StructureInstance> {
        self.structures.iter().filter(|s| s.level > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_window_buckets_by_hour() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 59, 59).unwrap();
        let window = TickWindow::containing(at);
        let next_hour = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();

        assert_eq!(TickWindow::containing(next_hour), window.next());
        assert_eq!(window.start(), Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_built_structures_skip_level_zero() {
        let state = SettlementState::new(SettlementId(1), "Oakridge", "grassland")
            .with_structure("Farm", 2)
            .with_structure("Quarry", 0);
        assert_eq!(state.built_structures().count(), 1);
    }
}
