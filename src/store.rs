//! Persistence collaborator
//!
//! The tick engine only talks to storage through [`SettlementStore`]. The
//! in-memory implementation backs the CLI and the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use crate::disaster::DisasterEvent;
use crate::economy::{ResourceKind, ResourceLedger, StructureInstance};
use crate::error::PersistenceError;
use crate::terrain::TerrainGrid;
use crate::world::{SettlementId, SettlementState, TickWindow, WorldId};

/// Result of trying to claim a tick window for a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowClaim {
    Acquired,
    InProgress,
    Completed,
}

/// Everything a tick changed on one settlement, committed in one call.
#[derive(Debug, Clone)]
pub struct SettlementUpdate {
    pub id: SettlementId,
    /// Version the pass loaded; a newer stored version rejects the commit.
    pub expected_version: u64,
    pub ledger: ResourceLedger,
    pub structures: Vec<StructureInstance>,
    pub population: u64,
    pub resilience: f64,
    pub happiness: f64,
    pub unmet_demand: BTreeMap<ResourceKind, f64>,
    pub disaster: Option<DisasterEvent>,
    pub tick_window: TickWindow,
}

impl SettlementUpdate {
    pub fn apply_to(self, state: &mut SettlementState) {
        state.ledger = self.ledger;
        state.structures = self.structures;
        state.population = self.population;
        state.resilience = self.resilience;
        state.happiness = self.happiness;
        state.unmet_demand = self.unmet_demand;
        if let Some(event) = self.disaster {
            state.disaster_history.push(event);
        }
        state.last_tick_window = Some(self.tick_window);
        state.version += 1;
    }
}

pub trait SettlementStore: Send + Sync {
    /// Atomically claim `(world, window)`. Only one caller ever sees
    /// `Acquired` for a given pair.
    fn claim_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<WindowClaim, PersistenceError>;

    fn complete_tick_window(&self, world: WorldId, window: TickWindow)
        -> Result<(), PersistenceError>;

    /// Give up a claim so a later pass can retry the window.
    fn release_tick_window(&self, world: WorldId, window: TickWindow)
        -> Result<(), PersistenceError>;

    fn list_settlements(&self, world: WorldId) -> Result<Vec<SettlementId>, PersistenceError>;

    fn load_settlement(
        &self,
        world: WorldId,
        id: SettlementId,
    ) -> Result<SettlementState, PersistenceError>;

    /// Apply every field of `update` or none of them.
    fn commit_settlement(
        &self,
        world: WorldId,
        update: SettlementUpdate,
    ) -> Result<(), PersistenceError>;

    fn store_terrain(&self, world: WorldId, grid: TerrainGrid) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
struct StoreInner {
    settlements: HashMap<(WorldId, SettlementId), SettlementState>,
    windows: HashMap<(WorldId, TickWindow), WindowClaim>,
    terrain: HashMap<WorldId, TerrainGrid>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, PersistenceError> {
        self.inner
            .lock()
            .map_err(|_| PersistenceError::Transient("store lock poisoned".into()))
    }

    pub fn insert_settlement(
        &self,
        world: WorldId,
        state: SettlementState,
    ) -> Result<(), PersistenceError> {
        self.lock()?.settlements.insert((world, state.id), state);
        Ok(())
    }

    pub fn settlement(&self, world: WorldId, id: SettlementId) -> Option<SettlementState> {
        self.lock()
            .ok()?
            .settlements
            .get(&(world, id))
            .cloned()
    }

    pub fn terrain(&self, world: WorldId) -> Option<TerrainGrid> {
        self.lock().ok()?.terrain.get(&world).cloned()
    }

    pub fn window_state(&self, world: WorldId, window: TickWindow) -> Option<WindowClaim> {
        self.lock().ok()?.windows.get(&(world, window)).copied()
    }
}

impl SettlementStore for InMemoryStore {
    fn claim_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<WindowClaim, PersistenceError> {
        let mut inner = self.lock()?;
        match inner.windows.get(&(world, window)) {
            Some(existing) => Ok(*existing),
            None => {
                inner.windows.insert((world, window), WindowClaim::InProgress);
                Ok(WindowClaim::Acquired)
            }
        }
    }

    fn complete_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<(), PersistenceError> {
        self.lock()?
            .windows
            .insert((world, window), WindowClaim::Completed);
        Ok(())
    }

    fn release_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<(), PersistenceError> {
        self.lock()?.windows.remove(&(world, window));
        Ok(())
    }

    fn list_settlements(&self, world: WorldId) -> Result<Vec<SettlementId>, PersistenceError> {
        let inner = self.lock()?;
        let mut ids: Vec<SettlementId> = inner
            .settlements
            .keys()
            .filter(|(w, _)| *w == world)
            .map(|(_, id)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_settlement(
        &self,
        world: WorldId,
        id: SettlementId,
    ) -> Result<SettlementState, PersistenceError> {
        self.lock()?
            .settlements
            .get(&(world, id))
            .cloned()
            .ok_or(PersistenceError::NotFound(id))
    }

    fn commit_settlement(
        &self,
        world: WorldId,
        update: SettlementUpdate,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.lock()?;
        let state = inner
            .settlements
            .get_mut(&(world, update.id))
            .ok_or(PersistenceError::NotFound(update.id))?;
        if state.version != update.expected_version {
            return Err(PersistenceError::Conflict(format!(
                "{} is at version {}, update expected {}",
                update.id, state.version, update.expected_version
            )));
        }
        debug!(
            target: "frontier::store",
            settlement = %update.id,
            version = state.version + 1,
            "committed settlement"
        );
        update.apply_to(state);
        Ok(())
    }

    fn store_terrain(&self, world: WorldId, grid: TerrainGrid) -> Result<(), PersistenceError> {
        self.lock()?.terrain.insert(world, grid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: WorldId = WorldId(1);

    fn update_for(state: &SettlementState, window: TickWindow) -> SettlementUpdate {
        SettlementUpdate {
            id: state.id,
            expected_version: state.version,
            ledger: state.ledger.clone(),
            structures: state.structures.clone(),
            population: state.population + 1,
            resilience: state.resilience,
            happiness: 3.0,
            unmet_demand: BTreeMap::new(),
            disaster: None,
            tick_window: window,
        }
    }

    #[test]
    fn test_window_is_claimed_once() {
        let store = InMemoryStore::new();
        let window = TickWindow(10);
        assert_eq!(store.claim_tick_window(WORLD, window), Ok(WindowClaim::Acquired));
        assert_eq!(store.claim_tick_window(WORLD, window), Ok(WindowClaim::InProgress));
        store.complete_tick_window(WORLD, window).unwrap();
        assert_eq!(store.claim_tick_window(WORLD, window), Ok(WindowClaim::Completed));
        assert_eq!(
            store.claim_tick_window(WorldId(2), window),
            Ok(WindowClaim::Acquired)
        );
    }

    #[test]
    fn test_released_window_can_be_claimed_again() {
        let store = InMemoryStore::new();
        let window = TickWindow(3);
        store.claim_tick_window(WORLD, window).unwrap();
        store.release_tick_window(WORLD, window).unwrap();
        assert_eq!(store.claim_tick_window(WORLD, window), Ok(WindowClaim::Acquired));
    }

    #[test]
    fn test_commit_bumps_version_and_rejects_stale_updates() {
        let store = InMemoryStore::new();
        let state = SettlementState::new(SettlementId(7), "Ashford", "steppe").with_population(10);
        store.insert_settlement(WORLD, state.clone()).unwrap();

        store
            .commit_settlement(WORLD, update_for(&state, TickWindow(1)))
            .unwrap();
        let saved = store.settlement(WORLD, SettlementId(7)).unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(saved.population, 11);
        assert_eq!(saved.last_tick_window, Some(TickWindow(1)));

        let stale = store.commit_settlement(WORLD, update_for(&state, TickWindow(2)));
        assert!(matches!(stale, Err(PersistenceError::Conflict(_))));
    }

    #[test]
    fn test_missing_settlement_is_not_found() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.load_settlement(WORLD, SettlementId(5)).unwrap_err(),
            PersistenceError::NotFound(SettlementId(5))
        );
    }
}
