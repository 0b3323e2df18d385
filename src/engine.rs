//! Tick orchestration
//!
//! One pass claims `(world, window)`, runs every settlement through the
//! configured systems on a private working copy, then commits each
//! settlement's update in a single store call. Failures stay with their
//! settlement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::context::SimulationContext;
use crate::disaster::DisasterEvent;
use crate::economy::{round_value, ModifierTotals, StructureInstance};
use crate::error::{ContextError, TickError};
use crate::store::{SettlementStore, SettlementUpdate, WindowClaim};
use crate::systems::{DisasterSystem, EconomySystem};
use crate::terrain::Biome;
use crate::world::{SettlementId, SettlementState, TickWindow, WorldId};

/// Read-only inputs shared by every settlement of one pass.
pub struct SystemContext<'a> {
    pub world_id: WorldId,
    pub tick_window: TickWindow,
    pub now: DateTime<Utc>,
    pub simulation: &'a SimulationContext,
}

impl<'a> SystemContext<'a> {
    pub fn biome(&self, id: &str) -> Result<&'a Biome, TickError> {
        self.simulation
            .biomes()
            .get(id)
            .ok_or_else(|| TickError::UnknownBiome(id.to_string()))
    }

    /// Stack the modifiers of every built structure.
    pub fn modifier_totals(
        &self,
        structures: &[StructureInstance],
    ) -> Result<ModifierTotals, TickError> {
        let catalog = self.simulation.structures();
        let mut totals = ModifierTotals::default();
        for structure in structures.iter().filter(|s| s.level > 0) {
            for modifier in
                catalog.calculate_structure_modifiers(&structure.structure_type, structure.level)?
            {
                totals.add(&modifier);
            }
        }
        Ok(totals)
    }
}

/// Working copy of one settlement plus what the systems did to it.
#[derive(Debug, Clone)]
pub struct SettlementWork {
    pub state: SettlementState,
    pub disaster: Option<DisasterEvent>,
    pub produced: f64,
    pub wasted: f64,
}

impl SettlementWork {
    pub fn new(state: SettlementState) -> Self {
        Self {
            state,
            disaster: None,
            produced: 0.0,
            wasted: 0.0,
        }
    }

    pub fn unmet_total(&self) -> f64 {
        self.state.unmet_demand.values().sum()
    }

    fn into_update(self, expected_version: u64, window: TickWindow) -> (SettlementUpdate, Outcome) {
        let outcome = Outcome::Processed {
            produced: self.produced,
            wasted: self.wasted,
            unmet: self.unmet_total(),
            disaster: self.disaster.clone(),
        };
        let state = self.state;
        let update = SettlementUpdate {
            id: state.id,
            expected_version,
            ledger: state.ledger,
            structures: state.structures,
            population: state.population,
            resilience: state.resilience,
            happiness: state.happiness,
            unmet_demand: state.unmet_demand,
            disaster: self.disaster,
            tick_window: window,
        };
        (update, outcome)
    }
}

/// One step of the per-settlement pipeline.
pub trait SettlementSystem: Send + Sync {
    fn name(&self) -> &str;
    fn run(
        &self,
        ctx: &SystemContext<'_>,
        work: &mut SettlementWork,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), TickError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementFailure {
    pub settlement_id: SettlementId,
    pub reason: String,
    /// Picked up again on the next scheduled window, never within this pass.
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementDisaster {
    pub settlement_id: SettlementId,
    pub event: DisasterEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickResult {
    pub world_id: WorldId,
    pub tick_window: TickWindow,
    pub claim: WindowClaim,
    pub settlements_processed: usize,
    pub settlements_skipped: usize,
    pub failures: Vec<SettlementFailure>,
    pub total_resources_produced: f64,
    pub total_resources_wasted: f64,
    pub total_unmet_demand: f64,
    pub disasters: Vec<SettlementDisaster>,
    pub duration_ms: u64,
}

impl TickResult {
    fn empty(world_id: WorldId, tick_window: TickWindow, claim: WindowClaim) -> Self {
        Self {
            world_id,
            tick_window,
            claim,
            settlements_processed: 0,
            settlements_skipped: 0,
            failures: Vec::new(),
            total_resources_produced: 0.0,
            total_resources_wasted: 0.0,
            total_unmet_demand: 0.0,
            disasters: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Payload returned to a manual trigger.
    pub fn report(&self) -> TickReport {
        TickReport {
            settlements_processed: self.settlements_processed,
            total_resources_wasted: self.total_resources_wasted,
            failures: self.failures.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub settlements_processed: usize,
    pub total_resources_wasted: f64,
    pub failures: Vec<SettlementFailure>,
    pub duration_ms: u64,
}

enum Outcome {
    Processed {
        produced: f64,
        wasted: f64,
        unmet: f64,
        disaster: Option<DisasterEvent>,
    },
    Skipped,
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    context: Option<SimulationContext>,
    store: Option<Arc<dyn SettlementStore>>,
    config: OrchestratorConfig,
    systems: Vec<Box<dyn SettlementSystem>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: SimulationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SettlementStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Systems run in the order they are added.
    pub fn with_system(mut self, system: impl SettlementSystem + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn build(self) -> Result<TickOrchestrator, ContextError> {
        Ok(TickOrchestrator {
            context: self
                .context
                .ok_or(ContextError::NotInitialized("simulation context"))?,
            store: self
                .store
                .ok_or(ContextError::NotInitialized("settlement store"))?,
            config: self.config,
            systems: self.systems,
        })
    }
}

pub struct TickOrchestrator {
    context: SimulationContext,
    store: Arc<dyn SettlementStore>,
    config: OrchestratorConfig,
    systems: Vec<Box<dyn SettlementSystem>>,
}

impl TickOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Disasters first so their losses land before this window's production.
    pub fn standard(
        context: SimulationContext,
        store: Arc<dyn SettlementStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            context,
            store,
            config,
            systems: vec![Box::new(DisasterSystem), Box::new(EconomySystem)],
        }
    }

    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name()).collect()
    }

    /// Run the window containing the current time.
    pub fn run_current_tick(&self, world_id: WorldId) -> Result<TickResult, TickError> {
        let now = Utc::now();
        self.run_tick_at(world_id, TickWindow::containing(now), now)
    }

    pub fn run_tick(&self, world_id: WorldId, window: TickWindow) -> Result<TickResult, TickError> {
        self.run_tick_at(world_id, window, Utc::now())
    }

    /// Errors only when the pass itself cannot start or finish; settlement
    /// failures are reported in the result.
    pub fn run_tick_at(
        &self,
        world_id: WorldId,
        window: TickWindow,
        now: DateTime<Utc>,
    ) -> Result<TickResult, TickError> {
        let started = Instant::now();

        let claim = self.store.claim_tick_window(world_id, window)?;
        if claim != WindowClaim::Acquired {
            info!(
                target: "frontier::tick",
                world = %world_id,
                window = %window,
                claim = ?claim,
                "tick window already claimed; nothing to do"
            );
            return Ok(TickResult::empty(world_id, window, claim));
        }

        // Held until the window is marked completed; an error or a panic in
        // between hands the window back for a later pass.
        let claim_guard = ClaimGuard {
            store: self.store.as_ref(),
            world_id,
            window,
            armed: true,
        };
        let ids = self.store.list_settlements(world_id)?;

        let ctx = SystemContext {
            world_id,
            tick_window: window,
            now,
            simulation: &self.context,
        };
        let deadline = self.config.pass_timeout().map(|timeout| started + timeout);
        let parallel = ids.len() >= self.config.parallel_threshold;
        debug!(
            target: "frontier::tick",
            world = %world_id,
            window = %window,
            settlements = ids.len(),
            parallel,
            "starting tick pass"
        );

        let outcomes: Vec<(SettlementId, Result<Outcome, TickError>)> = if parallel {
            ids.par_iter()
                .map(|&id| (id, self.run_before_deadline(&ctx, id, deadline)))
                .collect()
        } else {
            ids.iter()
                .map(|&id| (id, self.run_before_deadline(&ctx, id, deadline)))
                .collect()
        };

        let mut result = TickResult::empty(world_id, window, claim);
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Outcome::Processed {
                    produced,
                    wasted,
                    unmet,
                    disaster,
                }) => {
                    result.settlements_processed += 1;
                    result.total_resources_produced += produced;
                    result.total_resources_wasted += wasted;
                    result.total_unmet_demand += unmet;
                    if let Some(event) = disaster {
                        result.disasters.push(SettlementDisaster {
                            settlement_id: id,
                            event,
                        });
                    }
                }
                Ok(Outcome::Skipped) => result.settlements_skipped += 1,
                Err(err) => {
                    warn!(
                        target: "frontier::tick",
                        settlement = %id,
                        retryable = err.is_retryable(),
                        error = %err,
                        "settlement tick failed"
                    );
                    result.failures.push(SettlementFailure {
                        settlement_id: id,
                        reason: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                }
            }
        }
        result.total_resources_produced = round_value(result.total_resources_produced);
        result.total_resources_wasted = round_value(result.total_resources_wasted);
        result.total_unmet_demand = round_value(result.total_unmet_demand);

        self.store.complete_tick_window(world_id, window)?;
        claim_guard.disarm();
        result.duration_ms = elapsed_ms(started.elapsed());

        info!(
            target: "frontier::tick",
            world = %world_id,
            window = %window,
            processed = result.settlements_processed,
            skipped = result.settlements_skipped,
            failed = result.failures.len(),
            disasters = result.disasters.len(),
            wasted = result.total_resources_wasted,
            duration_ms = result.duration_ms,
            "tick pass complete"
        );
        Ok(result)
    }

    fn run_before_deadline(
        &self,
        ctx: &SystemContext<'_>,
        id: SettlementId,
        deadline: Option<Instant>,
    ) -> Result<Outcome, TickError> {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!(target: "frontier::tick", settlement = %id, "pass deadline reached; skipping");
            return Ok(Outcome::Skipped);
        }
        self.run_settlement(ctx, id)
    }

    fn run_settlement(&self, ctx: &SystemContext<'_>, id: SettlementId) -> Result<Outcome, TickError> {
        let state = self.store.load_settlement(ctx.world_id, id)?;
        if state
            .last_tick_window
            .is_some_and(|last| last >= ctx.tick_window)
        {
            return Ok(Outcome::Skipped);
        }

        let expected_version = state.version;
        let mut work = SettlementWork::new(state);
        for system in &self.systems {
            let mut rng = self.context.rng().create_entity_rng(
                system.name(),
                id.raw(),
                ctx.tick_window.raw(),
            );
            system.run(ctx, &mut work, &mut rng)?;
        }
        work.state.ledger.clamp_non_negative();

        let (update, outcome) = work.into_update(expected_version, ctx.tick_window);
        self.store.commit_settlement(ctx.world_id, update)?;
        Ok(outcome)
    }
}

/// Releases an acquired window claim on drop unless disarmed.
struct ClaimGuard<'a> {
    store: &'a dyn SettlementStore,
    world_id: WorldId,
    window: TickWindow,
    armed: bool,
}

impl ClaimGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            target: "frontier::tick",
            world = %self.world_id,
            window = %self.window,
            "tick pass aborted; releasing window"
        );
        if let Err(err) = self.store.release_tick_window(self.world_id, self.window) {
            warn!(target: "frontier::tick", error = %err, "failed to release tick window");
        }
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::ResourceKind;
    use crate::error::PersistenceError;
    use crate::store::InMemoryStore;
    use crate::terrain::TerrainGrid;

    const WORLD: WorldId = WorldId(3);

    struct Recorder;

    impl SettlementSystem for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn run(
            &self,
            _ctx: &SystemContext<'_>,
            work: &mut SettlementWork,
            _rng: &mut ChaCha8Rng,
        ) -> Result<(), TickError> {
            work.state.ledger.deposit(ResourceKind::Gold, 1.0);
            work.produced += 1.0;
            Ok(())
        }
    }

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=3 {
            let state = SettlementState::new(SettlementId(id), format!("Camp {id}"), "grassland");
            store.insert_settlement(WORLD, state).unwrap();
        }
        store
    }

    struct Collapse;

    impl SettlementSystem for Collapse {
        fn name(&self) -> &str {
            "collapse"
        }

        fn run(
            &self,
            _ctx: &SystemContext<'_>,
            _work: &mut SettlementWork,
            _rng: &mut ChaCha8Rng,
        ) -> Result<(), TickError> {
            panic!("system invariant broken");
        }
    }

    /// Forwards to an in-memory store but cannot mark windows completed.
    struct StuckStore(Arc<InMemoryStore>);

    impl SettlementStore for StuckStore {
        fn claim_tick_window(
            &self,
            world: WorldId,
            window: TickWindow,
        ) -> Result<WindowClaim, PersistenceError> {
            self.0.claim_tick_window(world, window)
        }

        fn complete_tick_window(
            &self,
            _world: WorldId,
            _window: TickWindow,
        ) -> Result<(), PersistenceError> {
            Err(PersistenceError::Transient("completion lost".into()))
        }

        fn release_tick_window(
            &self,
            world: WorldId,
            window: TickWindow,
        ) -> Result<(), PersistenceError> {
            self.0.release_tick_window(world, window)
        }

        fn list_settlements(&self, world: WorldId) -> Result<Vec<SettlementId>, PersistenceError> {
            self.0.list_settlements(world)
        }

        fn load_settlement(
            &self,
            world: WorldId,
            id: SettlementId,
        ) -> Result<SettlementState, PersistenceError> {
            self.0.load_settlement(world, id)
        }

        fn commit_settlement(
            &self,
            world: WorldId,
            update: SettlementUpdate,
        ) -> Result<(), PersistenceError> {
            self.0.commit_settlement(world, update)
        }

        fn store_terrain(&self, world: WorldId, grid: TerrainGrid) -> Result<(), PersistenceError> {
            self.0.store_terrain(world, grid)
        }
    }

    #[test]
    fn test_failed_completion_releases_window() {
        let inner = seeded_store();
        let orchestrator = TickOrchestrator::builder()
            .with_context(SimulationContext::with_defaults(1u64))
            .with_store(Arc::new(StuckStore(inner.clone())))
            .with_system(Recorder)
            .build()
            .unwrap();
        let window = TickWindow(600);

        let err = orchestrator
            .run_tick_at(WORLD, window, window.start())
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(inner.window_state(WORLD, window), None);

        // Settlements already committed are not applied twice on the retry.
        let retry = TickOrchestrator::builder()
            .with_context(SimulationContext::with_defaults(1u64))
            .with_store(inner.clone())
            .with_system(Recorder)
            .build()
            .unwrap();
        let result = retry.run_tick_at(WORLD, window, window.start()).unwrap();
        assert_eq!(result.claim, WindowClaim::Acquired);
        assert_eq!(result.settlements_processed, 0);
        assert_eq!(result.settlements_skipped, 3);
        let saved = inner.settlement(WORLD, SettlementId(1)).unwrap();
        assert_eq!(saved.ledger.get(ResourceKind::Gold), 1.0);
    }

    #[test]
    fn test_panicking_system_releases_window() {
        let store = seeded_store();
        let orchestrator = TickOrchestrator::builder()
            .with_context(SimulationContext::with_defaults(1u64))
            .with_store(store.clone())
            .with_system(Collapse)
            .build()
            .unwrap();
        let window = TickWindow(601);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            orchestrator.run_tick_at(WORLD, window, window.start())
        }));
        assert!(outcome.is_err());
        assert_eq!(store.window_state(WORLD, window), None);
        assert_eq!(
            store.claim_tick_window(WORLD, window),
            Ok(WindowClaim::Acquired)
        );
    }

    #[test]
    fn test_builder_requires_store() {
        let err = TickOrchestrator::builder()
            .with_context(SimulationContext::with_defaults(1u64))
            .build()
            .err();
        assert_eq!(err, Some(ContextError::NotInitialized("settlement store")));
    }

    #[test]
    fn test_custom_systems_run_in_order() {
        let store = seeded_store();
        let orchestrator = TickOrchestrator::builder()
            .with_context(SimulationContext::with_defaults(1u64))
            .with_store(store.clone())
            .with_system(Recorder)
            .build()
            .unwrap();
        assert_eq!(orchestrator.system_names(), vec!["recorder"]);

        let window = TickWindow(500);
        let result = orchestrator
            .run_tick_at(WORLD, window, window.start())
            .unwrap();
        assert_eq!(result.settlements_processed, 3);
        assert_eq!(result.total_resources_produced, 3.0);

        let saved = store.settlement(WORLD, SettlementId(2)).unwrap();
        assert_eq!(saved.ledger.get(ResourceKind::Gold), 1.0);
        assert_eq!(saved.last_tick_window, Some(window));
    }

    #[test]
    fn test_standard_pipeline_order() {
        let orchestrator = TickOrchestrator::standard(
            SimulationContext::with_defaults(1u64),
            Arc::new(InMemoryStore::new()),
            OrchestratorConfig::default(),
        );
        assert_eq!(orchestrator.system_names(), vec!["disaster", "economy"]);
    }

    #[test]
    fn test_report_uses_camel_case() {
        let mut result = TickResult::empty(WORLD, TickWindow(1), WindowClaim::Acquired);
        result.settlements_processed = 2;
        result.failures.push(SettlementFailure {
            settlement_id: SettlementId(9),
            reason: "transient store failure: timeout".into(),
            retryable: true,
        });
        let json = serde_json::to_value(result.report()).unwrap();
        assert_eq!(json["settlementsProcessed"], 2);
        assert_eq!(json["failures"][0]["settlementId"], 9);
        assert!(json.get("durationMs").is_some());
        assert!(json.get("totalResourcesWasted").is_some());
    }
}
