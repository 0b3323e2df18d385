use std::sync::Arc;

use frontier::{
    config::{DisasterConfig, OrchestratorConfig},
    disaster::DisasterType,
    economy::{round_value, ResourceKind, StructureCatalog},
    error::PersistenceError,
    scenario::ScenarioLoader,
    snapshot::write_tick_report,
    store::{SettlementStore, SettlementUpdate, WindowClaim},
    terrain::{Biome, BiomeCatalog, TerrainGrid},
    world::{SettlementId, SettlementState, TickWindow, WorldId},
    InMemoryStore, SimulationContext, TickOrchestrator,
};

const WORLD: WorldId = WorldId(7);

fn village(id: u64) -> SettlementState {
    SettlementState::new(SettlementId(id), format!("Village {id}"), "grassland")
        .with_population(30)
        .with_structure("Town Hall", 1)
        .with_structure("Farm", 2)
        .with_structure("Well", 1)
        .with_resource(ResourceKind::Food, 50.0)
        .with_resource(ResourceKind::Water, 40.0)
}

fn seeded_store(count: u64) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for id in 1..=count {
        store.insert_settlement(WORLD, village(id)).unwrap();
    }
    store
}

fn standard_orchestrator(
    store: Arc<dyn SettlementStore>,
    config: OrchestratorConfig,
) -> TickOrchestrator {
    TickOrchestrator::standard(SimulationContext::with_defaults(11u64), store, config)
}

/// Delegates to an in-memory store but refuses commits for one settlement.
struct FlakyStore {
    inner: InMemoryStore,
    broken: SettlementId,
}

impl SettlementStore for FlakyStore {
    fn claim_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<WindowClaim, PersistenceError> {
        self.inner.claim_tick_window(world, window)
    }

    fn complete_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<(), PersistenceError> {
        self.inner.complete_tick_window(world, window)
    }

    fn release_tick_window(
        &self,
        world: WorldId,
        window: TickWindow,
    ) -> Result<(), PersistenceError> {
        self.inner.release_tick_window(world, window)
    }

    fn list_settlements(&self, world: WorldId) -> Result<Vec<SettlementId>, PersistenceError> {
        self.inner.list_settlements(world)
    }

    fn load_settlement(
        &self,
        world: WorldId,
        id: SettlementId,
    ) -> Result<SettlementState, PersistenceError> {
        self.inner.load_settlement(world, id)
    }

    fn commit_settlement(
        &self,
        world: WorldId,
        update: SettlementUpdate,
    ) -> Result<(), PersistenceError> {
        if update.id == self.broken {
            return Err(PersistenceError::Transient("write timed out".into()));
        }
        self.inner.commit_settlement(world, update)
    }

    fn store_terrain(&self, world: WorldId, grid: TerrainGrid) -> Result<(), PersistenceError> {
        self.inner.store_terrain(world, grid)
    }
}

#[test]
fn second_run_of_a_window_is_a_no_op() {
    let store = seeded_store(4);
    let orchestrator = standard_orchestrator(store.clone(), OrchestratorConfig::default());
    let window = TickWindow(480_000);

    let first = orchestrator
        .run_tick_at(WORLD, window, window.start())
        .unwrap();
    assert_eq!(first.claim, WindowClaim::Acquired);
    assert_eq!(first.settlements_processed, 4);
    let after_first = store.settlement(WORLD, SettlementId(1)).unwrap();

    let second = orchestrator
        .run_tick_at(WORLD, window, window.start())
        .unwrap();
    assert_eq!(second.claim, WindowClaim::Completed);
    assert_eq!(second.settlements_processed, 0);
    assert_eq!(second.report().settlements_processed, 0);

    let after_second = store.settlement(WORLD, SettlementId(1)).unwrap();
    assert_eq!(after_first.version, after_second.version);
    assert_eq!(after_first.ledger, after_second.ledger);
    assert_eq!(
        store.window_state(WORLD, window),
        Some(WindowClaim::Completed)
    );
}

#[test]
fn failed_commit_does_not_stop_the_pass() {
    let inner = InMemoryStore::new();
    for id in 1..=5 {
        inner.insert_settlement(WORLD, village(id)).unwrap();
    }
    let store = Arc::new(FlakyStore {
        inner,
        broken: SettlementId(3),
    });
    let orchestrator = standard_orchestrator(store.clone(), OrchestratorConfig::default());
    let window = TickWindow(480_001);

    let result = orchestrator
        .run_tick_at(WORLD, window, window.start())
        .unwrap();
    assert_eq!(result.settlements_processed, 4);
    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.settlement_id, SettlementId(3));
    assert!(failure.retryable);
    assert!(failure.reason.contains("write timed out"));

    let untouched = store.inner.settlement(WORLD, SettlementId(3)).unwrap();
    assert_eq!(untouched.version, 0);
    assert_eq!(untouched.last_tick_window, None);
    for id in [1, 2, 4, 5] {
        let state = store.inner.settlement(WORLD, SettlementId(id)).unwrap();
        assert_eq!(state.last_tick_window, Some(window));
    }
}

#[test]
fn concurrent_passes_for_one_window_apply_once() {
    let store = seeded_store(6);
    let orchestrator = standard_orchestrator(store.clone(), OrchestratorConfig::default());
    let window = TickWindow(480_002);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| orchestrator.run_tick_at(WORLD, window, window.start())))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect()
    });

    let winners = results
        .iter()
        .filter(|r| r.claim == WindowClaim::Acquired)
        .count();
    assert_eq!(winners, 1);
    let processed: usize = results.iter().map(|r| r.settlements_processed).sum();
    assert_eq!(processed, 6);
    for id in 1..=6 {
        assert_eq!(store.settlement(WORLD, SettlementId(id)).unwrap().version, 1);
    }
}

#[test]
fn disaster_loss_lands_before_production() {
    let badlands = Biome::new("badlands", "Badlands", (-1.0, 1.0), (-1.0, 1.0))
        .with_risk(1.0, &[(DisasterType::Earthquake, 1.0)]);
    let context = SimulationContext::builder()
        .with_biomes(BiomeCatalog::new(vec![badlands], None).unwrap())
        .with_structures(StructureCatalog::with_defaults())
        .with_disaster_config(DisasterConfig {
            max_probability: 1.0,
            damage_rate: 0.0,
            ..DisasterConfig::default()
        })
        .with_seed(3u64)
        .build()
        .unwrap();

    let store = Arc::new(InMemoryStore::new());
    let settlement = SettlementState::new(SettlementId(1), "Faultline", "badlands")
        .with_structure("Farm", 1)
        .with_resource(ResourceKind::Food, 80.0);
    store.insert_settlement(WORLD, settlement).unwrap();

    let orchestrator =
        TickOrchestrator::standard(context, store.clone(), OrchestratorConfig::default());
    let window = TickWindow(480_003);
    let result = orchestrator
        .run_tick_at(WORLD, window, window.start())
        .unwrap();

    assert_eq!(result.disasters.len(), 1);
    let event = &result.disasters[0].event;
    assert_eq!(event.tick_window, window);
    let lost = event
        .resources_lost
        .get(&ResourceKind::Food)
        .copied()
        .unwrap_or(0.0);
    // Loss is a share of the holdings before this window's 9 food.
    let intensity = event.severity as f64 / 100.0;
    assert_eq!(lost, round_value(80.0 * intensity * 0.5));

    let saved = store.settlement(WORLD, SettlementId(1)).unwrap();
    assert!((saved.ledger.get(ResourceKind::Food) - (80.0 - lost + 9.0)).abs() < 1e-9);
    assert_eq!(saved.disaster_history.len(), 1);
    assert!(saved.resilience >= 0.0);
}

#[test]
fn expired_deadline_skips_remaining_settlements() {
    let store = seeded_store(3);
    let config = OrchestratorConfig {
        pass_timeout_ms: Some(0),
        ..OrchestratorConfig::default()
    };
    let orchestrator = standard_orchestrator(store.clone(), config);
    let window = TickWindow(480_004);

    let result = orchestrator
        .run_tick_at(WORLD, window, window.start())
        .unwrap();
    assert_eq!(result.settlements_processed, 0);
    assert_eq!(result.settlements_skipped, 3);
    assert!(result.failures.is_empty());
    assert_eq!(store.settlement(WORLD, SettlementId(2)).unwrap().version, 0);

    // Skipped settlements are picked up by the next window.
    let patient = standard_orchestrator(store.clone(), OrchestratorConfig::default());
    let next = patient
        .run_tick_at(WORLD, window.next(), window.next().start())
        .unwrap();
    assert_eq!(next.settlements_processed, 3);
}

#[test]
fn parallel_and_sequential_passes_agree() {
    let window = TickWindow(480_005);
    let run = |threshold: usize| {
        let store = seeded_store(12);
        let config = OrchestratorConfig {
            parallel_threshold: threshold,
            ..OrchestratorConfig::default()
        };
        let result = standard_orchestrator(store.clone(), config)
            .run_tick_at(WORLD, window, window.start())
            .unwrap();
        let ledgers: Vec<_> = (1..=12)
            .map(|id| store.settlement(WORLD, SettlementId(id)).unwrap().ledger)
            .collect();
        (result.total_resources_produced, result.disasters, ledgers)
    };
    assert_eq!(run(1), run(usize::MAX));
}

#[test]
fn fixture_scenario_runs_several_windows() {
    let loader = ScenarioLoader::new(env!("CARGO_MANIFEST_DIR"));
    let scenario = loader.load("scenarios/frontier_valley.yaml").unwrap();
    let context = scenario.build_context().unwrap();
    let grid = scenario.generate_terrain(&context).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let ids = scenario.seed_store(&context, &grid, &store).unwrap();
    assert_eq!(ids.len(), 5);

    let orchestrator =
        TickOrchestrator::standard(context, store.clone(), scenario.orchestrator.clone());
    let reports = tempfile::tempdir().unwrap();
    let mut window = TickWindow(475_000);
    for _ in 0..3 {
        let result = orchestrator
            .run_tick_at(scenario.world_id, window, window.start())
            .unwrap();
        assert_eq!(result.settlements_processed, 5);
        assert!(result.failures.is_empty());
        assert!(result.total_resources_wasted >= 0.0);

        let path = write_tick_report(reports.path(), &result).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["settlements_processed"], 5);
        window = window.next();
    }

    for id in ids {
        let state = store.settlement(scenario.world_id, id).unwrap();
        assert_eq!(state.version, 3);
        assert!(state.ledger.iter().all(|(_, amount)| amount >= 0.0));
        for (resource, amount) in state.ledger.iter() {
            if let Some(cap) = state.ledger.capacity(resource) {
                assert!(amount <= cap + 1e-9);
            }
        }
    }
}
