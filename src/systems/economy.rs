use std::collections::BTreeMap;

use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::{
    economy::{round_value, ResourceKind},
    engine::{SettlementSystem, SettlementWork, SystemContext},
    error::TickError,
};

/// Applies one window of stacked production and consumption to the ledger.
///
/// Capacity is re-derived first so holdings above a reduced cap spill as
/// waste. Production and demand are netted per resource: a surplus is
/// deposited and only its overflow is waste, a deficit is drawn from the
/// holdings and any shortfall becomes unmet demand that costs happiness.
pub struct EconomySystem;

impl EconomySystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EconomySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementSystem for EconomySystem {
    fn name(&self) -> &str {
        "economy"
    }

    fn run(
        &self,
        ctx: &SystemContext<'_>,
        work: &mut SettlementWork,
        _rng: &mut ChaCha8Rng,
    ) -> Result<(), TickError> {
        let config = ctx.simulation.economy();
        let biome = ctx.biome(&work.state.biome_id)?;
        let totals = ctx.modifier_totals(&work.state.structures)?;
        let state = &mut work.state;

        for resource in ResourceKind::ALL {
            state
                .ledger
                .set_capacity(resource, config.base_storage + totals.storage(resource));
        }
        for spilled in state.ledger.enforce_capacity().values() {
            work.wasted += spilled;
        }

        let population = state.population as f64;
        let mut unmet = BTreeMap::new();
        for resource in ResourceKind::ALL {
            let produced = totals.net_production(resource, biome.yield_multiplier(resource));
            let upkeep = match resource {
                ResourceKind::Food => population * config.food_per_capita,
                ResourceKind::Water => population * config.water_per_capita,
                _ => 0.0,
            };
            let demand = round_value(totals.consumption(resource) + upkeep);
            work.produced += produced;

            // Only the net change touches the ledger.
            let net = round_value(produced - demand);
            if net >= 0.0 {
                work.wasted += state.ledger.deposit(resource, net).wasted;
            } else {
                let shortfall = round_value(state.ledger.withdraw(resource, -net).shortfall);
                if shortfall > 0.0 {
                    unmet.insert(resource, shortfall);
                }
            }
        }

        state.happiness =
            round_value(totals.happiness - config.shortage_happiness_penalty * unmet.len() as f64);
        debug!(
            target: "frontier::economy",
            settlement = %state.id,
            produced = work.produced,
            wasted = work.wasted,
            shortages = unmet.len(),
            "economy applied"
        );
        state.unmet_demand = unmet;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::context::SimulationContext;
    use crate::world::{SettlementId, SettlementState, TickWindow, WorldId};

    fn run(state: SettlementState) -> SettlementWork {
        let simulation = SimulationContext::with_defaults(5u64);
        let ctx = SystemContext {
            world_id: WorldId(1),
            tick_window: TickWindow(10),
            now: TickWindow(10).start(),
            simulation: &simulation,
        };
        let mut work = SettlementWork::new(state);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        EconomySystem::new().run(&ctx, &mut work, &mut rng).unwrap();
        work
    }

    #[test]
    fn test_production_waste_and_shortage() {
        // Farm 2 in grassland: 12 food * 1.3 yield, 2 water consumed.
        let state = SettlementState::new(SettlementId(1), "Millbrook", "grassland")
            .with_population(20)
            .with_structure("Farm", 2)
            .with_resource(ResourceKind::Food, 95.0)
            .with_resource(ResourceKind::Water, 1.0);
        let work = run(state);

        assert!((work.produced - 15.6).abs() < 1e-9);
        // Net 14.6 food after 1 upkeep; 95 + 14.6 exceeds the base capacity of 100
        assert!((work.wasted - 9.6).abs() < 1e-9);
        assert_eq!(work.state.ledger.get(ResourceKind::Food), 100.0);

        // 2 water for the farm plus 0.8 upkeep against 1 held
        assert_eq!(work.state.ledger.get(ResourceKind::Water), 0.0);
        assert_eq!(work.state.unmet_demand.get(&ResourceKind::Water), Some(&1.8));
        assert_eq!(work.state.happiness, -5.0);
    }

    #[test]
    fn test_full_store_only_wastes_net_surplus() {
        // Well 1: 11 water; Farm 2 draws 2 water
        let state = SettlementState::new(SettlementId(4), "Brimming", "grassland")
            .with_structure("Well", 1)
            .with_structure("Farm", 2)
            .with_resource(ResourceKind::Water, 100.0);
        let work = run(state);

        assert!((work.wasted - 9.0).abs() < 1e-9);
        assert_eq!(work.state.ledger.get(ResourceKind::Water), 100.0);
        assert!((work.produced - 26.6).abs() < 1e-9);
        assert!(work.state.unmet_demand.is_empty());
    }

    #[test]
    fn test_level_zero_structures_do_nothing() {
        let state = SettlementState::new(SettlementId(2), "Ruins", "grassland")
            .with_structure("Farm", 0);
        let work = run(state);
        assert_eq!(work.produced, 0.0);
        assert!(work.state.unmet_demand.is_empty());
    }

    #[test]
    fn test_unknown_biome_fails() {
        let simulation = SimulationContext::with_defaults(5u64);
        let ctx = SystemContext {
            world_id: WorldId(1),
            tick_window: TickWindow(10),
            now: TickWindow(10).start(),
            simulation: &simulation,
        };
        let mut work = SettlementWork::new(SettlementState::new(SettlementId(3), "Lost", "moon"));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = EconomySystem::new().run(&ctx, &mut work, &mut rng).unwrap_err();
        assert_eq!(err, TickError::UnknownBiome("moon".into()));
    }
}
