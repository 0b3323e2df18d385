use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::{
    disaster::RiskProfile,
    economy::round_value,
    engine::{SettlementSystem, SettlementWork, SystemContext},
    error::TickError,
};

/// Rolls at most one disaster per settlement per window and applies its
/// losses to the working copy.
pub struct DisasterSystem;

impl DisasterSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DisasterSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementSystem for DisasterSystem {
    fn name(&self) -> &str {
        "disaster"
    }

    fn run(
        &self,
        ctx: &SystemContext<'_>,
        work: &mut SettlementWork,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), TickError> {
        let engine = ctx.simulation.disasters();
        let biome = ctx.biome(&work.state.biome_id)?;
        let structure_resilience = ctx.modifier_totals(&work.state.structures)?.resilience;

        let state = &work.state;
        let profile = RiskProfile {
            biome,
            structures: &state.structures,
            population: state.population,
            ledger: &state.ledger,
            recent_disasters: state
                .recent_disasters(ctx.tick_window, engine.config().history_lookback_windows),
            resilience: state.resilience + structure_resilience,
            timestamp: ctx.now,
            tick_window: ctx.tick_window,
        };
        let Some(event) = engine.roll_disaster(&profile, rng) else {
            return Ok(());
        };

        let state = &mut work.state;
        for (&resource, &lost) in &event.resources_lost {
            state.ledger.withdraw(resource, lost);
        }
        state.population = state.population.saturating_sub(event.casualties);
        event.apply_structure_damage(&mut state.structures);
        state.resilience = round_value(state.resilience + event.resilience_gained);

        info!(
            target: "frontier::disaster",
            settlement = %state.id,
            disaster = %event.disaster_type,
            severity = event.severity,
            level = ?event.severity_level,
            casualties = event.casualties,
            damaged = event.structures_damaged,
            destroyed = event.structures_destroyed,
            resources_lost = event.total_resources_lost(),
            "disaster struck"
        );
        work.disaster = Some(event);
        Ok(())
    }
}
