pub mod config;
pub mod context;
pub mod disaster;
pub mod economy;
pub mod engine;
pub mod error;
pub mod rng;
pub mod scenario;
pub mod snapshot;
pub mod store;
pub mod systems;
pub mod terrain;
pub mod world;

pub use context::SimulationContext;
pub use engine::{TickOrchestrator, TickReport, TickResult};
pub use scenario::{Scenario, ScenarioLoader};
pub use store::{InMemoryStore, SettlementStore};
