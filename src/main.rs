use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use frontier::{
    scenario::{Scenario, ScenarioLoader},
    snapshot::{export_terrain, write_tick_report},
    world::TickWindow,
    InMemoryStore, TickOrchestrator,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Frontier world generator and tick runner")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, global = true, default_value = "scenarios/frontier_valley.yaml")]
    scenario: PathBuf,

    /// Directory for JSON exports
    #[arg(long, global = true, default_value = "snapshots")]
    out: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the terrain grid and export it
    Generate,
    /// Generate the world, place settlements and run tick passes
    Tick {
        /// Number of consecutive windows to run
        #[arg(long, default_value_t = 1)]
        windows: u32,

        /// First window to run; defaults to the current hour
        #[arg(long)]
        start_window: Option<i64>,

        /// Override the scenario's parallel threshold
        #[arg(long)]
        parallel_threshold: Option<usize>,
    },
}

fn init_logging(scenario: &Scenario) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&scenario.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let mut scenario = loader.load(&cli.scenario)?;
    init_logging(&scenario);

    let context = scenario.build_context()?;
    let grid = scenario.generate_terrain(&context)?;

    match cli.command {
        Command::Generate => {
            let path = export_terrain(&cli.out, &scenario.name, &grid)?;
            println!(
                "Scenario '{}': {}x{} terrain written to {}",
                scenario.name,
                grid.width,
                grid.height,
                path.display()
            );
            for (biome, count) in grid.biome_counts() {
                println!("  {biome:<12} {count}");
            }
        }
        Command::Tick {
            windows,
            start_window,
            parallel_threshold,
        } => {
            if let Some(threshold) = parallel_threshold {
                scenario.orchestrator.parallel_threshold = threshold;
            }
            let store = Arc::new(InMemoryStore::new());
            scenario.seed_store(&context, &grid, &store)?;
            let orchestrator =
                TickOrchestrator::standard(context, store.clone(), scenario.orchestrator.clone());

            let first = start_window
                .map(TickWindow)
                .unwrap_or_else(|| TickWindow::containing(Utc::now()));
            let mut window = first;
            for _ in 0..windows {
                let result = orchestrator.run_tick_at(scenario.world_id, window, window.start())?;
                let path = write_tick_report(&cli.out, &result)?;
                println!(
                    "{}: processed {}, skipped {}, failed {}, disasters {}, wasted {:.2} ({})",
                    window,
                    result.settlements_processed,
                    result.settlements_skipped,
                    result.failures.len(),
                    result.disasters.len(),
                    result.total_resources_wasted,
                    path.display()
                );
                window = window.next();
            }
        }
    }
    Ok(())
}
