//! Tickworld Server
//!
//! Runs the world clock against a demo world of simulated players and
//! wandering NPCs until Ctrl-C or a fatal engine failure.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tickworld::services::{JsonFileStore, ScheduledTask, TaskRunner, TaskStatus};
use tickworld::{
    EngineConfig, Location, Npc, Player, TickScheduler, World, WorldTickPipeline, VERSION,
};

/// Demo population.
const DEMO_BOTS: usize = 20;
const DEMO_NPCS: usize = 200;

/// Ticks between demo bot arrivals.
const ARRIVAL_INTERVAL: u32 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = EngineConfig::from_env().context("invalid engine configuration")?;

    info!("Tickworld Server v{}", VERSION);
    info!("Tick Rate: {} ms", config.tick_rate_ms);
    info!("Workers: {}", config.worker_threads);
    info!("Saves: {}", config.save_dir.display());

    let world: World<Player, Npc> = World::new(config.max_players, config.max_npcs);
    populate(&world);
    let admissions = world.player_admissions();

    let store = Arc::new(JsonFileStore::new(config.save_dir.clone()));
    let mut pipeline = WorldTickPipeline::new(world, &config, store)
        .context("failed to start worker pool")?;

    // New bots keep arriving from outside the tick
    let tasks = TaskRunner::new();
    let mut arrivals = 0usize;
    tasks.submit(ScheduledTask::new("bot-arrivals", ARRIVAL_INTERVAL, move || {
        arrivals += 1;
        let name = format!("visitor{}", arrivals);
        admissions.push(Arc::new(Mutex::new(Player::bot(name, Location::new(3222, 3218, 0)))));
        Ok(TaskStatus::Repeat)
    }));
    pipeline.add_hook(Box::new(tasks));

    let mut handle = TickScheduler::new(pipeline, &config)
        .init()
        .context("failed to start clock thread")?;

    let outcome = tokio::select! {
        outcome = handle.finished() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            handle.stop();
            handle.finished().await
        }
    };

    if let Err(fatal) = outcome {
        error!("{}", fatal);
        std::process::exit(1);
    }

    info!("Server stopped");
    Ok(())
}

/// Queue the demo population for admission on the first ticks.
fn populate(world: &World<Player, Npc>) {
    for i in 0..DEMO_BOTS {
        let x = 3200 + (i % 5) as i32 * 3;
        let y = 3200 + (i / 5) as i32 * 3;
        world.queue_player(Player::bot(format!("bot{}", i), Location::new(x, y, 0)));
    }
    for i in 0..DEMO_NPCS {
        let x = 3180 + (i % 20) as i32 * 2;
        let y = 3180 + (i / 20) as i32 * 2;
        world.queue_npc(Npc::new(1 + (i % 10) as u32, Location::new(x, y, 0), 3));
    }
    info!("Queued {} bots and {} NPCs", DEMO_BOTS, DEMO_NPCS);
}
