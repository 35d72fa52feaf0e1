//! Benchmark for a full world tick.
//!
//! Run with: cargo bench --bench tick_pipeline

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tickworld::services::MemoryStore;
use tickworld::{EngineConfig, Location, Npc, Player, World, WorldTickPipeline};

fn populated(players: usize, npcs: usize) -> WorldTickPipeline<Player, Npc> {
    let config = EngineConfig {
        queued_loop_threshold: players.max(npcs),
        ..EngineConfig::default()
    };
    let world = World::new(config.max_players, config.max_npcs);

    for i in 0..players {
        let x = 3200 + (i % 40) as i32;
        let y = 3200 + (i / 40) as i32;
        world.queue_player(Player::bot(format!("bot{}", i), Location::new(x, y, 0)));
    }
    for i in 0..npcs {
        let x = 3180 + (i % 80) as i32;
        let y = 3180 + (i / 80) as i32;
        world.queue_npc(Npc::new(1 + (i % 20) as u32, Location::new(x, y, 0), 4));
    }

    let mut pipeline = WorldTickPipeline::new(world, &config, Arc::new(MemoryStore::new()))
        .expect("worker pool");
    pipeline.process().expect("admission tick");
    pipeline
}

fn benchmark_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");

    for &(players, npcs) in &[(50usize, 500usize), (250, 2500), (500, 5000)] {
        let mut pipeline = populated(players, npcs);
        group.throughput(Throughput::Elements((players + npcs) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}p_{}n", players, npcs)),
            &players,
            |b, _| {
                b.iter(|| black_box(pipeline.process().expect("tick")));
            },
        );
    }

    group.finish();
}

fn benchmark_synced_bots(c: &mut Criterion) {
    let config = EngineConfig {
        sync_synthetic_players: true,
        queued_loop_threshold: 500,
        ..EngineConfig::default()
    };
    let world = World::new(config.max_players, config.max_npcs);
    for i in 0..500 {
        world.queue_player(Player::bot(
            format!("bot{}", i),
            Location::new(3200 + (i % 25), 3200 + (i / 25), 0),
        ));
    }
    let mut pipeline = WorldTickPipeline::new(world, &config, Arc::new(MemoryStore::new()))
        .expect("worker pool");

    c.bench_function("world_tick_500_synced_bots", |b| {
        b.iter(|| black_box(pipeline.process().expect("tick")));
    });
}

criterion_group!(benches, benchmark_tick, benchmark_synced_bots);
criterion_main!(benches);
