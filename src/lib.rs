//! # Tickworld Server
//!
//! Fixed-rate simulation engine for a persistent multiplayer world.
//! Every tick advances all resident actors (players and NPCs) once, and a
//! fault in one actor never halts the tick for the others.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TICKWORLD SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Concurrency primitives                    │
//! │  ├── registry.rs - Bounded slotted actor registry            │
//! │  ├── queue.rs    - Lock-free admit/evict queues              │
//! │  ├── barrier.rs  - Fork-join worker pool (phase barrier)     │
//! │  └── clock.rs    - Wall clock / simulated clock              │
//! │                                                              │
//! │  world/          - The simulated world                       │
//! │  ├── actor.rs    - Actor capability traits, faults           │
//! │  ├── player.rs   - Concrete player                           │
//! │  ├── npc.rs      - Concrete NPC                              │
//! │  ├── view.rs     - Read-only snapshot for view building      │
//! │  ├── events.rs   - Admit / evict / flush notifications       │
//! │  ├── recovery.rs - Per-entity / per-engine fault counters    │
//! │  ├── world.rs    - World context (registries + queues)       │
//! │  └── pipeline.rs - One tick: drains, serial and parallel     │
//! │                                                              │
//! │  engine/         - Fixed-rate clock and fatal policy         │
//! │  services/       - Persistence, transport, hooks, monitor    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Order
//!
//! 1. Content hooks (scheduled tasks, minigames), then ground-item upkeep
//! 2. Player admissions, player evictions, NPC admissions and evictions
//! 3. Serial player pass: all packets first, then all logic, by slot
//! 4. Parallel barrier phases: NPC logic, view building, flush, NPC reset
//!
//! Structural changes to the registries only happen in step 2, before any
//! worker touches a slot.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod engine;
pub mod services;
pub mod world;

// Re-export commonly used types
pub use crate::core::barrier::{BarrierError, SyncBarrierExecutor};
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::queue::PendingQueue;
pub use crate::core::registry::{ActorHandle, EntityRegistry, RegistryError};
pub use crate::engine::config::EngineConfig;
pub use crate::engine::scheduler::{FatalShutdown, SchedulerHandle, TickScheduler, TickTarget};
pub use crate::world::actor::{Actor, ActorFault, Location, NpcActor, PlayerActor, UpdateFlags};
pub use crate::world::npc::Npc;
pub use crate::world::pipeline::{TickError, TickReport, WorldTickPipeline};
pub use crate::world::player::Player;
pub use crate::world::world::World;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tick period in milliseconds.
pub const DEFAULT_TICK_RATE_MS: u64 = 600;

/// Maximum entries drained from one pending queue per tick.
pub const QUEUED_LOOP_THRESHOLD: usize = 50;

/// Player registry capacity.
pub const MAX_PLAYERS: usize = 500;

/// NPC registry capacity.
pub const MAX_NPCS: usize = 5000;

/// Consecutive per-entity faults before a player is logged out.
pub const ENTITY_FAULT_THRESHOLD: u32 = 3;

/// Consecutive failed ticks before the engine shuts down.
pub const MAX_CONSECUTIVE_TICK_ERRORS: u32 = 10;

/// Quiet period after which the tick error count resets (seconds).
pub const ERROR_RESET_SECS: u64 = 60;
