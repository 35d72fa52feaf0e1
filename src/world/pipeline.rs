//! One world tick.
//!
//! ```text
//!   1. content hooks            serial
//!   2. ground items             serial
//!   3. player admissions        serial, bounded, identity check
//!   4. player evictions         serial, bounded, safe/deadline/updating
//!   5. npc admissions/removals  serial, bounded
//!   6. packets, then logic      serial, slot order
//!   7. A: npc logic             barrier
//!      (world view captured)
//!   8. B: player views          barrier, per-actor lock
//!   9. C: player flush          barrier, per-actor lock
//!  10. D: npc reset             barrier
//! ```
//!
//! Every per-entity call returns `Result<(), ActorFault>` and is fed to a
//! [`PhaseContext`]. Recoverable faults never leave their step. Fatal faults
//! and barrier failures end the tick with a fatal [`TickError`].

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::barrier::{BarrierError, SyncBarrierExecutor};
use crate::core::clock::{Clock, SystemClock};
use crate::core::registry::{ActorHandle, Slotted};
use crate::engine::config::EngineConfig;
use crate::engine::scheduler::TickTarget;
use crate::services::hooks::{ContentHook, HookError};
use crate::services::persistence::PlayerStore;
use crate::world::actor::{ActorFault, NpcActor, PlayerActor};
use crate::world::events::{EventDispatcher, WorldEvent};
use crate::world::recovery::{
    ErrorRecoveryPolicy, Escalation, FatalFault, PhaseContext, PhaseStats, PhaseStep,
};
use crate::world::view::WorldView;
use crate::world::world::{SaveSummary, World};

// =============================================================================
// ERRORS
// =============================================================================

/// Failure of a whole tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    /// A content hook failed. Recoverable.
    #[error("content hook failed: {0}")]
    Hook(#[from] HookError),

    /// An actor reported corrupted state.
    #[error("fatal actor fault: {0}")]
    Fatal(FatalFault),

    /// A parallel phase did not complete cleanly.
    #[error("{step} phase failed: {source}")]
    Barrier {
        /// Phase that failed.
        step: PhaseStep,
        /// Executor error.
        #[source]
        source: BarrierError,
    },
}

impl TickError {
    /// Whether the engine must stop instead of counting this failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TickError::Hook(_))
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// Summary of one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Players that took a slot.
    pub players_admitted: usize,
    /// Players turned away because the registry was full.
    pub players_rejected: usize,
    /// Players re-queued behind a resident session with the same identity.
    pub players_deferred: usize,
    /// Queued players whose logout was requested before they got a slot.
    pub players_cancelled: usize,
    /// Players that left their slot.
    pub players_evicted: usize,
    /// NPCs that took a slot.
    pub npcs_admitted: usize,
    /// NPCs removed.
    pub npcs_removed: usize,
    /// Player operation counts across all steps.
    pub player_stats: PhaseStats,
    /// NPC operation counts across all steps.
    pub npc_stats: PhaseStats,
    /// Wall time spent.
    pub duration: Duration,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {}: +{}/-{} players, +{}/-{} npcs, {} player faults, {} npc faults, {:?}",
            self.tick,
            self.players_admitted,
            self.players_evicted,
            self.npcs_admitted,
            self.npcs_removed,
            self.player_stats.faults,
            self.npc_stats.faults,
            self.duration
        )
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Pipeline knobs taken from [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
struct Settings {
    queued_loop_threshold: usize,
    forced_logout_after: Duration,
    sync_synthetic_players: bool,
}

/// Fault contexts kept across ticks, one per serial step and one per stripe
/// for each parallel step.
struct Contexts {
    packets: PhaseContext,
    logic: PhaseContext,
    npc_logic: Vec<PhaseContext>,
    view: Vec<PhaseContext>,
    flush: Vec<PhaseContext>,
    npc_reset: Vec<PhaseContext>,
}

impl Contexts {
    fn new(policy: ErrorRecoveryPolicy, stripes: usize) -> Self {
        Self {
            packets: PhaseContext::new(PhaseStep::PlayerPackets, policy),
            logic: PhaseContext::new(PhaseStep::PlayerLogic, policy),
            npc_logic: striped(PhaseStep::NpcLogic, policy, stripes),
            view: striped(PhaseStep::PlayerView, policy, stripes),
            flush: striped(PhaseStep::PlayerFlush, policy, stripes),
            npc_reset: striped(PhaseStep::NpcReset, policy, stripes),
        }
    }
}

fn striped(step: PhaseStep, policy: ErrorRecoveryPolicy, stripes: usize) -> Vec<PhaseContext> {
    (0..stripes).map(|_| PhaseContext::new(step, policy)).collect()
}

/// Runs ticks against a [`World`].
pub struct WorldTickPipeline<P: PlayerActor, N: NpcActor> {
    world: World<P, N>,
    executor: SyncBarrierExecutor,
    hooks: Vec<Box<dyn ContentHook>>,
    ground_items: Option<Box<dyn ContentHook>>,
    store: Arc<dyn PlayerStore>,
    clock: Arc<dyn Clock>,
    events: EventDispatcher,
    policy: ErrorRecoveryPolicy,
    settings: Settings,
    contexts: Contexts,
    tick: u64,
}

impl<P: PlayerActor, N: NpcActor> WorldTickPipeline<P, N> {
    /// Pipeline over `world`, saving through `store`. Spawns the worker pool.
    pub fn new(
        world: World<P, N>,
        config: &EngineConfig,
        store: Arc<dyn PlayerStore>,
    ) -> io::Result<Self> {
        let executor = SyncBarrierExecutor::new(config.worker_threads)?
            .with_phase_timeout(config.phase_timeout);
        let policy = ErrorRecoveryPolicy::new(config.entity_fault_threshold);
        let contexts = Contexts::new(policy, executor.worker_count());

        Ok(Self {
            world,
            executor,
            hooks: Vec::new(),
            ground_items: None,
            store,
            clock: Arc::new(SystemClock),
            events: EventDispatcher::new(),
            policy,
            settings: Settings {
                queued_loop_threshold: config.queued_loop_threshold,
                forced_logout_after: config.forced_logout_after,
                sync_synthetic_players: config.sync_synthetic_players,
            },
            contexts,
            tick: 0,
        })
    }

    /// Use `clock` for deadlines and tick timing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `hook` at the start of every tick, after those already added.
    pub fn add_hook(&mut self, hook: Box<dyn ContentHook>) {
        self.hooks.push(hook);
    }

    /// Ground-item upkeep, run after the content hooks.
    pub fn set_ground_items(&mut self, hook: Box<dyn ContentHook>) {
        self.ground_items = Some(hook);
    }

    /// The world.
    pub fn world(&self) -> &World<P, N> {
        &self.world
    }

    /// Event fan-out.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Save every resident player.
    pub fn save_players(&self) -> SaveSummary {
        self.world.save_players(self.store.as_ref())
    }

    /// Run one tick.
    #[instrument(level = "trace", skip(self), fields(tick = self.tick + 1))]
    pub fn process(&mut self) -> Result<TickReport, TickError> {
        let started = self.clock.now();
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        for hook in &mut self.hooks {
            hook.process()?;
        }
        if let Some(ground_items) = &mut self.ground_items {
            ground_items.process()?;
        }

        self.admit_players(&mut report);
        self.evict_players(&mut report);
        self.drain_npcs(&mut report);

        self.process_players()?;
        self.process_npcs()?;

        let view = Arc::new(WorldView::capture(self.world.players(), self.world.npcs()));
        self.update_players(view)?;
        self.flush_players()?;
        self.reset_npcs()?;

        self.collect_stats(&mut report);
        report.duration = self.clock.now().saturating_duration_since(started);
        debug!("{}", report);
        Ok(report)
    }

    // =========================================================================
    // Drains
    // =========================================================================

    fn admit_players(&mut self, report: &mut TickReport) {
        let queue = self.world.player_admissions();
        let mut deferred = Vec::new();

        for handle in queue.drain_bounded(self.settings.queued_loop_threshold) {
            let identity = {
                let mut player = handle.lock();
                if player.slot().is_none() && player.logout_state().is_requested() {
                    debug!("Login of {} cancelled before admission", player.username());
                    player.evicted();
                    report.players_cancelled += 1;
                    continue;
                }
                player.identity()
            };

            if let Some(resident) = self.world.player_by_name(&identity) {
                if Arc::ptr_eq(&resident, &handle) {
                    debug!("Ignoring admission of already resident player {}", identity);
                    continue;
                }
                let mut prior = resident.lock();
                if !prior.logout_state().is_requested() {
                    info!("Duplicate login for {}, logging out prior session", identity);
                    prior.request_logout();
                }
                deferred.push(handle);
                continue;
            }

            let added = self.world.players_mut().add(Arc::clone(&handle));
            match added {
                Ok(slot) => {
                    let username = handle.lock().username().to_string();
                    info!("Player {} admitted to slot {}", username, slot);
                    self.events.dispatch(WorldEvent::PlayerAdmitted {
                        slot,
                        username,
                        tick: self.tick,
                    });
                    report.players_admitted += 1;
                }
                Err(e) => {
                    let mut player = handle.lock();
                    warn!("Rejected player {}: {}", player.username(), e);
                    player.admission_rejected(&e);
                    report.players_rejected += 1;
                }
            }
        }

        report.players_deferred = deferred.len();
        for handle in deferred {
            queue.push(handle);
        }
    }

    fn evict_players(&mut self, report: &mut TickReport) {
        let now = self.clock.now();
        let updating = self.world.is_updating();
        let force_after = self.settings.forced_logout_after;

        let ready = self.world.player_evictions().drain_where(
            self.settings.queued_loop_threshold,
            |handle| {
                let mut player = handle.lock();
                player.logout_state_mut().arm_deadline(now, force_after);
                updating || player.can_logout() || player.logout_state().deadline_elapsed(now)
            },
        );

        for handle in ready {
            let resident = handle.lock().slot();
            let slot = match resident {
                Some(slot) if self.world.players_mut().remove(&handle) => slot,
                _ => {
                    // Still waiting for admission; the admission drain drops it
                    let mut player = handle.lock();
                    debug!(
                        "Eviction of non-resident player {} left to admission",
                        player.username()
                    );
                    player.logout_state_mut().unqueue();
                    continue;
                }
            };

            let mut player = handle.lock();
            if let Err(e) = self.store.save(&player.record()) {
                warn!("Failed to save {} on logout: {}", player.username(), e);
            }
            player.evicted();
            info!("Player {} left slot {}", player.username(), slot);
            self.events.dispatch(WorldEvent::PlayerEvicted {
                slot,
                username: player.username().to_string(),
                tick: self.tick,
            });
            report.players_evicted += 1;
        }
    }

    fn drain_npcs(&mut self, report: &mut TickReport) {
        let limit = self.settings.queued_loop_threshold;

        for handle in self.world.npc_admissions().drain_bounded(limit) {
            match self.world.npcs_mut().add(handle) {
                Ok(_) => report.npcs_admitted += 1,
                Err(e) => warn!("NPC not spawned: {}", e),
            }
        }
        for handle in self.world.npc_evictions().drain_bounded(limit) {
            if self.world.npcs_mut().remove(&handle) {
                report.npcs_removed += 1;
            }
        }
    }

    // =========================================================================
    // Serial player step
    // =========================================================================

    fn process_players(&mut self) -> Result<(), TickError> {
        let players: Vec<ActorHandle<P>> = self.world.players().iter().cloned().collect();

        // All packets before any logic
        for handle in &players {
            let mut player = handle.lock();
            let result = player.process_packets();
            check_serial(&mut self.contexts.packets, &mut *player, result)?;
        }

        let now = self.clock.now();
        let evictions = self.world.player_evictions();
        for handle in &players {
            let mut player = handle.lock();
            let result = player.process_logic();
            check_serial(&mut self.contexts.logic, &mut *player, result)?;

            let logout = player.logout_state();
            if logout.is_requested() && !logout.is_queued() {
                let logout = player.logout_state_mut();
                logout.mark_queued();
                logout.arm_deadline(now, self.settings.forced_logout_after);
                evictions.push(Arc::clone(handle));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Barrier phases
    // =========================================================================

    fn process_npcs(&mut self) -> Result<(), TickError> {
        run_barrier(
            &self.executor,
            self.policy,
            &mut self.contexts.npc_logic,
            self.world.npcs().snapshot(),
            |ctx, npc: &mut N| {
                let result = npc.process();
                ctx.record_npc(&*npc, result);
            },
        )
    }

    fn update_players(&mut self, view: Arc<WorldView>) -> Result<(), TickError> {
        let sync_synthetic = self.settings.sync_synthetic_players;
        run_barrier(
            &self.executor,
            self.policy,
            &mut self.contexts.view,
            self.world.players().snapshot(),
            move |ctx, player: &mut P| {
                if player.is_synthetic() && !sync_synthetic {
                    return;
                }
                let result = player.update_view(&view);
                ctx.record_player(player, result);
            },
        )
    }

    fn flush_players(&mut self) -> Result<(), TickError> {
        let events = self.events.clone();
        let tick = self.tick;
        run_barrier(
            &self.executor,
            self.policy,
            &mut self.contexts.flush,
            self.world.players().snapshot(),
            move |ctx, player: &mut P| {
                player.reset_updating();
                player.clear_cached_update();
                let result = player.flush_outbound();
                let flushed = result.is_ok();
                ctx.record_player(&mut *player, result);

                if flushed {
                    if let Some(slot) = player.slot() {
                        events.dispatch(WorldEvent::PacketsFlushed {
                            slot,
                            username: player.username().to_string(),
                            tick,
                        });
                    }
                }
            },
        )
    }

    fn reset_npcs(&mut self) -> Result<(), TickError> {
        run_barrier(
            &self.executor,
            self.policy,
            &mut self.contexts.npc_reset,
            self.world.npcs().snapshot(),
            |ctx, npc: &mut N| {
                let result = npc.reset_updating();
                ctx.record_npc(&*npc, result);
            },
        )
    }

    fn collect_stats(&mut self, report: &mut TickReport) {
        let c = &mut self.contexts;
        report.player_stats += c.packets.take_stats();
        report.player_stats += c.logic.take_stats();
        for ctx in c.view.iter_mut().chain(c.flush.iter_mut()) {
            report.player_stats += ctx.take_stats();
        }
        for ctx in c.npc_logic.iter_mut().chain(c.npc_reset.iter_mut()) {
            report.npc_stats += ctx.take_stats();
        }
    }
}

fn check_serial<P: PlayerActor>(
    ctx: &mut PhaseContext,
    player: &mut P,
    result: Result<(), ActorFault>,
) -> Result<(), TickError> {
    if ctx.record_player(player, result) == Some(Escalation::Fatal) {
        if let Some(fatal) = ctx.take_fatal() {
            return Err(TickError::Fatal(fatal));
        }
    }
    Ok(())
}

/// Run `op` under the per-actor lock for every occupied slot of `snapshot`,
/// striped across the pool with one context per stripe.
fn run_barrier<T, F>(
    executor: &SyncBarrierExecutor,
    policy: ErrorRecoveryPolicy,
    contexts: &mut Vec<PhaseContext>,
    snapshot: Arc<[Option<ActorHandle<T>>]>,
    op: F,
) -> Result<(), TickError>
where
    T: Send + 'static,
    F: Fn(&mut PhaseContext, &mut T) + Send + Sync + 'static,
{
    let step = contexts
        .first()
        .map_or(PhaseStep::NpcLogic, PhaseContext::step);
    let stripes = contexts.len();
    let count = snapshot.len();

    let outcome = executor.run_phase(count, std::mem::take(contexts), move |ctx, index| {
        if let Some(handle) = &snapshot[index] {
            let mut actor = handle.lock();
            op(ctx, &mut *actor);
        }
    });

    match outcome {
        Ok(returned) => *contexts = returned,
        Err(source) => {
            *contexts = striped(step, policy, stripes);
            return Err(TickError::Barrier { step, source });
        }
    }

    match contexts.iter_mut().find_map(PhaseContext::take_fatal) {
        Some(fatal) => Err(TickError::Fatal(fatal)),
        None => Ok(()),
    }
}

impl<P: PlayerActor, N: NpcActor> TickTarget for WorldTickPipeline<P, N> {
    fn process(&mut self) -> Result<(), TickError> {
        WorldTickPipeline::process(self).map(|_| ())
    }

    fn save_all(&mut self) -> SaveSummary {
        self.save_players()
    }
}
