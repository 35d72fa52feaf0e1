//! Fault counting and escalation.
//!
//! Two scopes:
//!
//! - **Per step** ([`PhaseContext`]): consecutive player / NPC faults seen by
//!   one pipeline step. The pipeline keeps these across ticks (one per serial
//!   step, one per worker stripe for parallel steps). A player fault that
//!   brings the player count to the threshold requests that player's logout;
//!   a success in the same category resets the count.
//! - **Per engine** ([`TickFailureTracker`]): consecutive failed ticks,
//!   cleared by the first successful tick once the quiet window has passed.
//!
//! Entity faults are tolerated until the threshold. Tick faults stop the
//! engine at theirs.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::world::actor::{Actor, ActorFault, NpcActor, PlayerActor};

/// Consecutive failure count. Never negative; resetting twice is harmless.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaultCounter {
    consecutive: u32,
}

impl FaultCounter {
    /// Count a failure, returning the new count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    /// Back to zero.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        self.consecutive
    }
}

/// Pipeline step a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    /// Serial inbound packet pass.
    PlayerPackets,
    /// Serial game logic pass.
    PlayerLogic,
    /// Parallel output building.
    PlayerView,
    /// Parallel flush.
    PlayerFlush,
    /// Parallel NPC logic.
    NpcLogic,
    /// Parallel NPC flag reset.
    NpcReset,
}

impl PhaseStep {
    /// Log label.
    pub fn label(self) -> &'static str {
        match self {
            PhaseStep::PlayerPackets => "packet processing",
            PhaseStep::PlayerLogic => "player processing",
            PhaseStep::PlayerView => "player/NPC updating",
            PhaseStep::PlayerFlush => "player state reset",
            PhaseStep::NpcLogic => "NPC processing",
            PhaseStep::NpcReset => "NPC reset",
        }
    }
}

impl fmt::Display for PhaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Threshold configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecoveryPolicy {
    entity_threshold: u32,
}

impl ErrorRecoveryPolicy {
    /// Force logout at `entity_threshold` consecutive faults (minimum 1).
    pub fn new(entity_threshold: u32) -> Self {
        Self {
            entity_threshold: entity_threshold.max(1),
        }
    }

    /// Consecutive faults that trigger a forced logout.
    pub fn entity_threshold(&self) -> u32 {
        self.entity_threshold
    }
}

impl Default for ErrorRecoveryPolicy {
    fn default() -> Self {
        Self::new(crate::ENTITY_FAULT_THRESHOLD)
    }
}

/// Outcome of recording a player fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Below threshold; logged only.
    Tolerated {
        /// Consecutive faults so far.
        count: u32,
    },
    /// Threshold reached; logout requested.
    ForceLogout {
        /// Consecutive faults so far.
        count: u32,
    },
    /// Fault was fatal; the tick must stop.
    Fatal,
}

/// Per-tick counts for one context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStats {
    /// Operations that succeeded.
    pub succeeded: usize,
    /// Recoverable faults.
    pub faults: usize,
    /// Forced logouts requested.
    pub forced_logouts: usize,
}

impl std::ops::AddAssign for PhaseStats {
    fn add_assign(&mut self, rhs: Self) {
        self.succeeded += rhs.succeeded;
        self.faults += rhs.faults;
        self.forced_logouts += rhs.forced_logouts;
    }
}

/// Fatal fault captured inside a step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{fault} ({actor} during {step})")]
pub struct FatalFault {
    /// Step it happened in.
    pub step: PhaseStep,
    /// Actor description.
    pub actor: String,
    /// The fault.
    pub fault: ActorFault,
}

/// Fault state owned by one step (or one stripe of a parallel step).
#[derive(Debug, Clone)]
pub struct PhaseContext {
    step: PhaseStep,
    policy: ErrorRecoveryPolicy,
    players: FaultCounter,
    npcs: FaultCounter,
    stats: PhaseStats,
    fatal: Option<FatalFault>,
}

impl PhaseContext {
    /// Fresh context for `step`.
    pub fn new(step: PhaseStep, policy: ErrorRecoveryPolicy) -> Self {
        Self {
            step,
            policy,
            players: FaultCounter::default(),
            npcs: FaultCounter::default(),
            stats: PhaseStats::default(),
            fatal: None,
        }
    }

    /// Apply the outcome of a player operation.
    ///
    /// Success resets the player count. A recoverable fault is counted and
    /// logged; at the threshold the player's logout is requested. A fatal
    /// fault is held for the pipeline to pick up after the step.
    pub fn record_player<P: PlayerActor>(
        &mut self,
        player: &mut P,
        result: Result<(), ActorFault>,
    ) -> Option<Escalation> {
        let fault = match result {
            Ok(()) => {
                self.players.reset();
                self.stats.succeeded += 1;
                return None;
            }
            Err(fault) => fault,
        };

        if fault.is_fatal() {
            self.hold_fatal(player.username().to_string(), fault);
            return Some(Escalation::Fatal);
        }

        self.stats.faults += 1;
        let count = self.players.record_failure();
        let threshold = self.policy.entity_threshold();
        error!(
            "Error for player {} during {} (Error {}/{}): {}",
            player.username(),
            self.step,
            count,
            threshold,
            fault
        );

        if count >= threshold {
            error!(
                "Forcing logout for player {} after {} consecutive errors",
                player.username(),
                count
            );
            player.request_logout();
            self.stats.forced_logouts += 1;
            Some(Escalation::ForceLogout { count })
        } else {
            Some(Escalation::Tolerated { count })
        }
    }

    /// Apply the outcome of an NPC operation. NPC faults are only logged.
    pub fn record_npc<N: NpcActor>(&mut self, npc: &N, result: Result<(), ActorFault>) {
        let fault = match result {
            Ok(()) => {
                self.npcs.reset();
                self.stats.succeeded += 1;
                return;
            }
            Err(fault) => fault,
        };

        if self.step == PhaseStep::NpcReset {
            warn!("NPC {} at {} failed reset: {}", npc.npc_id(), npc.location(), fault);
            self.stats.faults += 1;
            return;
        }

        if fault.is_fatal() {
            self.hold_fatal(format!("npc {}", npc.npc_id()), fault);
            return;
        }

        self.stats.faults += 1;
        let count = self.npcs.record_failure();
        error!(
            "Error for NPC {} at {} during {} (Error {}): {}",
            npc.npc_id(),
            npc.location(),
            self.step,
            count,
            fault
        );
    }

    /// Remove and return the held fatal fault.
    pub fn take_fatal(&mut self) -> Option<FatalFault> {
        self.fatal.take()
    }

    /// This tick's counts, cleared for the next tick.
    pub fn take_stats(&mut self) -> PhaseStats {
        std::mem::take(&mut self.stats)
    }

    /// Step this context belongs to.
    pub fn step(&self) -> PhaseStep {
        self.step
    }

    /// Current consecutive player faults.
    pub fn player_faults(&self) -> u32 {
        self.players.count()
    }

    /// Current consecutive NPC faults.
    pub fn npc_faults(&self) -> u32 {
        self.npcs.count()
    }

    fn hold_fatal(&mut self, actor: String, fault: ActorFault) {
        error!("Fatal fault for {} during {}: {}", actor, self.step, fault);
        self.fatal.get_or_insert(FatalFault {
            step: self.step,
            actor,
            fault,
        });
    }
}

// =============================================================================
// ENGINE SCOPE
// =============================================================================

/// Consecutive whole-tick failures with a quiet-window reset.
#[derive(Debug, Clone)]
pub struct TickFailureTracker {
    consecutive: u32,
    last_error: Option<Instant>,
    max_consecutive: u32,
    reset_window: Duration,
}

impl TickFailureTracker {
    /// Tracker that is exhausted at `max_consecutive` failures and forgets
    /// them after `reset_window` without a new one.
    pub fn new(max_consecutive: u32, reset_window: Duration) -> Self {
        Self {
            consecutive: 0,
            last_error: None,
            max_consecutive: max_consecutive.max(1),
            reset_window,
        }
    }

    /// Count a failed tick at `now`; returns the new count.
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.last_error = Some(now);
        self.consecutive
    }

    /// A tick succeeded at `now`. Resets the count if the last failure is
    /// older than the quiet window. Returns whether a reset happened.
    pub fn record_success(&mut self, now: Instant) -> bool {
        if self.consecutive == 0 {
            return false;
        }
        let quiet = self
            .last_error
            .map_or(true, |at| now.saturating_duration_since(at) > self.reset_window);
        if quiet {
            self.consecutive = 0;
        }
        quiet
    }

    /// Whether the count has reached the maximum.
    pub fn is_exhausted(&self) -> bool {
        self.consecutive >= self.max_consecutive
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        self.consecutive
    }

    /// Maximum before fatal shutdown.
    pub fn max(&self) -> u32 {
        self.max_consecutive
    }
}

impl Default for TickFailureTracker {
    fn default() -> Self {
        Self::new(
            crate::MAX_CONSECUTIVE_TICK_ERRORS,
            Duration::from_secs(crate::ERROR_RESET_SECS),
        )
    }
}
