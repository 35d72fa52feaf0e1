//! Actor capability traits and shared actor state.
//!
//! The pipeline only talks to actors through [`PlayerActor`] and
//! [`NpcActor`]. Every per-entity operation returns a typed result so the
//! pipeline decides between "count and continue" and "stop the engine"
//! without unwinding.

use std::time::{Duration, Instant};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::registry::{RegistryError, Slotted};
use crate::services::persistence::PlayerRecord;
use crate::services::transport::TransportError;
use crate::world::view::WorldView;

// =============================================================================
// LOCATION
// =============================================================================

/// Tile position in the world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// West-east tile.
    pub x: i32,
    /// South-north tile.
    pub y: i32,
    /// Height plane.
    pub z: u8,
}

impl Location {
    /// Create a location.
    pub const fn new(x: i32, y: i32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Chebyshev distance check on the same plane. Holds for any pair of
    /// coordinates, including client-supplied extremes.
    pub fn is_within_distance(&self, other: &Location, distance: i32) -> bool {
        let Ok(distance) = u32::try_from(distance) else {
            return false;
        };
        self.z == other.z
            && self.x.abs_diff(other.x) <= distance
            && self.y.abs_diff(other.y) <= distance
    }

    /// One tile step toward `target`.
    pub fn step_toward(&self, target: &Location) -> Location {
        Location {
            x: self.x.saturating_add(target.x.cmp(&self.x) as i32),
            y: self.y.saturating_add(target.y.cmp(&self.y) as i32),
            z: self.z,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// =============================================================================
// UPDATE FLAGS
// =============================================================================

bitflags! {
    /// What changed about an actor this tick. Cleared by the flush phases.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UpdateFlags: u16 {
        /// Walked one or more tiles.
        const MOVED = 1 << 0;
        /// Moved without walking.
        const TELEPORTED = 1 << 1;
        /// Appearance changed.
        const APPEARANCE = 1 << 2;
        /// Said something.
        const CHAT = 1 << 3;
        /// Faces a new direction.
        const FACING = 1 << 4;
    }
}

// =============================================================================
// FAULTS
// =============================================================================

/// How bad a per-entity fault is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSeverity {
    /// Count it, log it, keep ticking.
    Recoverable,
    /// World state can no longer be trusted.
    Fatal,
}

/// Failure of a single actor operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorFault {
    /// Inbound packet could not be handled.
    #[error("bad packet (opcode {opcode}): {reason}")]
    Packet {
        /// Packet opcode.
        opcode: u8,
        /// What went wrong.
        reason: String,
    },

    /// Game logic failed.
    #[error("logic error: {0}")]
    Logic(String),

    /// Outbound transport failed.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Actor state is corrupt. Stops the engine.
    #[error("corrupted state: {0}")]
    Corrupted(String),
}

impl ActorFault {
    /// Severity of this fault.
    pub fn severity(&self) -> FaultSeverity {
        match self {
            ActorFault::Corrupted(_) => FaultSeverity::Fatal,
            _ => FaultSeverity::Recoverable,
        }
    }

    /// Whether this fault must stop the engine.
    pub fn is_fatal(&self) -> bool {
        self.severity() == FaultSeverity::Fatal
    }
}

// =============================================================================
// LOGOUT STATE
// =============================================================================

/// Cooperative logout bookkeeping carried by every player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogoutState {
    requested: bool,
    queued: bool,
    deadline: Option<Instant>,
}

impl LogoutState {
    /// Ask for this player to leave. Idempotent.
    pub fn request(&mut self) {
        self.requested = true;
    }

    /// Whether a logout has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested
    }

    /// Whether the player sits in the eviction queue.
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Mark as pushed to the eviction queue.
    pub fn mark_queued(&mut self) {
        self.queued = true;
    }

    /// Forget a stale eviction entry. The logout request itself stands.
    pub fn unqueue(&mut self) {
        self.queued = false;
        self.deadline = None;
    }

    /// Start the forced-logout timer. Keeps an already running deadline.
    pub fn arm_deadline(&mut self, now: Instant, force_after: Duration) {
        self.deadline.get_or_insert(now + force_after);
    }

    /// Whether the forced-logout deadline has passed.
    pub fn deadline_elapsed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Forced-logout deadline, once queued.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Anything that can live in a registry slot.
pub trait Actor: Slotted + Send + 'static {
    /// Where the actor stands.
    fn location(&self) -> Location;

    /// Changes recorded this tick.
    fn update_flags(&self) -> UpdateFlags;
}

/// Normalized identity used for the one-session-per-name rule.
pub fn identity_key(name: &str) -> String {
    name.trim().replace('_', " ").to_lowercase()
}

/// A connected (or simulated) player.
pub trait PlayerActor: Actor {
    /// Display name.
    fn username(&self) -> &str;

    /// Identity key; two residents may never share one.
    fn identity(&self) -> String {
        identity_key(self.username())
    }

    /// Simulated players skip output building.
    fn is_synthetic(&self) -> bool {
        false
    }

    /// Handle queued inbound packets.
    fn process_packets(&mut self) -> Result<(), ActorFault>;

    /// Per-tick game logic.
    fn process_logic(&mut self) -> Result<(), ActorFault>;

    /// Rebuild the outgoing view of nearby players and NPCs.
    fn update_view(&mut self, view: &WorldView) -> Result<(), ActorFault>;

    /// Clear this tick's update flags.
    fn reset_updating(&mut self);

    /// Drop any cached update payload.
    fn clear_cached_update(&mut self);

    /// Queue a server text message for the next flush.
    fn queue_message(&mut self, text: &str);

    /// Push queued outbound messages to the transport.
    fn flush_outbound(&mut self) -> Result<(), ActorFault>;

    /// Logout bookkeeping.
    fn logout_state(&self) -> &LogoutState;

    /// Mutable logout bookkeeping.
    fn logout_state_mut(&mut self) -> &mut LogoutState;

    /// Request a cooperative logout.
    fn request_logout(&mut self) {
        self.logout_state_mut().request();
    }

    /// No outstanding state blocks an immediate logout.
    fn can_logout(&self) -> bool;

    /// Called when admission fails; the actor never became resident.
    fn admission_rejected(&mut self, _reason: &RegistryError) {}

    /// Called once the player has left its slot.
    fn evicted(&mut self) {}

    /// Snapshot for persistence.
    fn record(&self) -> PlayerRecord;
}

/// A non-player character.
pub trait NpcActor: Actor {
    /// Definition id.
    fn npc_id(&self) -> u32;

    /// Per-tick logic.
    fn process(&mut self) -> Result<(), ActorFault>;

    /// Clear this tick's update flags.
    fn reset_updating(&mut self) -> Result<(), ActorFault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_normalization() {
        assert_eq!(identity_key("Mod_Ash"), "mod ash");
        assert_eq!(identity_key("  mod ash "), "mod ash");
        assert_ne!(identity_key("zezima"), identity_key("zezima2"));
    }

    #[test]
    fn test_location_distance_and_step() {
        let a = Location::new(10, 10, 0);
        let b = Location::new(14, 7, 0);
        assert!(a.is_within_distance(&b, 4));
        assert!(!a.is_within_distance(&b, 3));
        assert!(!a.is_within_distance(&Location::new(10, 10, 1), 15));

        assert_eq!(a.step_toward(&b), Location::new(11, 9, 0));
        assert_eq!(b.step_toward(&b), b);
    }

    #[test]
    fn test_extreme_coordinates_do_not_overflow() {
        let home = Location::new(3200, 3200, 0);
        let far = Location::new(i32::MIN, 0, 0);
        assert!(!far.is_within_distance(&home, 64));
        assert!(!home.is_within_distance(&far, 64));
        assert!(!home.is_within_distance(&home, -1));

        let edge = Location::new(i32::MAX, i32::MIN, 0);
        assert!(edge.is_within_distance(&edge, 0));
        assert_eq!(home.step_toward(&far), Location::new(3199, 3199, 0));
        assert_eq!(edge.step_toward(&home), Location::new(i32::MAX - 1, i32::MIN + 1, 0));
    }

    #[test]
    fn test_fault_severity() {
        assert!(!ActorFault::Logic("x".into()).is_fatal());
        assert!(ActorFault::Corrupted("x".into()).is_fatal());
        assert!(!ActorFault::from(TransportError::Disconnected).is_fatal());
    }

    #[test]
    fn test_logout_deadline() {
        let now = Instant::now();
        let mut state = LogoutState::default();
        assert!(!state.deadline_elapsed(now));

        state.request();
        state.mark_queued();
        state.arm_deadline(now, Duration::from_secs(60));
        assert!(state.is_queued());
        assert!(!state.deadline_elapsed(now + Duration::from_secs(59)));
        assert!(state.deadline_elapsed(now + Duration::from_secs(60)));

        // Re-arming keeps the original deadline
        state.arm_deadline(now + Duration::from_secs(30), Duration::from_secs(60));
        assert_eq!(state.deadline(), Some(now + Duration::from_secs(60)));

        state.unqueue();
        assert!(state.is_requested());
        assert!(!state.is_queued());
        assert_eq!(state.deadline(), None);
    }
}
