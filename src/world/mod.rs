//! The simulated world.
//!
//! Actors, the world context that holds them, and the per-tick pipeline
//! that advances them.

pub mod actor;
pub mod events;
pub mod npc;
pub mod pipeline;
pub mod player;
pub mod recovery;
pub mod view;
#[allow(clippy::module_inception)]
pub mod world;

pub use actor::{
    identity_key, Actor, ActorFault, FaultSeverity, Location, LogoutState, NpcActor, PlayerActor,
    UpdateFlags,
};
pub use events::{EventDispatcher, WorldEvent};
pub use npc::Npc;
pub use pipeline::{TickError, TickReport, WorldTickPipeline};
pub use player::Player;
pub use recovery::{
    ErrorRecoveryPolicy, Escalation, FatalFault, FaultCounter, PhaseContext, PhaseStats,
    PhaseStep, TickFailureTracker,
};
pub use view::{LocalList, Sighting, ViewDelta, WorldView};
pub use world::{SaveSummary, World};
