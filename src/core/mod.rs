//! Concurrency primitives.
//!
//! Nothing in here knows about players or NPCs; the world layer builds on
//! these pieces.

pub mod barrier;
pub mod clock;
pub mod queue;
pub mod registry;

// Re-export core types
pub use barrier::{BarrierError, SyncBarrierExecutor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use queue::PendingQueue;
pub use registry::{ActorHandle, EntityRegistry, RegistryError, Slotted};
